//! Routing decisions.

/// Outcome of a routing predicate.
///
/// `Indeterminate` is distinct from a definite rejection: it means the
/// strategy has no answer for this input (e.g. a dynamic-property strategy on
/// a record that carries no property) and a fallback may decide instead.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// The record belongs on the local shard.
    Accept,
    /// The record definitely belongs elsewhere.
    Reject,
    /// This strategy has no answer for this input.
    Indeterminate,
}

impl RouteDecision {
    /// Maps a definite boolean to a decision.
    pub fn from_bool(accept: bool) -> Self {
        if accept {
            RouteDecision::Accept
        } else {
            RouteDecision::Reject
        }
    }

    /// Resolves to a boolean at the outermost call site. An unresolved
    /// indeterminate defaults to accept, so an unanswerable record is never
    /// silently dropped from every shard.
    pub fn accepted(self) -> bool {
        !matches!(self, RouteDecision::Reject)
    }

    /// True for Accept/Reject, false for Indeterminate.
    pub fn is_definite(self) -> bool {
        !matches!(self, RouteDecision::Indeterminate)
    }
}
