//! The routing contract and the runtime-expansion capability.

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;

/// Capability exposed by routers whose ownership window can be widened at
/// runtime (add-shards-without-reindex scaling). Queried through
/// [`DocRouter::expandable`] instead of downcasting.
pub trait SupportsRuntimeExpansion: Send + Sync {
    /// Inclusive lower bound of the owned id window.
    fn start(&self) -> u64;

    /// Exclusive upper bound of the owned id window.
    fn end(&self) -> u64;

    /// Widens the window's upper bound. Ignored when `new_end` does not
    /// extend the current window.
    fn expand_to(&self, new_end: u64);

    /// True once the window has been widened beyond its configured bound.
    fn is_expanded(&self) -> bool;
}

/// A pure predicate deciding shard ownership of a record or ACL group.
pub trait DocRouter: Send + Sync {
    /// Decides whether the record belongs on `shard_instance` of
    /// `shard_count` shards.
    fn route_record(&self, shard_count: u32, shard_instance: u32, record: &Record)
        -> RouteDecision;

    /// Decides whether the ACL group belongs on `shard_instance` of
    /// `shard_count` shards.
    fn route_acl_group(
        &self,
        shard_count: u32,
        shard_instance: u32,
        group: &AclGroup,
    ) -> RouteDecision;

    /// The runtime-expansion capability, when this router has one.
    fn expandable(&self) -> Option<&dyn SupportsRuntimeExpansion> {
        None
    }
}
