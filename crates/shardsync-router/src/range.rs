//! Range routing on record ids.
//!
//! Accepts records whose id falls in a `[start, end)` window. The window's
//! upper bound can be widened at runtime when the cluster raises the shard's
//! index cap, which is how shards are added without a full reindex. ACL
//! groups are duplicated on every shard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;
use crate::router::{DocRouter, SupportsRuntimeExpansion};

/// Routes records by a runtime-expandable id window.
#[derive(Debug)]
pub struct DbIdRangeRouter {
    start: AtomicU64,
    end: AtomicU64,
    expanded: AtomicBool,
}

impl DbIdRangeRouter {
    /// Creates a router owning `[start, end)`.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: AtomicU64::new(start),
            end: AtomicU64::new(end),
            expanded: AtomicBool::new(false),
        }
    }
}

impl SupportsRuntimeExpansion for DbIdRangeRouter {
    fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    fn end(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    fn expand_to(&self, new_end: u64) {
        let current = self.end.load(Ordering::Acquire);
        if new_end > current {
            self.end.store(new_end, Ordering::Release);
            self.expanded.store(true, Ordering::Release);
            tracing::info!(from = current, to = new_end, "expanded id-range router");
        }
    }

    fn is_expanded(&self) -> bool {
        self.expanded.load(Ordering::Acquire)
    }
}

impl DocRouter for DbIdRangeRouter {
    fn route_record(
        &self,
        _shard_count: u32,
        _shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        let id = record.id.as_u64();
        RouteDecision::from_bool(id >= self.start() && id < self.end())
    }

    fn route_acl_group(
        &self,
        _shard_count: u32,
        _shard_instance: u32,
        _group: &AclGroup,
    ) -> RouteDecision {
        // Groups live on every shard under range distribution.
        RouteDecision::Accept
    }

    fn expandable(&self) -> Option<&dyn SupportsRuntimeExpansion> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use shardsync_core::types::{AclGroupId, ChangeUnitId, RecordId, RecordStatus};

    use super::*;

    fn record(id: u64) -> Record {
        Record::new(
            RecordId::new(id),
            ChangeUnitId::new(1),
            AclGroupId::new(1),
            RecordStatus::Updated,
        )
    }

    #[test]
    fn test_window_bounds() {
        let router = DbIdRangeRouter::new(0, 100);
        assert_eq!(router.route_record(2, 0, &record(99)), RouteDecision::Accept);
        assert_eq!(router.route_record(2, 0, &record(100)), RouteDecision::Reject);
        assert_eq!(router.route_record(2, 0, &record(0)), RouteDecision::Accept);
    }

    #[test]
    fn test_expansion_widens_window() {
        let router = DbIdRangeRouter::new(0, 100);
        assert!(!router.is_expanded());
        assert_eq!(router.route_record(2, 0, &record(150)), RouteDecision::Reject);

        router.expand_to(200);
        assert!(router.is_expanded());
        assert_eq!(router.route_record(2, 0, &record(150)), RouteDecision::Accept);
    }

    #[test]
    fn test_expansion_never_shrinks() {
        let router = DbIdRangeRouter::new(0, 100);
        router.expand_to(50);
        assert!(!router.is_expanded());
        assert_eq!(router.end(), 100);
    }

    #[test]
    fn test_capability_query() {
        let router = DbIdRangeRouter::new(10, 20);
        let capability = router.expandable().expect("range router is expandable");
        assert_eq!(capability.start(), 10);
        assert_eq!(capability.end(), 20);
    }

    #[test]
    fn test_acl_groups_always_accepted() {
        let router = DbIdRangeRouter::new(0, 10);
        let group = AclGroup::new(AclGroupId::new(1), ChangeUnitId::new(1), 1);
        assert_eq!(router.route_acl_group(4, 3, &group), RouteDecision::Accept);
    }
}
