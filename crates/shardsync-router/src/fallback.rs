//! Fallback composition of two routers.

use std::sync::Arc;

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;
use crate::router::{DocRouter, SupportsRuntimeExpansion};

/// Wraps a primary and a secondary strategy; the secondary decides only when
/// the primary is indeterminate.
pub struct FallbackRouter {
    primary: Arc<dyn DocRouter>,
    secondary: Arc<dyn DocRouter>,
}

impl FallbackRouter {
    /// Composes `primary` with `secondary`.
    pub fn new(primary: Arc<dyn DocRouter>, secondary: Arc<dyn DocRouter>) -> Self {
        Self { primary, secondary }
    }
}

impl DocRouter for FallbackRouter {
    fn route_record(
        &self,
        shard_count: u32,
        shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        match self.primary.route_record(shard_count, shard_instance, record) {
            RouteDecision::Indeterminate => {
                self.secondary.route_record(shard_count, shard_instance, record)
            }
            definite => definite,
        }
    }

    fn route_acl_group(
        &self,
        shard_count: u32,
        shard_instance: u32,
        group: &AclGroup,
    ) -> RouteDecision {
        match self.primary.route_acl_group(shard_count, shard_instance, group) {
            RouteDecision::Indeterminate => {
                self.secondary.route_acl_group(shard_count, shard_instance, group)
            }
            definite => definite,
        }
    }

    fn expandable(&self) -> Option<&dyn SupportsRuntimeExpansion> {
        self.primary
            .expandable()
            .or_else(|| self.secondary.expandable())
    }
}

#[cfg(test)]
mod tests {
    use shardsync_core::types::{AclGroupId, ChangeUnitId, RecordId, RecordStatus};

    use super::*;
    use crate::explicit::DynamicShardRouter;
    use crate::id_hash::DbIdHashRouter;

    fn record(id: u64) -> Record {
        Record::new(
            RecordId::new(id),
            ChangeUnitId::new(1),
            AclGroupId::new(1),
            RecordStatus::Updated,
        )
    }

    #[test]
    fn test_definite_primary_wins() {
        let composed = FallbackRouter::new(
            Arc::new(DynamicShardRouter::new("shard")),
            Arc::new(DbIdHashRouter::new()),
        );
        let r = record(1).with_property("shard", "2");
        assert_eq!(composed.route_record(4, 2, &r), RouteDecision::Accept);
        assert_eq!(composed.route_record(4, 0, &r), RouteDecision::Reject);
    }

    #[test]
    fn test_indeterminate_primary_defers_to_secondary() {
        let secondary = Arc::new(DbIdHashRouter::new());
        let composed = FallbackRouter::new(
            Arc::new(DynamicShardRouter::new("shard")),
            secondary.clone(),
        );
        let r = record(77);
        for instance in 0..4 {
            assert_eq!(
                composed.route_record(4, instance, &r),
                secondary.route_record(4, instance, &r)
            );
        }
    }

    #[test]
    fn test_expandable_delegates_to_primary() {
        use crate::range::DbIdRangeRouter;

        let composed = FallbackRouter::new(
            Arc::new(DbIdRangeRouter::new(0, 10)),
            Arc::new(DbIdHashRouter::new()),
        );
        assert!(composed.expandable().is_some());

        let plain = FallbackRouter::new(
            Arc::new(DbIdHashRouter::new()),
            Arc::new(DbIdHashRouter::new()),
        );
        assert!(plain.expandable().is_none());
    }
}
