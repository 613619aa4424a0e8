//! Explicit shard-id routing.
//!
//! Both variants accept a record iff a precomputed owning-shard value equals
//! the local instance. The static variant reads the repository-assigned slot
//! carried on every record; the dynamic variant reads a configured record
//! property that may legitimately be absent, in which case the decision is
//! indeterminate and a composed fallback decides.

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;
use crate::router::DocRouter;

/// Routes by the repository-assigned owning-shard slot on the record.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticShardRouter;

impl StaticShardRouter {
    /// Creates the router.
    pub fn new() -> Self {
        StaticShardRouter
    }
}

impl DocRouter for StaticShardRouter {
    fn route_record(
        &self,
        _shard_count: u32,
        shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        match record.owning_shard {
            Some(shard) => RouteDecision::from_bool(shard == shard_instance),
            None => RouteDecision::Reject,
        }
    }

    fn route_acl_group(
        &self,
        _shard_count: u32,
        _shard_instance: u32,
        _group: &AclGroup,
    ) -> RouteDecision {
        RouteDecision::Accept
    }
}

/// Routes by a configured record property holding the owning shard number.
/// Records without the property (or with an unparsable value) are
/// indeterminate.
#[derive(Clone, Debug)]
pub struct DynamicShardRouter {
    property: String,
}

impl DynamicShardRouter {
    /// Creates the router reading `property` from each record.
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
        }
    }
}

impl DocRouter for DynamicShardRouter {
    fn route_record(
        &self,
        _shard_count: u32,
        shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        match record
            .properties
            .get(&self.property)
            .and_then(|v| v.parse::<u32>().ok())
        {
            Some(shard) => RouteDecision::from_bool(shard == shard_instance),
            None => RouteDecision::Indeterminate,
        }
    }

    fn route_acl_group(
        &self,
        _shard_count: u32,
        _shard_instance: u32,
        _group: &AclGroup,
    ) -> RouteDecision {
        RouteDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use shardsync_core::types::{AclGroupId, ChangeUnitId, RecordId, RecordStatus};

    use super::*;

    fn record() -> Record {
        Record::new(
            RecordId::new(1),
            ChangeUnitId::new(1),
            AclGroupId::new(1),
            RecordStatus::Updated,
        )
    }

    #[test]
    fn test_static_matches_assigned_slot() {
        let router = StaticShardRouter::new();
        let mut r = record();
        r.owning_shard = Some(3);
        assert_eq!(router.route_record(4, 3, &r), RouteDecision::Accept);
        assert_eq!(router.route_record(4, 2, &r), RouteDecision::Reject);
    }

    #[test]
    fn test_static_without_slot_rejects() {
        let router = StaticShardRouter::new();
        assert_eq!(router.route_record(4, 0, &record()), RouteDecision::Reject);
    }

    #[test]
    fn test_dynamic_reads_property() {
        let router = DynamicShardRouter::new("shard");
        let r = record().with_property("shard", "2");
        assert_eq!(router.route_record(4, 2, &r), RouteDecision::Accept);
        assert_eq!(router.route_record(4, 1, &r), RouteDecision::Reject);
    }

    #[test]
    fn test_dynamic_missing_property_is_indeterminate() {
        let router = DynamicShardRouter::new("shard");
        assert_eq!(
            router.route_record(4, 0, &record()),
            RouteDecision::Indeterminate
        );
    }

    #[test]
    fn test_dynamic_unparsable_property_is_indeterminate() {
        let router = DynamicShardRouter::new("shard");
        let r = record().with_property("shard", "not-a-number");
        assert_eq!(router.route_record(4, 0, &r), RouteDecision::Indeterminate);
    }
}
