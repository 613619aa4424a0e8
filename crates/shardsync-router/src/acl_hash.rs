//! Hash-mod routing keyed on the ACL group.
//!
//! Records follow their ACL group's hash, so a record and the group that
//! governs it always land on the same shard; the groups themselves are
//! distributed by the same key.

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;
use crate::hashing::shard_for_id;
use crate::router::DocRouter;

/// Routes records by `hash(acl group id) mod shard_count`, co-locating each
/// record with its ACL group.
#[derive(Clone, Copy, Debug, Default)]
pub struct AclIdHashRouter;

impl AclIdHashRouter {
    /// Creates the router.
    pub fn new() -> Self {
        AclIdHashRouter
    }
}

impl DocRouter for AclIdHashRouter {
    fn route_record(
        &self,
        shard_count: u32,
        shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        if shard_count <= 1 {
            return RouteDecision::Accept;
        }
        RouteDecision::from_bool(
            shard_for_id(record.acl_group.as_u64(), shard_count) == shard_instance,
        )
    }

    fn route_acl_group(
        &self,
        shard_count: u32,
        shard_instance: u32,
        group: &AclGroup,
    ) -> RouteDecision {
        if shard_count <= 1 {
            return RouteDecision::Accept;
        }
        RouteDecision::from_bool(shard_for_id(group.id.as_u64(), shard_count) == shard_instance)
    }
}

#[cfg(test)]
mod tests {
    use shardsync_core::types::{AclGroupId, ChangeUnitId, RecordId, RecordStatus};

    use super::*;

    fn record(id: u64, acl: u64) -> Record {
        Record::new(
            RecordId::new(id),
            ChangeUnitId::new(1),
            AclGroupId::new(acl),
            RecordStatus::Updated,
        )
    }

    #[test]
    fn test_record_follows_its_group() {
        let router = AclIdHashRouter::new();
        let group = AclGroup::new(AclGroupId::new(42), ChangeUnitId::new(1), 1);

        let group_home: Vec<u32> = (0..8)
            .filter(|&i| router.route_acl_group(8, i, &group).accepted())
            .collect();
        assert_eq!(group_home.len(), 1);

        // Any record governed by group 42 lands on the same instance.
        for record_id in [1u64, 99, 12345] {
            let record_home: Vec<u32> = (0..8)
                .filter(|&i| router.route_record(8, i, &record(record_id, 42)).accepted())
                .collect();
            assert_eq!(record_home, group_home);
        }
    }

    #[test]
    fn test_groups_do_not_overlap() {
        let router = AclIdHashRouter::new();
        for gid in 0..200u64 {
            let group = AclGroup::new(AclGroupId::new(gid), ChangeUnitId::new(1), 1);
            let homes = (0..5)
                .filter(|&i| router.route_acl_group(5, i, &group).accepted())
                .count();
            assert_eq!(homes, 1);
        }
    }
}
