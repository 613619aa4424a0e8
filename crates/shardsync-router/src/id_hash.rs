//! Hash-mod routing on the record's own id.
//!
//! Records are distributed by hashing their id; ACL groups are duplicated on
//! every shard so any record can resolve its group locally.

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;
use crate::hashing::shard_for_id;
use crate::router::DocRouter;

/// Routes records by `hash(record id) mod shard_count`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DbIdHashRouter;

impl DbIdHashRouter {
    /// Creates the router.
    pub fn new() -> Self {
        DbIdHashRouter
    }
}

impl DocRouter for DbIdHashRouter {
    fn route_record(
        &self,
        shard_count: u32,
        shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        if shard_count <= 1 {
            return RouteDecision::Accept;
        }
        RouteDecision::from_bool(shard_for_id(record.id.as_u64(), shard_count) == shard_instance)
    }

    fn route_acl_group(
        &self,
        _shard_count: u32,
        _shard_instance: u32,
        _group: &AclGroup,
    ) -> RouteDecision {
        // Groups live on every shard under id-hash distribution.
        RouteDecision::Accept
    }
}
