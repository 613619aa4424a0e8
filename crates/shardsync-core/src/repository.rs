//! Repository-client contract.
//!
//! The trackers consume the content repository exclusively through this
//! trait. All calls are idempotent reads; transport framing, authentication
//! and encoding belong to the implementation.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AclGroup, ChangeUnit, ChangeUnitId, CommitTime, Membership, Record, StoreSelector,
};

/// Read access to the repository's change streams and record stores.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Lists change units in commit-time order (`(commit_time, id)` total
    /// order), filtered to `[since, before)` on commit time and optionally
    /// bounded by unit id. At most `limit` units are returned.
    async fn list_change_units(
        &self,
        selector: StoreSelector,
        since: Option<CommitTime>,
        since_id: Option<ChangeUnitId>,
        before: Option<CommitTime>,
        before_id: Option<ChangeUnitId>,
        limit: usize,
    ) -> Result<Vec<ChangeUnit>>;

    /// Fetches the full record set carried by the given metadata change
    /// units, up to `max` records.
    async fn fetch_records(&self, unit_ids: &[ChangeUnitId], max: usize) -> Result<Vec<Record>>;

    /// Fetches the ACL groups carried by the given ACL change units, up to
    /// `max` groups.
    async fn fetch_acl_groups(
        &self,
        unit_ids: &[ChangeUnitId],
        max: usize,
    ) -> Result<Vec<AclGroup>>;

    /// Resolves the memberships of the given ACL groups.
    async fn fetch_group_members(&self, groups: &[AclGroup]) -> Result<Vec<Membership>>;

    /// Returns the commit-time interval covered by records in the id range
    /// `[start, end)`, or None when no such records exist yet. Used by
    /// range-sharded instances to skip irrelevant history.
    async fn record_range_interval(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Option<(CommitTime, CommitTime)>>;

    /// The newest change unit in the selected stream, or None for an empty
    /// stream. Anchors the index-ahead-of-repository consistency check.
    async fn latest_change_unit(&self, selector: StoreSelector) -> Result<Option<ChangeUnit>>;
}
