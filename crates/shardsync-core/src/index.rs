//! Search-index contract.
//!
//! Everything the trackers require from the underlying index: durable
//! application of records and memberships, visibility control via
//! commit/rollback, and the scan queries that rebuild tracker state after a
//! restart or rollback. The query language and on-disk format are the
//! implementation's business.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AclGroupId, ChangeUnit, ChangeUnitId, Membership, Record, RecordId, StoreSelector,
    UncleanRecord, Watermark,
};

/// Write and scan access to the local shard's search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Applies a record mutation. `reindex` forces an overwrite even when the
    /// document appears current. The index interprets the record's status:
    /// updates upsert, deletes and non-shard deletes tombstone, non-shard
    /// updates flag the owning change unit for cascade processing.
    async fn apply_record(&self, record: &Record, reindex: bool) -> Result<()>;

    /// Applies a resolved ACL-group membership.
    async fn apply_membership(&self, membership: &Membership, reindex: bool) -> Result<()>;

    /// Indexes the change unit's own visibility document. Written after the
    /// unit's records so that a missing visibility document marks the unit
    /// for re-indexing.
    async fn apply_change_unit(
        &self,
        selector: StoreSelector,
        unit: &ChangeUnit,
        overwrite: bool,
    ) -> Result<()>;

    /// Deletes every document carried by the given change unit.
    async fn delete_by_change_unit(&self, selector: StoreSelector, id: ChangeUnitId)
        -> Result<()>;

    /// Deletes a single record's documents.
    async fn delete_by_record(&self, id: RecordId) -> Result<()>;

    /// Deletes a single ACL group's documents.
    async fn delete_by_acl_group(&self, id: AclGroupId) -> Result<()>;

    /// Re-indexes every record matched by an index query. Supports
    /// administrator-triggered repair of arbitrary document sets.
    async fn reindex_by_query(&self, query: &str) -> Result<()>;

    /// Makes all applied work durable and visible. Returns true when a new
    /// reader was opened.
    async fn commit(&self, open_new_reader: bool) -> Result<bool>;

    /// Discards all work applied since the last commit.
    async fn rollback(&self) -> Result<()>;

    /// The newest change-unit watermark durably present in the index, or
    /// None for an empty index.
    async fn max_indexed_watermark(&self, selector: StoreSelector) -> Result<Option<Watermark>>;

    /// Number of visibility documents indexed for the given change unit.
    /// Zero means missing; more than one indicates a self-healing duplicate.
    async fn change_unit_count(&self, selector: StoreSelector, id: ChangeUnitId) -> Result<usize>;

    /// A bounded page of records whose derived content is pending or stale.
    async fn unclean_content_page(&self, limit: usize) -> Result<Vec<UncleanRecord>>;

    /// Refreshes one record's derived content representation.
    async fn refresh_content(&self, record: &UncleanRecord) -> Result<()>;

    /// Change units flagged for cascade processing, oldest first.
    async fn cascade_candidates(&self, limit: usize) -> Result<Vec<ChangeUnit>>;

    /// Records depending on the given units' cascading updates.
    async fn cascade_dependents(&self, unit_ids: &[ChangeUnitId]) -> Result<Vec<Record>>;

    /// Re-evaluates one dependent record's shard-relevant derived state.
    async fn apply_cascade(&self, record: &Record) -> Result<()>;

    /// Clears a change unit's cascade flag once its dependents are done.
    async fn mark_cascade_applied(&self, unit: &ChangeUnit) -> Result<()>;

    /// The highest record id this shard has been told it may own, when the
    /// cluster has assigned one. Drives runtime range-router expansion.
    async fn index_cap(&self) -> Result<Option<u64>>;

    /// Number of currently open index readers.
    async fn live_reader_count(&self) -> Result<usize>;
}
