//! In-memory repository and index.
//!
//! Full in-process implementations of the collaborator contracts, with real
//! commit/rollback staging and failure injection. Unit tests across the
//! workspace run against these; embedders can use them for single-process
//! deployments and integration harnesses.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, SyncError};
use crate::index::SearchIndex;
use crate::repository::RepositoryClient;
use crate::types::{
    AclGroup, AclGroupId, ChangeUnit, ChangeUnitId, CommitTime, Membership, Record, RecordId,
    RecordStatus, StoreSelector, UncleanRecord, Watermark,
};

#[derive(Default)]
struct RepoInner {
    metadata: BTreeMap<Watermark, ChangeUnit>,
    acl: BTreeMap<Watermark, ChangeUnit>,
    records: HashMap<ChangeUnitId, Vec<Record>>,
    groups: HashMap<ChangeUnitId, Vec<AclGroup>>,
    members: HashMap<AclGroupId, Membership>,
    fail_next: Option<String>,
}

impl RepoInner {
    fn stream(&self, selector: StoreSelector) -> &BTreeMap<Watermark, ChangeUnit> {
        match selector {
            StoreSelector::Metadata => &self.metadata,
            StoreSelector::Acl => &self.acl,
        }
    }

    fn stream_mut(&mut self, selector: StoreSelector) -> &mut BTreeMap<Watermark, ChangeUnit> {
        match selector {
            StoreSelector::Metadata => &mut self.metadata,
            StoreSelector::Acl => &mut self.acl,
        }
    }

    fn take_failure(&mut self) -> Result<()> {
        match self.fail_next.take() {
            Some(reason) => Err(SyncError::Transport { reason }),
            None => Ok(()),
        }
    }
}

/// In-memory change-stream repository.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<RepoInner>>,
}

impl MemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a change unit to the selected stream.
    pub fn push_unit(&self, selector: StoreSelector, unit: ChangeUnit) {
        let mut inner = self.inner.lock();
        inner.stream_mut(selector).insert(unit.watermark(), unit);
    }

    /// Appends a metadata change unit together with its record set.
    pub fn push_metadata_unit(&self, unit: ChangeUnit, records: Vec<Record>) {
        let mut inner = self.inner.lock();
        inner.records.insert(unit.id, records);
        inner.metadata.insert(unit.watermark(), unit);
    }

    /// Appends an ACL change unit together with its group set.
    pub fn push_acl_unit(&self, unit: ChangeUnit, groups: Vec<AclGroup>) {
        let mut inner = self.inner.lock();
        inner.groups.insert(unit.id, groups);
        inner.acl.insert(unit.watermark(), unit);
    }

    /// Registers the resolved membership of an ACL group.
    pub fn set_membership(&self, membership: Membership) {
        self.inner.lock().members.insert(membership.group, membership);
    }

    /// Makes the next repository call fail with a transport error.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next = Some(reason.into());
    }

    /// Highest watermark in the selected stream, if any.
    pub fn max_watermark(&self, selector: StoreSelector) -> Option<Watermark> {
        let inner = self.inner.lock();
        inner.stream(selector).keys().next_back().copied()
    }
}

#[async_trait]
impl RepositoryClient for MemoryRepository {
    async fn list_change_units(
        &self,
        selector: StoreSelector,
        since: Option<CommitTime>,
        since_id: Option<ChangeUnitId>,
        before: Option<CommitTime>,
        before_id: Option<ChangeUnitId>,
        limit: usize,
    ) -> Result<Vec<ChangeUnit>> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;
        let units = inner
            .stream(selector)
            .values()
            .filter(|u| since.is_none_or(|t| u.commit_time >= t))
            .filter(|u| before.is_none_or(|t| u.commit_time < t))
            .filter(|u| since_id.is_none_or(|id| u.id >= id))
            .filter(|u| before_id.is_none_or(|id| u.id < id))
            .take(limit)
            .cloned()
            .collect();
        Ok(units)
    }

    async fn fetch_records(&self, unit_ids: &[ChangeUnitId], max: usize) -> Result<Vec<Record>> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;
        let mut out = Vec::new();
        for id in unit_ids {
            if let Some(records) = inner.records.get(id) {
                out.extend(records.iter().cloned());
            }
        }
        out.truncate(max);
        Ok(out)
    }

    async fn fetch_acl_groups(
        &self,
        unit_ids: &[ChangeUnitId],
        max: usize,
    ) -> Result<Vec<AclGroup>> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;
        let mut out = Vec::new();
        for id in unit_ids {
            if let Some(groups) = inner.groups.get(id) {
                out.extend(groups.iter().cloned());
            }
        }
        out.truncate(max);
        Ok(out)
    }

    async fn fetch_group_members(&self, groups: &[AclGroup]) -> Result<Vec<Membership>> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;
        Ok(groups
            .iter()
            .map(|g| {
                inner.members.get(&g.id).cloned().unwrap_or(Membership {
                    group: g.id,
                    readers: Vec::new(),
                    denied: Vec::new(),
                })
            })
            .collect())
    }

    async fn latest_change_unit(&self, selector: StoreSelector) -> Result<Option<ChangeUnit>> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;
        Ok(inner.stream(selector).values().next_back().cloned())
    }

    async fn record_range_interval(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Option<(CommitTime, CommitTime)>> {
        let mut inner = self.inner.lock();
        inner.take_failure()?;

        let unit_times: HashMap<ChangeUnitId, CommitTime> = inner
            .metadata
            .values()
            .map(|u| (u.id, u.commit_time))
            .collect();

        let mut interval: Option<(CommitTime, CommitTime)> = None;
        for records in inner.records.values() {
            for record in records {
                let id = record.id.as_u64();
                if id < start || id >= end {
                    continue;
                }
                let Some(&time) = unit_times.get(&record.change_unit_id) else {
                    continue;
                };
                interval = Some(match interval {
                    None => (time, time),
                    Some((lo, hi)) => (lo.min(time), hi.max(time)),
                });
            }
        }
        Ok(interval)
    }
}

#[derive(Clone, Default)]
struct Docs {
    records: HashMap<RecordId, Record>,
    memberships: HashMap<AclGroupId, Membership>,
    units: HashMap<(StoreSelector, ChangeUnitId), (ChangeUnit, usize)>,
    unclean: BTreeMap<RecordId, UncleanRecord>,
    cascade_flags: HashSet<ChangeUnitId>,
}

#[derive(Default)]
struct IndexInner {
    live: Docs,
    committed: Docs,
    dependents: HashMap<ChangeUnitId, Vec<Record>>,
    index_cap: Option<u64>,
    readers: usize,
    fail_next_apply: Option<String>,
    commits: u64,
    rollbacks: u64,
    cascades_applied: u64,
    refreshed: u64,
    query_reindexes: Vec<String>,
}

impl IndexInner {
    fn take_apply_failure(&mut self) -> Result<()> {
        match self.fail_next_apply.take() {
            Some(reason) => Err(SyncError::Index(reason)),
            None => Ok(()),
        }
    }
}

/// In-memory search index with commit/rollback staging.
///
/// Applied work lands in a live document set; `commit` snapshots it and
/// `rollback` restores the snapshot, so the durable watermark behaves like a
/// real index across the coordinator's rollback protocol.
#[derive(Clone, Default)]
pub struct MemoryIndex {
    inner: Arc<Mutex<IndexInner>>,
}

impl MemoryIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next apply call fail with an index error.
    pub fn fail_next_apply(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next_apply = Some(reason.into());
    }

    /// Registers the dependent-record set cascaded from a change unit.
    pub fn set_dependents(&self, unit_id: ChangeUnitId, dependents: Vec<Record>) {
        self.inner.lock().dependents.insert(unit_id, dependents);
    }

    /// Sets the cluster-assigned index cap.
    pub fn set_index_cap(&self, cap: Option<u64>) {
        self.inner.lock().index_cap = cap;
    }

    /// Writes an extra copy of a unit's visibility document, simulating the
    /// duplicate state the startup consistency check tolerates.
    pub fn inject_duplicate_unit(&self, selector: StoreSelector, id: ChangeUnitId) {
        let mut inner = self.inner.lock();
        if let Some((_, copies)) = inner.live.units.get_mut(&(selector, id)) {
            *copies += 1;
        }
    }

    /// True when the record is present in the live document set.
    pub fn has_record(&self, id: RecordId) -> bool {
        self.inner.lock().live.records.contains_key(&id)
    }

    /// Live record count.
    pub fn record_count(&self) -> usize {
        self.inner.lock().live.records.len()
    }

    /// Committed record count.
    pub fn committed_record_count(&self) -> usize {
        self.inner.lock().committed.records.len()
    }

    /// Live membership for a group.
    pub fn membership(&self, id: AclGroupId) -> Option<Membership> {
        self.inner.lock().live.memberships.get(&id).cloned()
    }

    /// Number of commits performed.
    pub fn commit_count(&self) -> u64 {
        self.inner.lock().commits
    }

    /// Number of rollbacks performed.
    pub fn rollback_count(&self) -> u64 {
        self.inner.lock().rollbacks
    }

    /// Number of cascade applications performed.
    pub fn cascades_applied(&self) -> u64 {
        self.inner.lock().cascades_applied
    }

    /// Number of content refreshes performed.
    pub fn refreshed_count(&self) -> u64 {
        self.inner.lock().refreshed
    }

    /// Number of records currently awaiting a content refresh.
    pub fn unclean_count(&self) -> usize {
        self.inner.lock().live.unclean.len()
    }

    /// Queries passed to `reindex_by_query`, in call order.
    pub fn query_reindexes(&self) -> Vec<String> {
        self.inner.lock().query_reindexes.clone()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn apply_record(&self, record: &Record, _reindex: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_apply_failure()?;
        match record.status {
            RecordStatus::Updated | RecordStatus::Unknown => {
                let tenant = record
                    .properties
                    .get("tenant")
                    .cloned()
                    .unwrap_or_else(|| "default".to_string());
                inner.live.unclean.insert(
                    record.id,
                    UncleanRecord {
                        id: record.id,
                        tenant,
                    },
                );
                inner.live.records.insert(record.id, record.clone());
            }
            RecordStatus::Deleted | RecordStatus::NonShardDeleted => {
                inner.live.records.remove(&record.id);
                inner.live.unclean.remove(&record.id);
            }
            RecordStatus::NonShardUpdated => {
                inner.live.cascade_flags.insert(record.change_unit_id);
            }
        }
        Ok(())
    }

    async fn apply_membership(&self, membership: &Membership, _reindex: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_apply_failure()?;
        inner
            .live
            .memberships
            .insert(membership.group, membership.clone());
        Ok(())
    }

    async fn apply_change_unit(
        &self,
        selector: StoreSelector,
        unit: &ChangeUnit,
        _overwrite: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_apply_failure()?;
        inner
            .live
            .units
            .insert((selector, unit.id), (unit.clone(), 1));
        Ok(())
    }

    async fn delete_by_change_unit(
        &self,
        selector: StoreSelector,
        id: ChangeUnitId,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.live.units.remove(&(selector, id));
        inner.live.cascade_flags.remove(&id);
        inner.live.records.retain(|_, r| r.change_unit_id != id);
        let kept: HashSet<RecordId> = inner.live.records.keys().copied().collect();
        inner.live.unclean.retain(|rid, _| kept.contains(rid));
        Ok(())
    }

    async fn delete_by_record(&self, id: RecordId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.live.records.remove(&id);
        inner.live.unclean.remove(&id);
        Ok(())
    }

    async fn delete_by_acl_group(&self, id: AclGroupId) -> Result<()> {
        self.inner.lock().live.memberships.remove(&id);
        Ok(())
    }

    async fn reindex_by_query(&self, query: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_apply_failure()?;
        inner.query_reindexes.push(query.to_string());
        Ok(())
    }

    async fn commit(&self, open_new_reader: bool) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.committed = inner.live.clone();
        inner.commits += 1;
        if open_new_reader {
            inner.readers += 1;
        }
        tracing::debug!(open_new_reader, "memory index committed");
        Ok(open_new_reader)
    }

    async fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.live = inner.committed.clone();
        inner.rollbacks += 1;
        tracing::debug!("memory index rolled back to last commit");
        Ok(())
    }

    async fn max_indexed_watermark(&self, selector: StoreSelector) -> Result<Option<Watermark>> {
        let inner = self.inner.lock();
        Ok(inner
            .committed
            .units
            .iter()
            .filter(|((s, _), _)| *s == selector)
            .map(|(_, (unit, _))| unit.watermark())
            .max())
    }

    async fn change_unit_count(&self, selector: StoreSelector, id: ChangeUnitId) -> Result<usize> {
        let inner = self.inner.lock();
        Ok(inner
            .live
            .units
            .get(&(selector, id))
            .map(|(_, copies)| *copies)
            .unwrap_or(0))
    }

    async fn unclean_content_page(&self, limit: usize) -> Result<Vec<UncleanRecord>> {
        let inner = self.inner.lock();
        Ok(inner.live.unclean.values().take(limit).cloned().collect())
    }

    async fn refresh_content(&self, record: &UncleanRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_apply_failure()?;
        inner.live.unclean.remove(&record.id);
        inner.refreshed += 1;
        Ok(())
    }

    async fn cascade_candidates(&self, limit: usize) -> Result<Vec<ChangeUnit>> {
        let inner = self.inner.lock();
        let mut units: Vec<ChangeUnit> = inner
            .live
            .units
            .iter()
            .filter(|((s, id), _)| *s == StoreSelector::Metadata && inner.live.cascade_flags.contains(id))
            .map(|(_, (unit, _))| unit.clone())
            .collect();
        units.sort_by_key(ChangeUnit::watermark);
        units.truncate(limit);
        Ok(units)
    }

    async fn cascade_dependents(&self, unit_ids: &[ChangeUnitId]) -> Result<Vec<Record>> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for id in unit_ids {
            if let Some(dependents) = inner.dependents.get(id) {
                out.extend(dependents.iter().cloned());
            }
        }
        Ok(out)
    }

    async fn apply_cascade(&self, record: &Record) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_apply_failure()?;
        inner.live.records.insert(record.id, record.clone());
        inner.cascades_applied += 1;
        Ok(())
    }

    async fn mark_cascade_applied(&self, unit: &ChangeUnit) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.live.cascade_flags.remove(&unit.id);
        Ok(())
    }

    async fn index_cap(&self) -> Result<Option<u64>> {
        Ok(self.inner.lock().index_cap)
    }

    async fn live_reader_count(&self) -> Result<usize> {
        Ok(self.inner.lock().readers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: u64, time: u64) -> ChangeUnit {
        ChangeUnit::new(
            ChangeUnitId::new(id),
            CommitTime::from_millis(time),
            1,
            0,
        )
    }

    fn record(id: u64, unit_id: u64, status: RecordStatus) -> Record {
        Record::new(
            RecordId::new(id),
            ChangeUnitId::new(unit_id),
            AclGroupId::new(1),
            status,
        )
    }

    #[tokio::test]
    async fn test_list_change_units_window() {
        let repo = MemoryRepository::new();
        repo.push_unit(StoreSelector::Metadata, unit(1, 100));
        repo.push_unit(StoreSelector::Metadata, unit(2, 200));
        repo.push_unit(StoreSelector::Metadata, unit(3, 300));

        let units = repo
            .list_change_units(
                StoreSelector::Metadata,
                Some(CommitTime::from_millis(100)),
                None,
                Some(CommitTime::from_millis(300)),
                None,
                10,
            )
            .await
            .unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, ChangeUnitId::new(1));
        assert_eq!(units[1].id, ChangeUnitId::new(2));
    }

    #[tokio::test]
    async fn test_list_change_units_orders_equal_commit_times_by_id() {
        let repo = MemoryRepository::new();
        repo.push_unit(StoreSelector::Metadata, unit(6, 100));
        repo.push_unit(StoreSelector::Metadata, unit(5, 100));

        let units = repo
            .list_change_units(StoreSelector::Metadata, None, None, None, None, 10)
            .await
            .unwrap();
        assert_eq!(units[0].id, ChangeUnitId::new(5));
        assert_eq!(units[1].id, ChangeUnitId::new(6));
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let repo = MemoryRepository::new();
        repo.fail_next("socket closed");
        let err = repo
            .list_change_units(StoreSelector::Metadata, None, None, None, None, 1)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        assert!(repo
            .list_change_units(StoreSelector::Metadata, None, None, None, None, 1)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_apply_and_commit_rollback_staging() {
        let index = MemoryIndex::new();
        index
            .apply_record(&record(1, 1, RecordStatus::Updated), false)
            .await
            .unwrap();
        assert_eq!(index.record_count(), 1);
        assert_eq!(index.committed_record_count(), 0);

        index.commit(false).await.unwrap();
        assert_eq!(index.committed_record_count(), 1);

        index
            .apply_record(&record(2, 2, RecordStatus::Updated), false)
            .await
            .unwrap();
        index.rollback().await.unwrap();
        assert_eq!(index.record_count(), 1);
        assert!(!index.has_record(RecordId::new(2)));
    }

    #[tokio::test]
    async fn test_delete_statuses_tombstone() {
        let index = MemoryIndex::new();
        index
            .apply_record(&record(1, 1, RecordStatus::Updated), false)
            .await
            .unwrap();
        index
            .apply_record(&record(1, 2, RecordStatus::NonShardDeleted), false)
            .await
            .unwrap();
        assert_eq!(index.record_count(), 0);
        assert_eq!(index.unclean_count(), 0);
    }

    #[tokio::test]
    async fn test_non_shard_update_flags_cascade() {
        let index = MemoryIndex::new();
        index
            .apply_change_unit(StoreSelector::Metadata, &unit(3, 100), true)
            .await
            .unwrap();
        index
            .apply_record(&record(1, 3, RecordStatus::NonShardUpdated), false)
            .await
            .unwrap();

        let candidates = index.cascade_candidates(10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, ChangeUnitId::new(3));

        index.mark_cascade_applied(&candidates[0]).await.unwrap();
        assert!(index.cascade_candidates(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_indexed_watermark_reads_committed_state() {
        let index = MemoryIndex::new();
        index
            .apply_change_unit(StoreSelector::Metadata, &unit(1, 100), true)
            .await
            .unwrap();
        assert_eq!(
            index
                .max_indexed_watermark(StoreSelector::Metadata)
                .await
                .unwrap(),
            None
        );

        index.commit(false).await.unwrap();
        let max = index
            .max_indexed_watermark(StoreSelector::Metadata)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(max.id, ChangeUnitId::new(1));
    }

    #[tokio::test]
    async fn test_unclean_page_and_refresh() {
        let index = MemoryIndex::new();
        for i in 0..5 {
            index
                .apply_record(&record(i, 1, RecordStatus::Updated), false)
                .await
                .unwrap();
        }
        let page = index.unclean_content_page(3).await.unwrap();
        assert_eq!(page.len(), 3);

        for entry in &page {
            index.refresh_content(entry).await.unwrap();
        }
        assert_eq!(index.unclean_count(), 2);
        assert_eq!(index.refreshed_count(), 3);
    }

    #[tokio::test]
    async fn test_record_range_interval() {
        let repo = MemoryRepository::new();
        repo.push_metadata_unit(unit(1, 100), vec![record(10, 1, RecordStatus::Updated)]);
        repo.push_metadata_unit(unit(2, 300), vec![record(50, 2, RecordStatus::Updated)]);
        repo.push_metadata_unit(unit(3, 500), vec![record(90, 3, RecordStatus::Updated)]);

        let interval = repo.record_range_interval(0, 60).await.unwrap().unwrap();
        assert_eq!(interval.0, CommitTime::from_millis(100));
        assert_eq!(interval.1, CommitTime::from_millis(300));

        assert!(repo.record_range_interval(1000, 2000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_unit_count() {
        let index = MemoryIndex::new();
        index
            .apply_change_unit(StoreSelector::Acl, &unit(7, 100), true)
            .await
            .unwrap();
        index.inject_duplicate_unit(StoreSelector::Acl, ChangeUnitId::new(7));
        assert_eq!(
            index
                .change_unit_count(StoreSelector::Acl, ChangeUnitId::new(7))
                .await
                .unwrap(),
            2
        );
    }
}
