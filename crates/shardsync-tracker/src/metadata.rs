//! The metadata change-pull engine.
//!
//! Keeps the index's view of content records current with the repository's
//! metadata transaction stream: exactly once per change unit, tolerant of
//! re-delivery. Per cycle it drains administrator maintenance work, then
//! pulls change units in commit-time order, fetches their record sets,
//! routes each record to decide local ownership, and fans the applies out
//! over a bounded worker pool. The durable watermark advances only after a
//! batch's workers have all completed.

use std::sync::Arc;

use shardsync_core::config::TrackerConfig;
use shardsync_core::error::Result;
use shardsync_core::index::SearchIndex;
use shardsync_core::repository::RepositoryClient;
use shardsync_core::shutdown::ShutdownFlag;
use shardsync_core::types::{
    AclGroupId, ChangeUnit, ChangeUnitId, Record, RecordId, RecordStatus, StoreSelector,
};
use shardsync_router::DocRouter;

use crate::clock::Clock;
use crate::consistency::{check_repo_and_index_consistency, FirstCheckFloor};
use crate::cycle::{CycleRunner, RollbackCell, TrackerType};
use crate::found::FoundWindow;
use crate::locks::TrackerLocks;
use crate::maintenance::MaintenanceQueues;
use crate::pull::{batch_by_work_size, pull_next_window};
use crate::state::{TrackerState, TrackerStateSnapshot};
use crate::workers::{first_failure, run_bounded};

/// Tracks the metadata transaction stream.
pub struct MetadataTracker {
    config: TrackerConfig,
    client: Arc<dyn RepositoryClient>,
    index: Arc<dyn SearchIndex>,
    router: Arc<dyn DocRouter>,
    runner: CycleRunner,
    maintenance: Arc<MaintenanceQueues>,
}

impl MetadataTracker {
    /// Creates the tracker for one core.
    pub fn new(
        core_name: &str,
        config: TrackerConfig,
        client: Arc<dyn RepositoryClient>,
        index: Arc<dyn SearchIndex>,
        router: Arc<dyn DocRouter>,
        shutdown: ShutdownFlag,
        clock: Clock,
    ) -> Self {
        let runner = CycleRunner::new(
            core_name,
            TrackerType::Metadata,
            Arc::new(TrackerLocks::new()),
            Arc::clone(&index),
            StoreSelector::Metadata,
            config.hole_retention_ms,
            shutdown,
            clock,
        );
        Self {
            config,
            client,
            index,
            router,
            runner,
            maintenance: Arc::new(MaintenanceQueues::new()),
        }
    }

    /// One scheduled tracking invocation.
    pub async fn track(&self) {
        self.runner.run(self.do_track()).await;
    }

    async fn do_track(&self) -> Result<()> {
        self.runner.shutdown().check()?;
        self.expand_router_if_capped().await?;

        {
            let _write = self.runner.locks().write().await;
            let mut state = self.runner.reload_state().await?;
            // One-shot per state lifetime, but re-attempted until both
            // flags are set (a transport failure must not skip the check
            // for good).
            if state.tracker_cycles == 0
                || !(state.checked_first_unit && state.checked_last_unit)
            {
                let floor = self.first_check_floor().await?;
                check_repo_and_index_consistency(
                    self.client.as_ref(),
                    self.index.as_ref(),
                    StoreSelector::Metadata,
                    &self.config,
                    &mut state,
                    floor,
                )
                .await?;
                self.runner.store_state(&state);
            }
            self.run_maintenance().await?;
        }

        self.runner.shutdown().check()?;
        self.track_stream().await
    }

    /// Widens an expandable router when the cluster has raised this shard's
    /// index cap since the last cycle.
    async fn expand_router_if_capped(&self) -> Result<()> {
        let Some(expandable) = self.router.expandable() else {
            return Ok(());
        };
        if let Some(cap) = self.index.index_cap().await? {
            if cap > expandable.end() {
                expandable.expand_to(cap);
            }
        }
        Ok(())
    }

    async fn first_check_floor(&self) -> Result<FirstCheckFloor> {
        let Some(expandable) = self.router.expandable() else {
            return Ok(FirstCheckFloor::Default);
        };
        // On range-sharded instances the first indexed unit can be later
        // than the repository's first unit; anchor the check at the earliest
        // unit carrying records in range.
        match self
            .client
            .record_range_interval(expandable.start(), expandable.end())
            .await?
        {
            Some((floor, _)) => Ok(FirstCheckFloor::From(floor)),
            None => Ok(FirstCheckFloor::Skip),
        }
    }

    /// The pull-and-batch loop.
    async fn track_stream(&self) -> Result<()> {
        let cfg = &self.config;
        let mut found = FoundWindow::new(cfg.found_window_size);
        let mut total_applied = 0usize;

        loop {
            self.runner.shutdown().check()?;
            let _write = self.runner.locks().write().await;
            // The coordinator may have rolled back and invalidated the
            // state since the last iteration.
            let mut state = self.runner.reload_state().await?;

            let from = found
                .last()
                .map(|unit| unit.commit_time)
                .unwrap_or(state.last_good_commit_time_in_index);

            let units = pull_next_window(
                self.client.as_ref(),
                StoreSelector::Metadata,
                &found,
                from,
                cfg.time_step_ms,
                cfg.max_units_per_pull,
                state.time_to_stop_indexing,
            )
            .await?;

            if units.is_empty() {
                tracing::debug!(from = %from, "no further change units this cycle");
                break;
            }
            // Never run past the cycle's snapshot bound; the remainder is
            // picked up next cycle with hole retention re-covering it.
            if units
                .iter()
                .any(|unit| unit.commit_time > state.time_to_stop_indexing)
            {
                tracing::debug!(
                    stop = %state.time_to_stop_indexing,
                    "change units beyond the stop bound, ending cycle"
                );
                break;
            }

            let mut eligible = Vec::new();
            for unit in &units {
                found.add(unit.clone());
                if !self.is_unit_indexed(&state, unit).await {
                    eligible.push(unit.clone());
                }
            }

            for batch in batch_by_work_size(eligible, cfg.batch_doc_threshold) {
                self.runner.shutdown().check()?;
                total_applied += self.apply_unit_batch(&batch).await?;

                // Visibility documents after the records, then the ordered
                // watermark advance.
                for unit in &batch {
                    self.index
                        .apply_change_unit(StoreSelector::Metadata, unit, true)
                        .await?;
                    state.last_indexed.advance_to(unit.watermark());
                }
            }

            if let Some(max) = units.iter().map(ChangeUnit::watermark).max() {
                state.last_on_server.advance_to(max);
            }
            self.runner.store_state(&state);
        }

        tracing::info!(total_applied, "metadata tracking cycle complete");
        Ok(())
    }

    /// Skip detection for units hole retention re-visits. On a failed index
    /// lookup the unit is treated as novel; applying it again is safe.
    async fn is_unit_indexed(&self, state: &TrackerState, unit: &ChangeUnit) -> bool {
        if unit.commit_time > state.last_indexed.commit_time {
            return false;
        }
        match self
            .index
            .change_unit_count(StoreSelector::Metadata, unit.id)
            .await
        {
            Ok(count) => count > 0,
            Err(error) => {
                tracing::warn!(unit = %unit.id, %error, "failed to check unit presence in index");
                false
            }
        }
    }

    /// Fetches a batch's record sets and applies them through the bounded
    /// worker pool. A worker failure fails the batch; the caller's cycle
    /// aborts before advancing the watermark.
    async fn apply_unit_batch(&self, batch: &[ChangeUnit]) -> Result<usize> {
        let ids: Vec<ChangeUnitId> = batch
            .iter()
            .filter(|unit| unit.work_size() > 0)
            .map(|unit| unit.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let records = self.client.fetch_records(&ids, usize::MAX).await?;
        let applied = records.len();
        let chunks: Vec<Vec<Record>> = records
            .chunks(self.config.record_batch_size.max(1))
            .map(<[Record]>::to_vec)
            .collect();

        let results = run_bounded(self.config.max_parallelism, chunks, |chunk| {
            let index = Arc::clone(&self.index);
            let router = Arc::clone(&self.router);
            let shutdown = self.runner.shutdown().clone();
            let shard_count = self.config.shard_count;
            let shard_instance = self.config.shard_instance;
            let cascade_enabled = self.config.cascade_tracking_enabled;
            async move {
                shutdown.check()?;
                for record in
                    route_records(router.as_ref(), shard_count, shard_instance, cascade_enabled, &chunk)
                {
                    index.apply_record(&record, true).await?;
                }
                Ok(())
            }
        })
        .await;
        first_failure(results)?;
        Ok(applied)
    }

    /// Drains the maintenance queues. The caller holds the write lock.
    pub(crate) async fn run_maintenance(&self) -> Result<()> {
        self.purge_units().await?;
        self.purge_records().await?;
        self.reindex_units().await?;
        self.reindex_records().await?;
        self.reindex_queries().await?;
        self.index_units().await?;
        self.index_records().await?;
        Ok(())
    }

    async fn purge_units(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_unit_to_purge() {
            self.runner.shutdown().check()?;
            let id = ChangeUnitId::new(id);
            self.index
                .delete_by_change_unit(StoreSelector::Metadata, id)
                .await?;
            tracing::info!(unit = %id, "purge action: change unit purged");
        }
        Ok(())
    }

    async fn purge_records(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_record_to_purge() {
            self.runner.shutdown().check()?;
            let id = RecordId::new(id);
            self.index.delete_by_record(id).await?;
            tracing::info!(record = %id, "purge action: record purged");
        }
        Ok(())
    }

    async fn reindex_units(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_unit_to_reindex() {
            self.runner.shutdown().check()?;
            let id = ChangeUnitId::new(id);
            // Clean out first so deletes are not missed.
            self.index
                .delete_by_change_unit(StoreSelector::Metadata, id)
                .await?;
            match self.fetch_unit_by_id(id).await? {
                Some(unit) => {
                    let records = self.client.fetch_records(&[unit.id], usize::MAX).await?;
                    for record in route_records(
                        self.router.as_ref(),
                        self.config.shard_count,
                        self.config.shard_instance,
                        self.config.cascade_tracking_enabled,
                        &records,
                    ) {
                        self.index.apply_record(&record, true).await?;
                        self.runner.shutdown().check()?;
                    }
                    self.index
                        .apply_change_unit(StoreSelector::Metadata, &unit, true)
                        .await?;
                    tracing::info!(unit = %id, "reindex action: change unit reindexed");
                }
                None => {
                    tracing::info!(
                        unit = %id,
                        "reindex action: change unit not found in repository, skipped"
                    );
                }
            }
        }
        Ok(())
    }

    async fn reindex_records(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_record_to_reindex() {
            self.runner.shutdown().check()?;
            let id = RecordId::new(id);
            self.index.delete_by_record(id).await?;
            for record in route_records(
                self.router.as_ref(),
                self.config.shard_count,
                self.config.shard_instance,
                self.config.cascade_tracking_enabled,
                &[maintenance_record(id)],
            ) {
                self.index.apply_record(&record, true).await?;
            }
            tracing::info!(record = %id, "reindex action: record reindexed");
        }
        Ok(())
    }

    async fn reindex_queries(&self) -> Result<()> {
        while let Some(query) = self.maintenance.pop_query_to_reindex() {
            self.runner.shutdown().check()?;
            self.index.reindex_by_query(&query).await?;
            tracing::info!(query, "reindex action: records matching query reindexed");
        }
        Ok(())
    }

    async fn index_units(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_unit_to_index() {
            self.runner.shutdown().check()?;
            let id = ChangeUnitId::new(id);
            if self
                .index
                .change_unit_count(StoreSelector::Metadata, id)
                .await?
                > 0
            {
                tracing::info!(unit = %id, "index action: change unit already present, skipped");
                continue;
            }
            match self.fetch_unit_by_id(id).await? {
                Some(unit) => {
                    let records = self.client.fetch_records(&[unit.id], usize::MAX).await?;
                    for record in route_records(
                        self.router.as_ref(),
                        self.config.shard_count,
                        self.config.shard_instance,
                        self.config.cascade_tracking_enabled,
                        &records,
                    ) {
                        self.index.apply_record(&record, false).await?;
                        self.runner.shutdown().check()?;
                    }
                    self.index
                        .apply_change_unit(StoreSelector::Metadata, &unit, false)
                        .await?;
                    tracing::info!(unit = %id, "index action: change unit indexed");
                }
                None => {
                    tracing::info!(
                        unit = %id,
                        "index action: change unit not found in repository, skipped"
                    );
                }
            }
        }
        Ok(())
    }

    async fn index_records(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_record_to_index() {
            self.runner.shutdown().check()?;
            let id = RecordId::new(id);
            self.index
                .apply_record(&maintenance_record(id), false)
                .await?;
            tracing::info!(record = %id, "index action: record indexed");
        }
        Ok(())
    }

    async fn fetch_unit_by_id(&self, id: ChangeUnitId) -> Result<Option<ChangeUnit>> {
        let units = self
            .client
            .list_change_units(
                StoreSelector::Metadata,
                None,
                Some(id),
                None,
                Some(ChangeUnitId::new(id.as_u64() + 1)),
                1,
            )
            .await?;
        Ok(units.into_iter().find(|unit| unit.id == id))
    }

    /// Admin surface: queue a change unit for indexing.
    pub fn add_unit_to_index(&self, id: u64) {
        self.maintenance.add_unit_to_index(id);
    }

    /// Admin surface: queue a change unit for purge-then-reapply.
    pub fn add_unit_to_reindex(&self, id: u64) {
        self.maintenance.add_unit_to_reindex(id);
    }

    /// Admin surface: queue a change unit for deletion.
    pub fn add_unit_to_purge(&self, id: u64) {
        self.maintenance.add_unit_to_purge(id);
    }

    /// Admin surface: queue a record for indexing.
    pub fn add_record_to_index(&self, id: u64) {
        self.maintenance.add_record_to_index(id);
    }

    /// Admin surface: queue a record for re-evaluation.
    pub fn add_record_to_reindex(&self, id: u64) {
        self.maintenance.add_record_to_reindex(id);
    }

    /// Admin surface: queue a record for deletion.
    pub fn add_record_to_purge(&self, id: u64) {
        self.maintenance.add_record_to_purge(id);
    }

    /// Admin surface: queue an index query for re-indexing.
    pub fn add_query_to_reindex(&self, query: impl Into<String>) {
        self.maintenance.add_query_to_reindex(query);
    }

    /// Whether administrator maintenance work is pending.
    pub fn has_maintenance(&self) -> bool {
        self.maintenance.has_work()
    }

    /// Pending maintenance queues (coordinator drains them on commit).
    pub(crate) fn maintenance_queues(&self) -> &Arc<MaintenanceQueues> {
        &self.maintenance
    }

    /// This tracker's lock pair.
    pub(crate) fn locks(&self) -> &Arc<TrackerLocks> {
        self.runner.locks()
    }

    /// This tracker's rollback cell.
    pub(crate) fn rollback_cell(&self) -> &Arc<RollbackCell> {
        self.runner.rollback()
    }

    /// Discards in-memory state; the next cycle rebuilds from the index.
    pub fn invalidate_state(&self) {
        self.runner.invalidate_state();
    }

    /// Enables or disables the tracker. Disabling drops scheduled
    /// maintenance work.
    pub fn set_enabled(&self, enabled: bool) {
        self.runner.set_enabled(enabled);
        if !enabled {
            self.maintenance.clear_logged("", "metadata");
        }
    }

    /// Whether the tracker is enabled.
    pub fn is_enabled(&self) -> bool {
        self.runner.is_enabled()
    }

    /// Read-only state snapshot, None while rebuilding.
    pub fn state_snapshot(&self) -> Option<TrackerStateSnapshot> {
        self.runner
            .state_handle()
            .read()
            .as_ref()
            .map(TrackerState::snapshot)
    }

    /// The cycle runner (test and coordinator access).
    pub(crate) fn runner(&self) -> &CycleRunner {
        &self.runner
    }
}

/// A record stub standing in for an administrator-named id; the index
/// re-evaluates it from its own stored fields.
fn maintenance_record(id: RecordId) -> Record {
    Record::new(
        id,
        ChangeUnitId::new(u64::MAX),
        AclGroupId::new(0),
        RecordStatus::Unknown,
    )
}

/// Routes a record set, converting rejected records instead of dropping
/// them: an update that left local ownership becomes a cascade trigger (when
/// cascade tracking is on) so dependents are re-evaluated, anything else
/// becomes a local tombstone so stale copies cannot linger.
pub(crate) fn route_records(
    router: &dyn DocRouter,
    shard_count: u32,
    shard_instance: u32,
    cascade_enabled: bool,
    records: &[Record],
) -> Vec<Record> {
    records
        .iter()
        .map(|record| {
            if router
                .route_record(shard_count, shard_instance, record)
                .accepted()
            {
                record.clone()
            } else if cascade_enabled && record.status == RecordStatus::Updated {
                Record::cascade_marker_of(record)
            } else {
                Record::tombstone_of(record)
            }
        })
        .collect()
}
