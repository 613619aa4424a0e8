//! The access-control change-pull engine.
//!
//! Mirrors the metadata engine over the ACL change-set stream: the same
//! startup consistency check, hole-retention pull loop and watermark
//! discipline, with an apply path that fetches the ACL groups carried by
//! each batch, filters them through the router, resolves the surviving
//! groups' memberships and applies those. Groups rejected by the router are
//! simply skipped; group membership is duplicated or co-located per the
//! routing strategy, never tombstoned.

use std::sync::Arc;

use shardsync_core::config::TrackerConfig;
use shardsync_core::error::Result;
use shardsync_core::index::SearchIndex;
use shardsync_core::repository::RepositoryClient;
use shardsync_core::shutdown::ShutdownFlag;
use shardsync_core::types::{AclGroup, AclGroupId, ChangeUnit, ChangeUnitId, StoreSelector};
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

/// Tracks the ACL change-set stream.
pub struct AclTracker {
    config: TrackerConfig,
    client: Arc<dyn RepositoryClient>,
    index: Arc<dyn SearchIndex>,
    router: Arc<dyn DocRouter>,
    runner: CycleRunner,
    maintenance: Arc<MaintenanceQueues>,
}

impl AclTracker {
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
            TrackerType::Acl,
            Arc::new(TrackerLocks::new()),
            Arc::clone(&index),
            StoreSelector::Acl,
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

        {
            let _write = self.runner.locks().write().await;
            let mut state = self.runner.reload_state().await?;
            if state.tracker_cycles == 0
                || !(state.checked_first_unit && state.checked_last_unit)
            {
                check_repo_and_index_consistency(
                    self.client.as_ref(),
                    self.index.as_ref(),
                    StoreSelector::Acl,
                    &self.config,
                    &mut state,
                    FirstCheckFloor::Default,
                )
                .await?;
                self.runner.store_state(&state);
            }
            self.run_maintenance().await?;
        }

        self.runner.shutdown().check()?;
        self.track_stream().await
    }

    async fn track_stream(&self) -> Result<()> {
        let cfg = &self.config;
        let mut found = FoundWindow::new(cfg.found_window_size);
        let mut total_applied = 0usize;

        loop {
            self.runner.shutdown().check()?;
            let _write = self.runner.locks().write().await;
            let mut state = self.runner.reload_state().await?;

            let from = found
                .last()
                .map(|unit| unit.commit_time)
                .unwrap_or(state.last_good_commit_time_in_index);

            let units = pull_next_window(
                self.client.as_ref(),
                StoreSelector::Acl,
                &found,
                from,
                cfg.time_step_ms,
                cfg.max_units_per_pull,
                state.time_to_stop_indexing,
            )
            .await?;

            if units.is_empty() {
                tracing::debug!(from = %from, "no further ACL change sets this cycle");
                break;
            }
            if units
                .iter()
                .any(|unit| unit.commit_time > state.time_to_stop_indexing)
            {
                tracing::debug!(
                    stop = %state.time_to_stop_indexing,
                    "ACL change sets beyond the stop bound, ending cycle"
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

                for unit in &batch {
                    self.index
                        .apply_change_unit(StoreSelector::Acl, unit, true)
                        .await?;
                    state.last_indexed.advance_to(unit.watermark());
                }
            }

            if let Some(max) = units.iter().map(ChangeUnit::watermark).max() {
                state.last_on_server.advance_to(max);
            }
            self.runner.store_state(&state);
        }

        tracing::info!(total_applied, "ACL tracking cycle complete");
        Ok(())
    }

    async fn is_unit_indexed(&self, state: &TrackerState, unit: &ChangeUnit) -> bool {
        if unit.commit_time > state.last_indexed.commit_time {
            return false;
        }
        match self
            .index
            .change_unit_count(StoreSelector::Acl, unit.id)
            .await
        {
            Ok(count) => count > 0,
            Err(error) => {
                tracing::warn!(unit = %unit.id, %error, "failed to check change set presence in index");
                false
            }
        }
    }

    /// Fetches a batch's ACL groups and applies the surviving memberships
    /// through the bounded worker pool.
    async fn apply_unit_batch(&self, batch: &[ChangeUnit]) -> Result<usize> {
        let ids: Vec<ChangeUnitId> = batch
            .iter()
            .filter(|unit| unit.work_size() > 0)
            .map(|unit| unit.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let groups = self.client.fetch_acl_groups(&ids, usize::MAX).await?;
        let applied = groups.len();
        let chunks: Vec<Vec<AclGroup>> = groups
            .chunks(self.config.acl_batch_size.max(1))
            .map(<[AclGroup]>::to_vec)
            .collect();

        let results = run_bounded(self.config.max_parallelism, chunks, |chunk| {
            let client = Arc::clone(&self.client);
            let index = Arc::clone(&self.index);
            let router = Arc::clone(&self.router);
            let shutdown = self.runner.shutdown().clone();
            let shard_count = self.config.shard_count;
            let shard_instance = self.config.shard_instance;
            async move {
                shutdown.check()?;
                let kept: Vec<AclGroup> = chunk
                    .into_iter()
                    .filter(|group| {
                        router
                            .route_acl_group(shard_count, shard_instance, group)
                            .accepted()
                    })
                    .collect();
                if kept.is_empty() {
                    return Ok(());
                }
                for membership in client.fetch_group_members(&kept).await? {
                    index.apply_membership(&membership, true).await?;
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
        self.purge_groups().await?;
        self.reindex_units().await?;
        self.reindex_groups().await?;
        self.index_units().await?;
        self.index_groups().await?;
        Ok(())
    }

    async fn purge_units(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_unit_to_purge() {
            self.runner.shutdown().check()?;
            let id = ChangeUnitId::new(id);
            self.index
                .delete_by_change_unit(StoreSelector::Acl, id)
                .await?;
            tracing::info!(unit = %id, "purge action: ACL change set purged");
        }
        Ok(())
    }

    async fn purge_groups(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_record_to_purge() {
            self.runner.shutdown().check()?;
            let id = AclGroupId::new(id);
            self.index.delete_by_acl_group(id).await?;
            tracing::info!(group = %id, "purge action: ACL group purged");
        }
        Ok(())
    }

    async fn reindex_units(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_unit_to_reindex() {
            self.runner.shutdown().check()?;
            let id = ChangeUnitId::new(id);
            self.index
                .delete_by_change_unit(StoreSelector::Acl, id)
                .await?;
            match self.fetch_unit_by_id(id).await? {
                Some(unit) => {
                    self.apply_groups_of(&unit, true).await?;
                    self.index
                        .apply_change_unit(StoreSelector::Acl, &unit, true)
                        .await?;
                    tracing::info!(unit = %id, "reindex action: ACL change set reindexed");
                }
                None => {
                    tracing::info!(
                        unit = %id,
                        "reindex action: ACL change set not found in repository, skipped"
                    );
                }
            }
        }
        Ok(())
    }

    async fn reindex_groups(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_record_to_reindex() {
            self.runner.shutdown().check()?;
            let group = AclGroup::new(AclGroupId::new(id), ChangeUnitId::ZERO, 0);
            self.index.delete_by_acl_group(group.id).await?;
            for membership in self.client.fetch_group_members(&[group]).await? {
                self.index.apply_membership(&membership, true).await?;
            }
            tracing::info!(group = id, "reindex action: ACL group reindexed");
        }
        Ok(())
    }

    async fn index_units(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_unit_to_index() {
            self.runner.shutdown().check()?;
            let id = ChangeUnitId::new(id);
            if self.index.change_unit_count(StoreSelector::Acl, id).await? > 0 {
                tracing::info!(unit = %id, "index action: ACL change set already present, skipped");
                continue;
            }
            match self.fetch_unit_by_id(id).await? {
                Some(unit) => {
                    self.apply_groups_of(&unit, false).await?;
                    self.index
                        .apply_change_unit(StoreSelector::Acl, &unit, false)
                        .await?;
                    tracing::info!(unit = %id, "index action: ACL change set indexed");
                }
                None => {
                    tracing::info!(
                        unit = %id,
                        "index action: ACL change set not found in repository, skipped"
                    );
                }
            }
        }
        Ok(())
    }

    async fn index_groups(&self) -> Result<()> {
        while let Some(id) = self.maintenance.pop_record_to_index() {
            self.runner.shutdown().check()?;
            let group = AclGroup::new(AclGroupId::new(id), ChangeUnitId::ZERO, 0);
            for membership in self.client.fetch_group_members(&[group]).await? {
                self.index.apply_membership(&membership, false).await?;
            }
            tracing::info!(group = id, "index action: ACL group indexed");
        }
        Ok(())
    }

    async fn apply_groups_of(&self, unit: &ChangeUnit, reindex: bool) -> Result<()> {
        let groups = self.client.fetch_acl_groups(&[unit.id], usize::MAX).await?;
        let kept: Vec<AclGroup> = groups
            .into_iter()
            .filter(|group| {
                self.router
                    .route_acl_group(self.config.shard_count, self.config.shard_instance, group)
                    .accepted()
            })
            .collect();
        if kept.is_empty() {
            return Ok(());
        }
        for membership in self.client.fetch_group_members(&kept).await? {
            self.index.apply_membership(&membership, reindex).await?;
            self.runner.shutdown().check()?;
        }
        Ok(())
    }

    async fn fetch_unit_by_id(&self, id: ChangeUnitId) -> Result<Option<ChangeUnit>> {
        let units = self
            .client
            .list_change_units(
                StoreSelector::Acl,
                None,
                Some(id),
                None,
                Some(ChangeUnitId::new(id.as_u64() + 1)),
                1,
            )
            .await?;
        Ok(units.into_iter().find(|unit| unit.id == id))
    }

    /// Admin surface: queue an ACL change set for indexing.
    pub fn add_unit_to_index(&self, id: u64) {
        self.maintenance.add_unit_to_index(id);
    }

    /// Admin surface: queue an ACL change set for purge-then-reapply.
    pub fn add_unit_to_reindex(&self, id: u64) {
        self.maintenance.add_unit_to_reindex(id);
    }

    /// Admin surface: queue an ACL change set for deletion.
    pub fn add_unit_to_purge(&self, id: u64) {
        self.maintenance.add_unit_to_purge(id);
    }

    /// Admin surface: queue an ACL group for indexing.
    pub fn add_group_to_index(&self, id: u64) {
        self.maintenance.add_record_to_index(id);
    }

    /// Admin surface: queue an ACL group for re-evaluation.
    pub fn add_group_to_reindex(&self, id: u64) {
        self.maintenance.add_record_to_reindex(id);
    }

    /// Admin surface: queue an ACL group for deletion.
    pub fn add_group_to_purge(&self, id: u64) {
        self.maintenance.add_record_to_purge(id);
    }

    /// Whether administrator maintenance work is pending.
    pub fn has_maintenance(&self) -> bool {
        self.maintenance.has_work()
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

    /// Enables or disables the tracker.
    pub fn set_enabled(&self, enabled: bool) {
        self.runner.set_enabled(enabled);
        if !enabled {
            self.maintenance.clear_logged("", "acl");
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
