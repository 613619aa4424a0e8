//! The cascade engine.
//!
//! When a record's shard-relevant derived property changes (an ancestor
//! path, an ownership move), dependent records need re-evaluation even
//! though they were not themselves mutated. The metadata engine flags the
//! originating change unit; this tracker drains those flags, fetches the
//! dependent-record set per unit and schedules small batches onto the
//! bounded worker pool. Completion clears the originating unit's flag so
//! cascade work never blocks ordinary indexing throughput.

use std::sync::Arc;

use shardsync_core::config::TrackerConfig;
use shardsync_core::error::Result;
use shardsync_core::index::SearchIndex;
use shardsync_core::shutdown::ShutdownFlag;
use shardsync_core::types::{ChangeUnitId, Record, StoreSelector};

use crate::clock::Clock;
use crate::cycle::{CycleRunner, RollbackCell, TrackerType};
use crate::locks::TrackerLocks;
use crate::state::{TrackerState, TrackerStateSnapshot};
use crate::workers::{first_failure, run_bounded};

/// Candidate units drained per cascade iteration.
const CASCADE_CANDIDATE_PAGE: usize = 50;

/// Propagates update side effects onto dependent records.
pub struct CascadeTracker {
    config: TrackerConfig,
    index: Arc<dyn SearchIndex>,
    runner: CycleRunner,
}

impl CascadeTracker {
    /// Creates the tracker for one core.
    pub fn new(
        core_name: &str,
        config: TrackerConfig,
        index: Arc<dyn SearchIndex>,
        shutdown: ShutdownFlag,
        clock: Clock,
    ) -> Self {
        let runner = CycleRunner::new(
            core_name,
            TrackerType::Cascade,
            Arc::new(TrackerLocks::new()),
            Arc::clone(&index),
            StoreSelector::Metadata,
            config.hole_retention_ms,
            shutdown,
            clock,
        );
        Self {
            config,
            index,
            runner,
        }
    }

    /// One scheduled tracking invocation.
    pub async fn track(&self) {
        self.runner.run(self.do_track()).await;
    }

    async fn do_track(&self) -> Result<()> {
        let mut total_cascaded = 0usize;

        loop {
            self.runner.shutdown().check()?;
            let _write = self.runner.locks().write().await;

            let batch = self.index.cascade_candidates(CASCADE_CANDIDATE_PAGE).await?;
            if batch.is_empty() {
                tracing::debug!("no cascade candidates this cycle");
                break;
            }
            tracing::info!(
                units = batch.len(),
                first = %batch[0].id,
                last = %batch[batch.len() - 1].id,
                "processing cascade candidates"
            );

            let unit_ids: Vec<ChangeUnitId> = batch.iter().map(|unit| unit.id).collect();
            let dependents = self.index.cascade_dependents(&unit_ids).await?;

            if !dependents.is_empty() {
                let chunks: Vec<Vec<Record>> = dependents
                    .chunks(self.config.cascade_batch_size.max(1))
                    .map(<[Record]>::to_vec)
                    .collect();
                let results = run_bounded(self.config.max_parallelism, chunks, |chunk| {
                    let index = Arc::clone(&self.index);
                    let shutdown = self.runner.shutdown().clone();
                    async move {
                        shutdown.check()?;
                        for record in &chunk {
                            index.apply_cascade(record).await?;
                        }
                        Ok(())
                    }
                })
                .await;
                total_cascaded += first_failure(results)?;
            }

            // Only after every dependent landed: clear the originating
            // units' flags so a failure re-runs the whole cascade.
            for unit in &batch {
                self.index.mark_cascade_applied(unit).await?;
            }
        }

        tracing::info!(total_cascaded, "cascade tracking cycle complete");
        Ok(())
    }

    /// Cascade tracking has no administrator maintenance queues.
    pub fn has_maintenance(&self) -> bool {
        false
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

#[cfg(test)]
mod tests {
    use shardsync_core::memory::MemoryIndex;
    use shardsync_core::types::{
        AclGroupId, ChangeUnit, CommitTime, RecordId, RecordStatus,
    };

    use super::*;

    fn unit(id: u64, time: u64) -> ChangeUnit {
        ChangeUnit::new(ChangeUnitId::new(id), CommitTime::from_millis(time), 1, 0)
    }

    fn dependent(id: u64, unit_id: u64) -> Record {
        Record::new(
            RecordId::new(id),
            ChangeUnitId::new(unit_id),
            AclGroupId::new(1),
            RecordStatus::Updated,
        )
    }

    fn tracker(index: &MemoryIndex) -> CascadeTracker {
        CascadeTracker::new(
            "alpha",
            TrackerConfig {
                cascade_batch_size: 2,
                ..Default::default()
            },
            Arc::new(index.clone()),
            ShutdownFlag::new(),
            Clock::fixed(CommitTime::from_millis(1_000_000)),
        )
    }

    async fn flag_unit(index: &MemoryIndex, id: u64, time: u64) {
        index
            .apply_change_unit(StoreSelector::Metadata, &unit(id, time), true)
            .await
            .unwrap();
        let marker = Record {
            status: RecordStatus::NonShardUpdated,
            ..dependent(0, id)
        };
        index.apply_record(&marker, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_cascades_dependents_and_clears_flags() {
        let index = MemoryIndex::new();
        flag_unit(&index, 1, 100).await;
        index.set_dependents(
            ChangeUnitId::new(1),
            vec![dependent(10, 1), dependent(11, 1), dependent(12, 1)],
        );

        let tracker = tracker(&index);
        tracker.track().await;

        assert!(!tracker.rollback_cell().is_flagged());
        assert_eq!(index.cascades_applied(), 3);
        assert!(index.cascade_candidates(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unit_without_dependents_still_clears() {
        let index = MemoryIndex::new();
        flag_unit(&index, 1, 100).await;

        let tracker = tracker(&index);
        tracker.track().await;

        assert_eq!(index.cascades_applied(), 0);
        assert!(index.cascade_candidates(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_failure_sets_rollback_and_keeps_flag() {
        let index = MemoryIndex::new();
        flag_unit(&index, 1, 100).await;
        index.set_dependents(ChangeUnitId::new(1), vec![dependent(10, 1)]);

        let tracker = tracker(&index);
        index.fail_next_apply("cascade apply failed");
        tracker.track().await;

        assert!(tracker.rollback_cell().is_flagged());
        // The flag survives so the cascade re-runs after rollback.
        assert_eq!(index.cascade_candidates(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_idle_cycle_is_a_noop() {
        let index = MemoryIndex::new();
        let tracker = tracker(&index);
        tracker.track().await;
        assert!(!tracker.rollback_cell().is_flagged());
        assert_eq!(index.cascades_applied(), 0);
    }
}
