//! The derived-content refresher.
//!
//! Does not consult the repository's change stream at all: it queries the
//! index for a bounded page of records whose derived content representation
//! is pending or stale and refreshes each through the bounded worker pool.
//! Content refresh is best-effort; a per-record failure is logged and the
//! record left unclean for a future cycle, never fatal to the cycle.

use std::collections::HashSet;
use std::sync::Arc;

use shardsync_core::config::TrackerConfig;
use shardsync_core::error::Result;
use shardsync_core::index::SearchIndex;
use shardsync_core::shutdown::ShutdownFlag;
use shardsync_core::types::{RecordId, StoreSelector, UncleanRecord};

use crate::clock::Clock;
use crate::cycle::{CycleRunner, RollbackCell, TrackerType};
use crate::locks::TrackerLocks;
use crate::state::{TrackerState, TrackerStateSnapshot};
use crate::workers::{first_failure, run_bounded};

/// Refreshes records with unclean derived content.
pub struct ContentTracker {
    config: TrackerConfig,
    index: Arc<dyn SearchIndex>,
    runner: CycleRunner,
}

impl ContentTracker {
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
            TrackerType::Content,
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
        let mut attempted: HashSet<RecordId> = HashSet::new();
        let mut processed = 0usize;

        loop {
            self.runner.shutdown().check()?;
            let _write = self.runner.locks().write().await;

            let page = self
                .index
                .unclean_content_page(self.config.content_batch_size)
                .await?;
            // Records that already failed this cycle stay unclean; without
            // this filter a persistently failing record would spin the loop.
            let fresh: Vec<UncleanRecord> = page
                .into_iter()
                .filter(|record| !attempted.contains(&record.id))
                .collect();
            if fresh.is_empty() {
                tracing::trace!("no unclean records detected in this content cycle");
                break;
            }
            for record in &fresh {
                attempted.insert(record.id);
            }

            let results = run_bounded(self.config.max_parallelism, fresh, |record| {
                let index = Arc::clone(&self.index);
                let shutdown = self.runner.shutdown().clone();
                async move {
                    shutdown.check()?;
                    match index.refresh_content(&record).await {
                        Ok(()) => Ok(()),
                        Err(error) if error.is_shutdown() => Err(error),
                        Err(error) => {
                            // Left unclean; a future cycle retries it.
                            tracing::warn!(
                                record = %record.id,
                                %error,
                                "content refresh failed, record deferred"
                            );
                            Ok(())
                        }
                    }
                }
            })
            .await;
            processed += first_failure(results)?;
        }

        tracing::info!(processed, "content tracking cycle complete");
        Ok(())
    }

    /// Content refresh has no administrator maintenance queues.
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
