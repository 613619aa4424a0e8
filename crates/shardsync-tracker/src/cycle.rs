//! The tracker cycle state machine.
//!
//! `track()` semantics shared by every tracker, expressed as a cycle runner
//! that owns the locking discipline, state lifecycle and error
//! classification, and delegates the actual work to a per-tracker future.
//! States: idle -> running -> (success | rollback-pending) -> idle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use shardsync_core::error::{Result, SyncError};
use shardsync_core::index::SearchIndex;
use shardsync_core::shutdown::ShutdownFlag;
use shardsync_core::types::StoreSelector;

use crate::clock::Clock;
use crate::locks::TrackerLocks;
use crate::state::{shared_state, SharedTrackerState, TrackerState};

/// The tracker kinds of one core.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrackerType {
    /// Content-metadata change-pull engine.
    Metadata,
    /// Access-control change-pull engine.
    Acl,
    /// Derived-content refresher.
    Content,
    /// Dependent-record cascade engine.
    Cascade,
    /// Commit/rollback coordinator.
    Commit,
}

impl fmt::Display for TrackerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerType::Metadata => write!(f, "metadata"),
            TrackerType::Acl => write!(f, "acl"),
            TrackerType::Content => write!(f, "content"),
            TrackerType::Cascade => write!(f, "cascade"),
            TrackerType::Commit => write!(f, "commit"),
        }
    }
}

/// A tracker's rollback flag together with the error that caused it.
/// Workers and the cycle runner set it; only the coordinator clears it.
#[derive(Default)]
pub struct RollbackCell {
    flagged: AtomicBool,
    cause: Mutex<Option<SyncError>>,
}

impl RollbackCell {
    /// Creates an unflagged cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags the tracker for rollback, keeping the first cause.
    pub fn set(&self, cause: SyncError) {
        let mut guard = self.cause.lock();
        if guard.is_none() {
            *guard = Some(cause);
        }
        self.flagged.store(true, Ordering::SeqCst);
    }

    /// Whether a rollback is pending.
    pub fn is_flagged(&self) -> bool {
        self.flagged.load(Ordering::SeqCst)
    }

    /// The causing error's message, if any.
    pub fn cause_message(&self) -> Option<String> {
        self.cause.lock().as_ref().map(|e| e.to_string())
    }

    /// Clears the flag and the cause.
    pub fn clear(&self) {
        *self.cause.lock() = None;
        self.flagged.store(false, Ordering::SeqCst);
    }
}

/// Runs tracker cycles: run-lock acquisition, state loading, delegation to
/// the tracker's work future, rollback capture and turn-off.
pub struct CycleRunner {
    core_name: String,
    tracker_type: TrackerType,
    tracker_id: Uuid,
    locks: Arc<TrackerLocks>,
    state: SharedTrackerState,
    rollback: Arc<RollbackCell>,
    shutdown: ShutdownFlag,
    index: Arc<dyn SearchIndex>,
    selector: StoreSelector,
    hole_retention_ms: u64,
    clock: Clock,
    enabled: AtomicBool,
}

impl CycleRunner {
    /// Creates a runner for one tracker instance.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core_name: impl Into<String>,
        tracker_type: TrackerType,
        locks: Arc<TrackerLocks>,
        index: Arc<dyn SearchIndex>,
        selector: StoreSelector,
        hole_retention_ms: u64,
        shutdown: ShutdownFlag,
        clock: Clock,
    ) -> Self {
        Self {
            core_name: core_name.into(),
            tracker_type,
            tracker_id: Uuid::new_v4(),
            locks,
            state: shared_state(),
            rollback: Arc::new(RollbackCell::new()),
            shutdown,
            index,
            selector,
            hole_retention_ms,
            clock,
            enabled: AtomicBool::new(true),
        }
    }

    /// The tracker's lock pair.
    pub fn locks(&self) -> &Arc<TrackerLocks> {
        &self.locks
    }

    /// The tracker's shared cursor state.
    pub fn state_handle(&self) -> &SharedTrackerState {
        &self.state
    }

    /// The tracker's rollback cell.
    pub fn rollback(&self) -> &Arc<RollbackCell> {
        &self.rollback
    }

    /// The shutdown flag shared by the core.
    pub fn shutdown(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// The clock driving cycle bounds.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// This tracker's kind.
    pub fn tracker_type(&self) -> TrackerType {
        self.tracker_type
    }

    /// Enables or disables the tracker. A disabled tracker's `track()`
    /// returns immediately.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether the tracker is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Executes one tracking cycle around the given work future.
    pub async fn run<F>(&self, work: F)
    where
        F: std::future::Future<Output = Result<()>>,
    {
        if !self.is_enabled() {
            tracing::debug!(
                core = %self.core_name,
                tracker = %self.tracker_type,
                "tracker disabled, skipping cycle"
            );
            return;
        }

        let Some(_run_permit) = self.locks.try_run() else {
            tracing::info!(
                core = %self.core_name,
                tracker = %self.tracker_type,
                id = %self.tracker_id,
                "tracker already running, skipping overlapping invocation"
            );
            return;
        };

        if let Err(error) = self.prepare_state().await {
            tracing::error!(
                core = %self.core_name,
                tracker = %self.tracker_type,
                %error,
                "failed to prepare tracker state"
            );
            return;
        }
        self.set_running(true);

        match work.await {
            Ok(()) => {}
            Err(error) if error.is_shutdown() => {
                tracing::info!(
                    core = %self.core_name,
                    tracker = %self.tracker_type,
                    "tracking cycle stopped for shutdown"
                );
            }
            Err(error) if error.is_retryable() => {
                tracing::warn!(
                    core = %self.core_name,
                    tracker = %self.tracker_type,
                    %error,
                    "tracking communication failed, retrying next cycle"
                );
            }
            Err(error) if error.is_consistency_violation() => {
                tracing::error!(
                    core = %self.core_name,
                    tracker = %self.tracker_type,
                    %error,
                    "repository/index consistency violation, operator intervention required"
                );
                self.rollback.set(error);
            }
            Err(error) => {
                tracing::error!(
                    core = %self.core_name,
                    tracker = %self.tracker_type,
                    %error,
                    "tracking failure, tracker marked for rollback"
                );
                self.rollback.set(error);
            }
        }

        self.set_running(false);
    }

    /// Loads the state on first use, or prepares the reused state for
    /// another cycle (hole retention + fresh stop bound).
    async fn prepare_state(&self) -> Result<()> {
        let has_state = self.state.read().is_some();
        if !has_state {
            return self.rebuild_state().await;
        }
        {
            let mut guard = self.state.write();
            if let Some(state) = guard.as_mut() {
                state.continue_cycle(self.hole_retention_ms, self.clock.now());
                return Ok(());
            }
        }
        // Invalidated between the check and the lock.
        self.rebuild_state().await
    }

    async fn rebuild_state(&self) -> Result<()> {
        let max = self.index.max_indexed_watermark(self.selector).await?;
        let fresh = TrackerState::rebuilt_from(max, self.clock.now());
        tracing::debug!(
            core = %self.core_name,
            tracker = %self.tracker_type,
            last_indexed = %fresh.last_indexed,
            "rebuilt tracker state from index watermark"
        );
        *self.state.write() = Some(fresh);
        Ok(())
    }

    /// Returns a working copy of the state, rebuilding it first if the
    /// coordinator invalidated it since the last iteration. Engines call
    /// this at the top of every pull iteration, under the write lock.
    pub async fn reload_state(&self) -> Result<TrackerState> {
        if self.state.read().is_none() {
            self.rebuild_state().await?;
        }
        Ok(self
            .state
            .read()
            .clone()
            .expect("state present after rebuild"))
    }

    /// Stores the cycle's updated state. Only the owning cycle calls this,
    /// after its batch workers have completed.
    pub fn store_state(&self, state: &TrackerState) {
        *self.state.write() = Some(state.clone());
    }

    /// Discards the in-memory state, forcing a rebuild from the index's
    /// durable watermark on the next cycle. Called by the coordinator during
    /// rollback, while holding this tracker's write lock.
    pub fn invalidate_state(&self) {
        *self.state.write() = None;
    }

    fn set_running(&self, running: bool) {
        if let Some(state) = self.state.write().as_mut() {
            state.running = running;
            if !running {
                state.check = false;
            }
        }
    }
}
