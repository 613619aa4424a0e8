//! Tracker cursor state.
//!
//! One `TrackerState` exists per tracker type per shard instance. It is
//! owned by its tracker; the coordinator and the shard-state reporter read
//! it and must tolerate a rebuilding (None) state. After a rollback the
//! coordinator invalidates the state and the next cycle rebuilds it from the
//! index's durable watermark, which is what resynchronizes the tracker with
//! the rolled-back index.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use shardsync_core::types::{CommitTime, Watermark};

/// Mutable cursor and bookkeeping record for one tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerState {
    /// The last change unit durably applied and made visible.
    pub last_indexed: Watermark,
    /// Lower bound confirmed consistent at startup; the pull loop's scan
    /// floor until the first unit of a run is found.
    pub last_good_commit_time_in_index: CommitTime,
    /// Highest watermark observed from the repository this run.
    pub last_on_server: Watermark,
    /// Whether the first-unit consistency check has completed.
    pub checked_first_unit: bool,
    /// Whether the last-unit consistency check has completed.
    pub checked_last_unit: bool,
    /// Upper time bound for this run's scans; a cycle converges to a
    /// consistent snapshot instead of racing new writes.
    pub time_to_stop_indexing: CommitTime,
    /// Completed cycle count since the state was built.
    pub tracker_cycles: u64,
    /// Whether a cycle is currently executing.
    pub running: bool,
    /// One-shot verification request flag.
    pub check: bool,
}

impl TrackerState {
    /// Builds a fresh state from the index's durable watermark.
    pub fn rebuilt_from(max_indexed: Option<Watermark>, now: CommitTime) -> Self {
        let last_indexed = max_indexed.unwrap_or(Watermark::ZERO);
        TrackerState {
            last_indexed,
            last_good_commit_time_in_index: last_indexed.commit_time,
            last_on_server: Watermark::ZERO,
            checked_first_unit: false,
            checked_last_unit: false,
            time_to_stop_indexing: now,
            tracker_cycles: 0,
            running: false,
            check: false,
        }
    }

    /// Prepares a reused state for another cycle: rewinds the scan floor by
    /// the hole-retention window so units that arrived out of commit-time
    /// order are re-visited, and refreshes the stop bound.
    pub fn continue_cycle(&mut self, hole_retention_ms: u64, now: CommitTime) {
        self.last_good_commit_time_in_index = self
            .last_indexed
            .commit_time
            .minus_millis(hole_retention_ms)
            .max(CommitTime::ZERO);
        self.time_to_stop_indexing = now;
        self.tracker_cycles += 1;
    }

    /// A serializable copy for the shard-state reporter.
    pub fn snapshot(&self) -> TrackerStateSnapshot {
        TrackerStateSnapshot {
            last_indexed: self.last_indexed,
            last_good_commit_time_in_index: self.last_good_commit_time_in_index,
            last_on_server: self.last_on_server,
            checked_first_unit: self.checked_first_unit,
            checked_last_unit: self.checked_last_unit,
            time_to_stop_indexing: self.time_to_stop_indexing,
            tracker_cycles: self.tracker_cycles,
            running: self.running,
        }
    }
}

/// Read-only view of a tracker's state for health reporting.
#[derive(Clone, Debug, Serialize)]
pub struct TrackerStateSnapshot {
    /// The last change unit durably applied.
    pub last_indexed: Watermark,
    /// The pull loop's scan floor.
    pub last_good_commit_time_in_index: CommitTime,
    /// Highest watermark observed from the repository this run.
    pub last_on_server: Watermark,
    /// First-unit consistency check done.
    pub checked_first_unit: bool,
    /// Last-unit consistency check done.
    pub checked_last_unit: bool,
    /// This run's scan upper bound.
    pub time_to_stop_indexing: CommitTime,
    /// Completed cycle count.
    pub tracker_cycles: u64,
    /// Whether a cycle is executing.
    pub running: bool,
}

/// Shared handle to a tracker's state. None while invalidated/rebuilding.
pub type SharedTrackerState = Arc<RwLock<Option<TrackerState>>>;

/// Creates an empty (rebuilding) shared state handle.
pub fn shared_state() -> SharedTrackerState {
    Arc::new(RwLock::new(None))
}
