//! Per-tracker lock pair.
//!
//! Each tracker instance owns a run lock and a write lock, both binary
//! semaphores, created by the per-core registry rather than looked up in
//! process-wide maps. The run lock prevents self-overlap of `track()`
//! invocations; the write lock wraps the index-mutating segments and is the
//! rendezvous point the commit tracker uses to pause a tracker before a
//! commit or rollback.

use tokio::sync::{Semaphore, SemaphorePermit};

/// The run/write lock pair for one tracker of one core.
pub struct TrackerLocks {
    run: Semaphore,
    write: Semaphore,
}

impl TrackerLocks {
    /// Creates an uncontended lock pair.
    pub fn new() -> Self {
        Self {
            run: Semaphore::new(1),
            write: Semaphore::new(1),
        }
    }

    /// Attempts to take the run lock. None means an overlapping invocation
    /// is already in progress, which is not an error.
    pub fn try_run(&self) -> Option<SemaphorePermit<'_>> {
        self.run.try_acquire().ok()
    }

    /// Acquires the write lock, waiting behind the coordinator if necessary.
    pub async fn write(&self) -> SemaphorePermit<'_> {
        self.write.acquire().await.expect("write lock closed")
    }

    /// True when the write lock is currently held.
    pub fn write_held(&self) -> bool {
        self.write.available_permits() == 0
    }
}

impl Default for TrackerLocks {
    fn default() -> Self {
        Self::new()
    }
}
