//! Injectable wall clock.
//!
//! Cycle bounds (`time_to_stop_indexing`, commit intervals) are derived from
//! the clock at cycle start; tests pin it to deterministic values.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use shardsync_core::types::CommitTime;

/// A cloneable source of the current repository-comparable time.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> CommitTime + Send + Sync>);

impl Clock {
    /// The system wall clock.
    pub fn system() -> Self {
        Clock(Arc::new(|| {
            let ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            CommitTime::from_millis(ms)
        }))
    }

    /// A clock pinned to a fixed instant.
    pub fn fixed(at: CommitTime) -> Self {
        Clock(Arc::new(move || at))
    }

    /// A clock driven by an arbitrary closure.
    pub fn from_fn(f: impl Fn() -> CommitTime + Send + Sync + 'static) -> Self {
        Clock(Arc::new(f))
    }

    /// The current time.
    pub fn now(&self) -> CommitTime {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Clock({})", self.now())
    }
}
