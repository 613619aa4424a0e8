//! Cooperative shutdown signalling.
//!
//! A process-wide flag checked between discrete units of work. Once
//! triggered, in-flight cycles exit cleanly at the next check without
//! deadlocking their run locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SyncError};

/// A lightweight, cloneable shutdown flag shared by all trackers of a core.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    triggered: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Creates an un-triggered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns `SyncError::Shutdown` once the flag is triggered. Called
    /// between change units and maintenance items.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(SyncError::Shutdown)
        } else {
            Ok(())
        }
    }
}
