//! Error taxonomy for the synchronization engine.
//!
//! Three classes matter to callers: transient transport failures (the next
//! scheduled cycle retries naturally), consistency violations (fatal until an
//! operator rebuilds the index), and the cooperative-shutdown signal (a clean
//! stop, never a rollback cause). Everything else marks the tracker for
//! rollback by the coordinator.

use thiserror::Error;

use crate::types::{ChangeUnitId, CommitTime, Watermark};

/// Errors surfaced by trackers and their collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A transient transport failure talking to the repository.
    #[error("repository transport failure: {reason}")]
    Transport {
        /// Human-readable failure description.
        reason: String,
    },

    /// The index watermark is ahead of the repository's newest change unit.
    /// The index was built against a newer repository state (e.g. the
    /// repository was restored from a stale backup) and must be rebuilt.
    #[error("index watermark {index} is ahead of repository watermark {repository}; the index must be rebuilt")]
    IndexAheadOfRepository {
        /// Highest watermark found in the index.
        index: Watermark,
        /// Highest watermark reported by the repository.
        repository: Watermark,
    },

    /// The repository's first change unit has no counterpart in the index.
    /// The index was built against a different repository.
    #[error("first change unit {id} @ {commit_time} not found in index; the index belongs to a different repository")]
    FirstUnitMissing {
        /// Id of the repository's earliest change unit.
        id: ChangeUnitId,
        /// Commit time of the repository's earliest change unit.
        commit_time: CommitTime,
    },

    /// Cooperative shutdown was requested; the cycle exits cleanly.
    #[error("shutdown requested")]
    Shutdown,

    /// A non-transport repository failure.
    #[error("repository error: {0}")]
    Repository(String),

    /// A search-index failure.
    #[error("index error: {0}")]
    Index(String),
}

impl SyncError {
    /// A transport timeout.
    pub fn timeout(detail: impl Into<String>) -> Self {
        SyncError::Transport {
            reason: format!("timed out: {}", detail.into()),
        }
    }

    /// A refused connection.
    pub fn connection_refused(detail: impl Into<String>) -> Self {
        SyncError::Transport {
            reason: format!("connection refused: {}", detail.into()),
        }
    }

    /// True for transient failures that the next scheduled cycle retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }

    /// True for fatal repository/index mismatches requiring operator action.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            SyncError::IndexAheadOfRepository { .. } | SyncError::FirstUnitMissing { .. }
        )
    }

    /// True for the cooperative-shutdown signal.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SyncError::Shutdown)
    }
}

/// Convenience result alias used across the workspace.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_retryable() {
        assert!(SyncError::timeout("fetch").is_retryable());
        assert!(SyncError::connection_refused("10.0.0.1:8080").is_retryable());
        assert!(!SyncError::Index("boom".into()).is_retryable());
    }

    #[test]
    fn test_consistency_violations() {
        let err = SyncError::IndexAheadOfRepository {
            index: Watermark::ZERO,
            repository: Watermark::ZERO,
        };
        assert!(err.is_consistency_violation());
        assert!(!err.is_retryable());

        let err = SyncError::FirstUnitMissing {
            id: ChangeUnitId::new(1),
            commit_time: CommitTime::from_millis(10),
        };
        assert!(err.is_consistency_violation());
    }

    #[test]
    fn test_shutdown_is_not_a_failure_class() {
        let err = SyncError::Shutdown;
        assert!(err.is_shutdown());
        assert!(!err.is_retryable());
        assert!(!err.is_consistency_violation());
    }
}
