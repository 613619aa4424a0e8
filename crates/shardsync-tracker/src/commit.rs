//! The commit/rollback coordinator.
//!
//! Runs on its own schedule and is the only component that makes indexed
//! work visible. Each cycle it decides whether a commit is due (interval
//! elapsed, or a peer has pending maintenance), pauses the two change-pull
//! engines through their write locks, and either commits or drives the
//! rollback protocol when a peer has flagged a failure.
//!
//! The rollback protocol is safe because any work done between the last
//! commit and the failure is by definition not yet visible in the index:
//! rolling the index back and discarding the peers' in-memory state, which
//! they then re-derive from the index's durable watermark, is sufficient to
//! resynchronize every tracker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use shardsync_core::config::TrackerConfig;
use shardsync_core::error::Result;
use shardsync_core::index::SearchIndex;
use shardsync_core::shutdown::ShutdownFlag;
use shardsync_core::types::{CommitTime, StoreSelector};

use crate::acl::AclTracker;
use crate::cascade::CascadeTracker;
use crate::clock::Clock;
use crate::content::ContentTracker;
use crate::cycle::{CycleRunner, TrackerType};
use crate::locks::TrackerLocks;
use crate::metadata::MetadataTracker;

/// Coordinates commits and rollbacks across the trackers of one core.
pub struct CommitTracker {
    config: TrackerConfig,
    index: Arc<dyn SearchIndex>,
    runner: CycleRunner,
    metadata: Arc<MetadataTracker>,
    acl: Arc<AclTracker>,
    content: Arc<ContentTracker>,
    /// Absent when cascade tracking is disabled for the core.
    cascade: Option<Arc<CascadeTracker>>,
    last_commit: Mutex<CommitTime>,
    last_reader_opened: Mutex<CommitTime>,
    rollback_count: AtomicU64,
}

impl CommitTracker {
    /// Creates the coordinator, wired to its peer trackers.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core_name: &str,
        config: TrackerConfig,
        index: Arc<dyn SearchIndex>,
        metadata: Arc<MetadataTracker>,
        acl: Arc<AclTracker>,
        content: Arc<ContentTracker>,
        cascade: Option<Arc<CascadeTracker>>,
        shutdown: ShutdownFlag,
        clock: Clock,
    ) -> Self {
        let now = clock.now();
        let runner = CycleRunner::new(
            core_name,
            TrackerType::Commit,
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
            metadata,
            acl,
            content,
            cascade,
            last_commit: Mutex::new(now),
            last_reader_opened: Mutex::new(now),
            rollback_count: AtomicU64::new(0),
        }
    }

    /// One scheduled coordination invocation.
    pub async fn track(&self) {
        self.runner.run(self.do_track()).await;
    }

    async fn do_track(&self) -> Result<()> {
        let now = self.runner.clock().now();
        let has_maintenance = self.metadata.has_maintenance() || self.acl.has_maintenance();

        let since_commit = now
            .as_millis()
            .saturating_sub(self.last_commit.lock().as_millis());
        if since_commit <= self.config.commit_interval_ms && !has_maintenance {
            return Ok(());
        }

        let since_reader = now
            .as_millis()
            .saturating_sub(self.last_reader_opened.lock().as_millis());
        let mut open_reader = since_reader > self.config.new_reader_interval_ms;
        if open_reader && self.index.live_reader_count().await? >= self.config.max_live_readers {
            open_reader = false;
        }

        // Pause both change-pull engines. Neither can be mid-batch while
        // these permits are held.
        let _metadata_write = self.metadata.locks().write().await;
        let _acl_write = self.acl.locks().write().await;

        if self.any_peer_flagged() {
            self.do_rollback().await;
            return Ok(());
        }

        if has_maintenance {
            self.metadata.run_maintenance().await?;
            self.acl.run_maintenance().await?;
        }

        let reader_opened = self.index.commit(open_reader).await?;
        *self.last_commit.lock() = now;
        if reader_opened {
            *self.last_reader_opened.lock() = now;
        }
        tracing::debug!(reader_opened, "index commit complete");
        Ok(())
    }

    fn any_peer_flagged(&self) -> bool {
        self.metadata.rollback_cell().is_flagged()
            || self.acl.rollback_cell().is_flagged()
            || self.content.rollback_cell().is_flagged()
            || self
                .cascade
                .as_ref()
                .is_some_and(|c| c.rollback_cell().is_flagged())
    }

    /// The rollback protocol. The caller already holds the metadata and ACL
    /// write locks; this additionally pauses the content and cascade
    /// trackers, rolls the index back to its last committed point, and
    /// resets every peer.
    pub(crate) async fn do_rollback(&self) {
        let _content_write = self.content.locks().write().await;
        let _cascade_write = match &self.cascade {
            Some(cascade) => Some(cascade.locks().write().await),
            None => None,
        };

        if let Err(error) = self.index.rollback().await {
            tracing::error!(%error, "index rollback failed");
        }

        for (tracker, cause) in [
            ("metadata", self.metadata.rollback_cell().cause_message()),
            ("acl", self.acl.rollback_cell().cause_message()),
            ("content", self.content.rollback_cell().cause_message()),
            (
                "cascade",
                self.cascade
                    .as_ref()
                    .and_then(|c| c.rollback_cell().cause_message()),
            ),
        ] {
            if let Some(cause) = cause {
                tracing::warn!(tracker, %cause, "rollback performed due to tracker error");
            }
        }

        self.metadata.rollback_cell().clear();
        self.metadata.invalidate_state();
        self.acl.rollback_cell().clear();
        self.acl.invalidate_state();
        self.content.rollback_cell().clear();
        self.content.invalidate_state();
        if let Some(cascade) = &self.cascade {
            cascade.rollback_cell().clear();
            cascade.invalidate_state();
        }

        self.rollback_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of rollbacks performed since startup.
    pub fn rollback_count(&self) -> u64 {
        self.rollback_count.load(Ordering::SeqCst)
    }

    /// Whether any peer has pending maintenance work.
    pub fn has_maintenance(&self) -> bool {
        self.metadata.has_maintenance() || self.acl.has_maintenance()
    }

    /// The cycle runner (test and registry access).
    pub(crate) fn runner(&self) -> &CycleRunner {
        &self.runner
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64 as TestTime;

    use shardsync_core::memory::{MemoryIndex, MemoryRepository};
    use shardsync_core::types::{
        AclGroupId, ChangeUnit, ChangeUnitId, Record, RecordId, RecordStatus, Watermark,
    };
    use shardsync_router::id_hash::DbIdHashRouter;

    use super::*;

    struct Fixture {
        repo: MemoryRepository,
        index: MemoryIndex,
        metadata: Arc<MetadataTracker>,
        acl: Arc<AclTracker>,
        commit: CommitTracker,
        time: Arc<TestTime>,
    }

    fn fixture() -> Fixture {
        let repo = MemoryRepository::new();
        let index = MemoryIndex::new();
        let shutdown = ShutdownFlag::new();
        let time = Arc::new(TestTime::new(1_000_000));
        let clock = {
            let time = Arc::clone(&time);
            Clock::from_fn(move || CommitTime::from_millis(time.load(Ordering::SeqCst)))
        };
        let config = TrackerConfig::default();
        let client: Arc<dyn shardsync_core::repository::RepositoryClient> =
            Arc::new(repo.clone());
        let shared_index: Arc<dyn SearchIndex> = Arc::new(index.clone());
        let router: Arc<dyn shardsync_router::DocRouter> = Arc::new(DbIdHashRouter::new());

        let metadata = Arc::new(MetadataTracker::new(
            "alpha",
            config.clone(),
            Arc::clone(&client),
            Arc::clone(&shared_index),
            Arc::clone(&router),
            shutdown.clone(),
            clock.clone(),
        ));
        let acl = Arc::new(AclTracker::new(
            "alpha",
            config.clone(),
            Arc::clone(&client),
            Arc::clone(&shared_index),
            Arc::clone(&router),
            shutdown.clone(),
            clock.clone(),
        ));
        let content = Arc::new(ContentTracker::new(
            "alpha",
            config.clone(),
            Arc::clone(&shared_index),
            shutdown.clone(),
            clock.clone(),
        ));
        let cascade = Arc::new(CascadeTracker::new(
            "alpha",
            config.clone(),
            Arc::clone(&shared_index),
            shutdown.clone(),
            clock.clone(),
        ));
        let commit = CommitTracker::new(
            "alpha",
            config,
            shared_index,
            Arc::clone(&metadata),
            Arc::clone(&acl),
            Arc::clone(&content),
            Some(Arc::clone(&cascade)),
            shutdown,
            clock,
        );
        Fixture {
            repo,
            index,
            metadata,
            acl,
            commit,
            time,
        }
    }

    fn advance(fixture: &Fixture, ms: u64) {
        fixture.time.fetch_add(ms, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_no_commit_before_interval() {
        let fixture = fixture();
        fixture.commit.track().await;
        assert_eq!(fixture.index.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_after_interval() {
        let fixture = fixture();
        advance(&fixture, 61_000);
        fixture.commit.track().await;
        assert_eq!(fixture.index.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_maintenance_forces_commit_and_drains() {
        let fixture = fixture();
        fixture.metadata.add_record_to_purge(42);
        assert!(fixture.commit.has_maintenance());

        fixture.commit.track().await;
        assert_eq!(fixture.index.commit_count(), 1);
        assert!(!fixture.commit.has_maintenance());
    }

    #[tokio::test]
    async fn test_reader_opened_on_its_own_interval() {
        let fixture = fixture();
        advance(&fixture, 61_000);
        fixture.commit.track().await;
        assert_eq!(fixture.index.live_reader_count().await.unwrap(), 0);

        advance(&fixture, 121_000);
        fixture.commit.track().await;
        assert_eq!(fixture.index.live_reader_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_uncommitted_work() {
        let fixture = fixture();

        // Committed baseline: one record.
        let unit = ChangeUnit::new(ChangeUnitId::new(1), CommitTime::from_millis(100), 1, 0);
        let record = Record::new(
            RecordId::new(10),
            ChangeUnitId::new(1),
            AclGroupId::new(1),
            RecordStatus::Updated,
        );
        fixture.repo.push_metadata_unit(unit, vec![record]);
        fixture.metadata.track().await;
        advance(&fixture, 61_000);
        fixture.commit.track().await;
        assert_eq!(fixture.index.committed_record_count(), 1);

        // A failing batch marks the metadata tracker for rollback.
        let unit2 = ChangeUnit::new(ChangeUnitId::new(2), CommitTime::from_millis(200), 1, 0);
        let record2 = Record::new(
            RecordId::new(11),
            ChangeUnitId::new(2),
            AclGroupId::new(1),
            RecordStatus::Updated,
        );
        fixture.repo.push_metadata_unit(unit2, vec![record2]);
        fixture.index.fail_next_apply("mid-batch failure");
        fixture.metadata.track().await;
        assert!(fixture.metadata.rollback_cell().is_flagged());

        advance(&fixture, 61_000);
        fixture.commit.track().await;

        // Rolled back, not committed: the failed unit's work is gone and
        // every tracker's state is invalidated for rebuild.
        assert_eq!(fixture.commit.rollback_count(), 1);
        assert_eq!(fixture.index.rollback_count(), 1);
        assert!(!fixture.metadata.rollback_cell().is_flagged());
        assert!(fixture.metadata.state_snapshot().is_none());
        assert!(fixture.acl.state_snapshot().is_none());
        assert_eq!(fixture.index.record_count(), 1);

        // The next metadata cycle rebuilds from the durable watermark and
        // re-applies the failed unit.
        fixture.metadata.track().await;
        let state = fixture.metadata.state_snapshot().unwrap();
        assert_eq!(
            state.last_indexed,
            Watermark::new(CommitTime::from_millis(200), ChangeUnitId::new(2))
        );
        assert_eq!(fixture.index.record_count(), 2);
    }

    #[tokio::test]
    async fn test_acl_mid_batch_failure_keeps_pre_batch_watermark() {
        let fixture = fixture();

        let unit = ChangeUnit::new(ChangeUnitId::new(1), CommitTime::from_millis(100), 1, 0);
        fixture.repo.push_acl_unit(
            unit,
            vec![shardsync_core::types::AclGroup::new(
                AclGroupId::new(5),
                ChangeUnitId::new(1),
                1,
            )],
        );
        fixture.index.fail_next_apply("membership apply failed");
        fixture.acl.track().await;
        assert!(fixture.acl.rollback_cell().is_flagged());

        advance(&fixture, 61_000);
        fixture.commit.track().await;

        // After the coordinator's rollback the ACL watermark rebuilds at
        // its pre-batch value.
        fixture.acl.track().await;
        let state = fixture.acl.state_snapshot().unwrap();
        assert_eq!(
            state.last_indexed,
            Watermark::new(CommitTime::from_millis(100), ChangeUnitId::new(1))
        );
    }

    #[tokio::test]
    async fn test_rollback_is_idempotent() {
        let fixture = fixture();
        fixture
            .metadata
            .rollback_cell()
            .set(shardsync_core::SyncError::Index("boom".into()));

        fixture.commit.do_rollback().await;
        let committed_after_first = fixture.index.committed_record_count();
        let live_after_first = fixture.index.record_count();

        // Second invocation with no new failures: identical state.
        fixture.commit.do_rollback().await;
        assert_eq!(fixture.index.committed_record_count(), committed_after_first);
        assert_eq!(fixture.index.record_count(), live_after_first);
        assert!(!fixture.metadata.rollback_cell().is_flagged());
        assert!(fixture.metadata.state_snapshot().is_none());
        assert_eq!(fixture.commit.rollback_count(), 2);
    }

    #[tokio::test]
    async fn test_commit_skipped_when_rollback_pending() {
        let fixture = fixture();
        fixture
            .acl
            .rollback_cell()
            .set(shardsync_core::SyncError::Index("acl failure".into()));

        advance(&fixture, 61_000);
        fixture.commit.track().await;

        assert_eq!(fixture.index.commit_count(), 0);
        assert_eq!(fixture.index.rollback_count(), 1);
    }
}
