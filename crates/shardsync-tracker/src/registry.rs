//! Per-core tracker wiring.
//!
//! A `TrackerRegistry` builds the five trackers of one shard instance
//! against shared collaborators and owns their lifecycle: scheduling entry
//! points, the admin enqueue surface, activation, shard-state reporting and
//! cooperative shutdown. A `CoreRegistry` holds the registries of all cores
//! hosted by this process.

use std::sync::Arc;

use dashmap::DashMap;

use shardsync_core::config::TrackerConfig;
use shardsync_core::index::SearchIndex;
use shardsync_core::repository::RepositoryClient;
use shardsync_core::shutdown::ShutdownFlag;
use shardsync_router::DocRouter;

use crate::acl::AclTracker;
use crate::cascade::CascadeTracker;
use crate::clock::Clock;
use crate::commit::CommitTracker;
use crate::content::ContentTracker;
use crate::cycle::TrackerType;
use crate::metadata::MetadataTracker;
use crate::report::ShardState;

/// The trackers of one core, wired together.
pub struct TrackerRegistry {
    core_name: String,
    metadata: Arc<MetadataTracker>,
    acl: Arc<AclTracker>,
    content: Arc<ContentTracker>,
    cascade: Option<Arc<CascadeTracker>>,
    commit: Arc<CommitTracker>,
    shutdown: ShutdownFlag,
}

impl TrackerRegistry {
    /// Builds the trackers of one core.
    pub fn new(
        core_name: &str,
        config: TrackerConfig,
        client: Arc<dyn RepositoryClient>,
        index: Arc<dyn SearchIndex>,
        router: Arc<dyn DocRouter>,
    ) -> Self {
        Self::with_clock(core_name, config, client, index, router, Clock::system())
    }

    /// Builds the trackers with an explicit clock (tests pin it).
    pub fn with_clock(
        core_name: &str,
        config: TrackerConfig,
        client: Arc<dyn RepositoryClient>,
        index: Arc<dyn SearchIndex>,
        router: Arc<dyn DocRouter>,
        clock: Clock,
    ) -> Self {
        let shutdown = ShutdownFlag::new();

        let metadata = Arc::new(MetadataTracker::new(
            core_name,
            config.clone(),
            Arc::clone(&client),
            Arc::clone(&index),
            Arc::clone(&router),
            shutdown.clone(),
            clock.clone(),
        ));
        let acl = Arc::new(AclTracker::new(
            core_name,
            config.clone(),
            Arc::clone(&client),
            Arc::clone(&index),
            Arc::clone(&router),
            shutdown.clone(),
            clock.clone(),
        ));
        let content = Arc::new(ContentTracker::new(
            core_name,
            config.clone(),
            Arc::clone(&index),
            shutdown.clone(),
            clock.clone(),
        ));
        let cascade = config.cascade_tracking_enabled.then(|| {
            Arc::new(CascadeTracker::new(
                core_name,
                config.clone(),
                Arc::clone(&index),
                shutdown.clone(),
                clock.clone(),
            ))
        });
        let commit = Arc::new(CommitTracker::new(
            core_name,
            config,
            index,
            Arc::clone(&metadata),
            Arc::clone(&acl),
            Arc::clone(&content),
            cascade.clone(),
            shutdown.clone(),
            clock,
        ));

        Self {
            core_name: core_name.to_string(),
            metadata,
            acl,
            content,
            cascade,
            commit,
            shutdown,
        }
    }

    /// The core this registry serves.
    pub fn core_name(&self) -> &str {
        &self.core_name
    }

    /// The metadata tracker.
    pub fn metadata(&self) -> &Arc<MetadataTracker> {
        &self.metadata
    }

    /// The ACL tracker.
    pub fn acl(&self) -> &Arc<AclTracker> {
        &self.acl
    }

    /// The content tracker.
    pub fn content(&self) -> &Arc<ContentTracker> {
        &self.content
    }

    /// The cascade tracker, absent when cascade tracking is disabled.
    pub fn cascade(&self) -> Option<&Arc<CascadeTracker>> {
        self.cascade.as_ref()
    }

    /// The commit tracker.
    pub fn commit(&self) -> &Arc<CommitTracker> {
        &self.commit
    }

    /// Enables or disables one tracker type. Disabling a change-pull
    /// tracker drops its scheduled maintenance work.
    pub fn set_tracker_enabled(&self, tracker: TrackerType, enabled: bool) {
        match tracker {
            TrackerType::Metadata => self.metadata.set_enabled(enabled),
            TrackerType::Acl => self.acl.set_enabled(enabled),
            TrackerType::Content => self.content.set_enabled(enabled),
            TrackerType::Cascade => {
                if let Some(cascade) = &self.cascade {
                    cascade.set_enabled(enabled);
                }
            }
            TrackerType::Commit => self.commit.runner().set_enabled(enabled),
        }
    }

    /// Current shard health snapshot, tolerant of rebuilding states.
    pub fn shard_state(&self) -> ShardState {
        ShardState {
            core: self.core_name.clone(),
            metadata: self.metadata.state_snapshot(),
            acl: self.acl.state_snapshot(),
            content: self.content.state_snapshot(),
            cascade: self.cascade.as_ref().and_then(|c| c.state_snapshot()),
            rollback_count: self.commit.rollback_count(),
        }
    }

    /// Requests cooperative shutdown; in-flight cycles exit between work
    /// units without deadlocking their run locks.
    pub fn shutdown(&self) {
        tracing::info!(core = %self.core_name, "shutting down trackers");
        self.shutdown.trigger();
    }

    /// Whether shutdown has been requested.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

/// All cores hosted by this process.
#[derive(Default)]
pub struct CoreRegistry {
    cores: DashMap<String, Arc<TrackerRegistry>>,
}

impl CoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a core's trackers, replacing any previous registration.
    pub fn register(&self, registry: Arc<TrackerRegistry>) {
        self.cores
            .insert(registry.core_name().to_string(), registry);
    }

    /// Looks up a core's trackers.
    pub fn get(&self, core_name: &str) -> Option<Arc<TrackerRegistry>> {
        self.cores.get(core_name).map(|entry| Arc::clone(&entry))
    }

    /// Shuts a core down and removes it.
    pub fn remove(&self, core_name: &str) -> Option<Arc<TrackerRegistry>> {
        let removed = self.cores.remove(core_name).map(|(_, registry)| registry);
        if let Some(registry) = &removed {
            registry.shutdown();
        }
        removed
    }

    /// Registered core names.
    pub fn core_names(&self) -> Vec<String> {
        self.cores.iter().map(|entry| entry.key().clone()).collect()
    }
}
