//! Shard-state and index-health reporting.
//!
//! Read-only views for the administrative surface: a snapshot of every
//! tracker's cursor state, and a repository walk that reports change units
//! missing from or duplicated in the index.

use serde::Serialize;

use shardsync_core::config::TrackerConfig;
use shardsync_core::error::Result;
use shardsync_core::index::SearchIndex;
use shardsync_core::repository::RepositoryClient;
use shardsync_core::types::{ChangeUnitId, CommitTime, StoreSelector};

use crate::found::FoundWindow;
use crate::pull::pull_next_window;
use crate::state::TrackerStateSnapshot;

/// Health snapshot of one shard instance's trackers. Any tracker may be
/// rebuilding (None) while a rollback resynchronizes it.
#[derive(Clone, Debug, Serialize)]
pub struct ShardState {
    /// Core name.
    pub core: String,
    /// Metadata tracker state.
    pub metadata: Option<TrackerStateSnapshot>,
    /// ACL tracker state.
    pub acl: Option<TrackerStateSnapshot>,
    /// Content tracker state.
    pub content: Option<TrackerStateSnapshot>,
    /// Cascade tracker state (absent when cascade tracking is disabled).
    pub cascade: Option<TrackerStateSnapshot>,
    /// Rollbacks performed since startup.
    pub rollback_count: u64,
}

/// Result of walking a change stream against the index.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexHealthReport {
    /// Change units examined.
    pub checked: u64,
    /// Units present in the repository but absent from the index.
    pub missing: Vec<ChangeUnitId>,
    /// Units indexed more than once (self-healing, but worth surfacing).
    pub duplicated: Vec<ChangeUnitId>,
    /// Lowest unit id examined.
    pub min_id: Option<ChangeUnitId>,
    /// Highest unit id examined.
    pub max_id: Option<ChangeUnitId>,
}

impl IndexHealthReport {
    /// True when every examined unit is present exactly once.
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty()
    }
}

/// Walks the selected change stream and reports units missing from or
/// duplicated in the index. Bounds are optional: `to_id`/`to_time` clamp the
/// walk, `from_time` overrides the start.
pub async fn check_index(
    client: &dyn RepositoryClient,
    index: &dyn SearchIndex,
    selector: StoreSelector,
    config: &TrackerConfig,
    from_time: Option<CommitTime>,
    to_time: Option<CommitTime>,
    to_id: Option<ChangeUnitId>,
    now: CommitTime,
) -> Result<IndexHealthReport> {
    let mut report = IndexHealthReport::default();
    let mut found = FoundWindow::new(config.found_window_size);
    let stop = now.plus_millis(config.hole_retention_ms);
    let mut cursor = from_time.unwrap_or(CommitTime::ZERO);

    'walk: loop {
        let units = pull_next_window(
            client,
            selector,
            &found,
            cursor,
            config.time_step_ms,
            config.max_units_per_pull,
            stop,
        )
        .await?;
        if units.is_empty() {
            break;
        }
        for unit in units {
            if to_time.is_some_and(|bound| unit.commit_time > bound) {
                break 'walk;
            }
            if to_id.is_some_and(|bound| unit.id > bound) {
                break 'walk;
            }

            report.checked += 1;
            report.min_id = Some(report.min_id.map_or(unit.id, |min| min.min(unit.id)));
            report.max_id = Some(report.max_id.map_or(unit.id, |max| max.max(unit.id)));

            match index.change_unit_count(selector, unit.id).await? {
                0 => report.missing.push(unit.id),
                1 => {}
                _ => report.duplicated.push(unit.id),
            }

            cursor = unit.commit_time;
            found.add(unit);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use shardsync_core::memory::{MemoryIndex, MemoryRepository};
    use shardsync_core::types::ChangeUnit;

    use super::*;

    fn unit(id: u64, time: u64) -> ChangeUnit {
        ChangeUnit::new(ChangeUnitId::new(id), CommitTime::from_millis(time), 1, 0)
    }

    async fn seed(repo: &MemoryRepository, index: &MemoryIndex, ids: &[(u64, u64, bool)]) {
        for (id, time, indexed) in ids {
            repo.push_unit(StoreSelector::Metadata, unit(*id, *time));
            if *indexed {
                index
                    .apply_change_unit(StoreSelector::Metadata, &unit(*id, *time), true)
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_healthy_index() {
        let repo = MemoryRepository::new();
        let index = MemoryIndex::new();
        seed(&repo, &index, &[(1, 100, true), (2, 200, true)]).await;

        let report = check_index(
            &repo,
            &index,
            StoreSelector::Metadata,
            &TrackerConfig::default(),
            None,
            None,
            None,
            CommitTime::from_millis(10_000),
        )
        .await
        .unwrap();

        assert!(report.is_healthy());
        assert_eq!(report.checked, 2);
        assert_eq!(report.min_id, Some(ChangeUnitId::new(1)));
        assert_eq!(report.max_id, Some(ChangeUnitId::new(2)));
    }

    #[tokio::test]
    async fn test_missing_and_duplicated_units_reported() {
        let repo = MemoryRepository::new();
        let index = MemoryIndex::new();
        seed(
            &repo,
            &index,
            &[(1, 100, true), (2, 200, false), (3, 300, true)],
        )
        .await;
        index.inject_duplicate_unit(StoreSelector::Metadata, ChangeUnitId::new(3));

        let report = check_index(
            &repo,
            &index,
            StoreSelector::Metadata,
            &TrackerConfig::default(),
            None,
            None,
            None,
            CommitTime::from_millis(10_000),
        )
        .await
        .unwrap();

        assert!(!report.is_healthy());
        assert_eq!(report.missing, vec![ChangeUnitId::new(2)]);
        assert_eq!(report.duplicated, vec![ChangeUnitId::new(3)]);
    }

    #[tokio::test]
    async fn test_bounds_clamp_the_walk() {
        let repo = MemoryRepository::new();
        let index = MemoryIndex::new();
        seed(
            &repo,
            &index,
            &[(1, 100, true), (2, 200, true), (3, 300, true)],
        )
        .await;

        let report = check_index(
            &repo,
            &index,
            StoreSelector::Metadata,
            &TrackerConfig::default(),
            None,
            None,
            Some(ChangeUnitId::new(2)),
            CommitTime::from_millis(10_000),
        )
        .await
        .unwrap();
        assert_eq!(report.checked, 2);

        let report = check_index(
            &repo,
            &index,
            StoreSelector::Metadata,
            &TrackerConfig::default(),
            None,
            Some(CommitTime::from_millis(150)),
            None,
            CommitTime::from_millis(10_000),
        )
        .await
        .unwrap();
        assert_eq!(report.checked, 1);
    }
}
