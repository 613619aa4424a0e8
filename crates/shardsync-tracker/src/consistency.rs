//! Startup repository/index consistency check.
//!
//! Runs once per tracker-state lifetime (first cycle only) for each
//! change-pull engine. Distinguishes the two mismatch classes an operator
//! must tell apart: an index *behind* the repository is expected and
//! recovers by continued tracking; an index *ahead* of the repository means
//! the index was built against a different or newer repository state and
//! must be rebuilt.

use shardsync_core::config::TrackerConfig;
use shardsync_core::error::{Result, SyncError};
use shardsync_core::index::SearchIndex;
use shardsync_core::repository::RepositoryClient;
use shardsync_core::types::{ChangeUnitId, CommitTime, StoreSelector};

use crate::state::TrackerState;

/// Lower bound used when verifying the first indexed change unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FirstCheckFloor {
    /// Verify from the beginning of the stream.
    Default,
    /// Range-sharded instance: the first relevant unit commits at or after
    /// this time.
    From(CommitTime),
    /// Range-sharded instance whose id range holds no records yet; the
    /// first-unit check is meaningless and is skipped.
    Skip,
}

/// Performs the one-shot startup checks, mutating the state's check flags
/// and server-side watermark.
pub async fn check_repo_and_index_consistency(
    client: &dyn RepositoryClient,
    index: &dyn SearchIndex,
    selector: StoreSelector,
    config: &TrackerConfig,
    state: &mut TrackerState,
    first_check_floor: FirstCheckFloor,
) -> Result<()> {
    let (window_start, window_end) = config.initial_unit_window;

    if state.last_good_commit_time_in_index == CommitTime::ZERO {
        // Nothing indexed yet: seed the scan floor from the repository's
        // first unit and skip verification.
        state.checked_first_unit = true;
        state.checked_last_unit = true;
        tracing::info!(%selector, "no change units indexed, no verification required");

        let first = client
            .list_change_units(
                selector,
                None,
                Some(ChangeUnitId::new(window_start)),
                None,
                Some(ChangeUnitId::new(window_end)),
                1,
            )
            .await?
            .into_iter()
            .next();
        if let Some(first) = first {
            state.last_good_commit_time_in_index = first.commit_time;
            if let Some(latest) = client.latest_change_unit(selector).await? {
                state.last_on_server.advance_to(latest.watermark());
            }
        }
        return Ok(());
    }

    if !state.checked_first_unit {
        let since = match first_check_floor {
            FirstCheckFloor::Default => Some(CommitTime::ZERO),
            FirstCheckFloor::From(floor) => Some(floor),
            FirstCheckFloor::Skip => None,
        };
        if let Some(since) = since {
            let first = client
                .list_change_units(
                    selector,
                    Some(since),
                    Some(ChangeUnitId::ZERO),
                    None,
                    Some(ChangeUnitId::new(window_end)),
                    1,
                )
                .await?
                .into_iter()
                .next();
            if let Some(first) = first {
                match index.change_unit_count(selector, first.id).await? {
                    0 => {
                        tracing::error!(
                            %selector,
                            unit = %first.id,
                            commit_time = %first.commit_time,
                            "first change unit not found in index; the index and repository do not match. \
                             If this is a new or rebuilt repository the index must also be rebuilt."
                        );
                        return Err(SyncError::FirstUnitMissing {
                            id: first.id,
                            commit_time: first.commit_time,
                        });
                    }
                    1 => {
                        state.checked_first_unit = true;
                        tracing::info!(%selector, "verified first change unit and timestamp in index");
                    }
                    copies => {
                        tracing::warn!(
                            %selector,
                            unit = %first.id,
                            copies,
                            "duplicate initial change unit found, index will self-heal"
                        );
                    }
                }
            }
        }
    }

    if !state.checked_last_unit {
        if let Some(latest) = client.latest_change_unit(selector).await? {
            state.last_on_server.advance_to(latest.watermark());
            if let Some(index_max) = index.max_indexed_watermark(selector).await? {
                if index_max.commit_time > latest.commit_time {
                    tracing::error!(
                        %selector,
                        index_watermark = %index_max,
                        repository_watermark = %latest.watermark(),
                        "change unit found in index with timestamp later than any in the repository; \
                         the index was built ahead of the repository (e.g. against a stale backup) \
                         and must be rebuilt"
                    );
                    return Err(SyncError::IndexAheadOfRepository {
                        index: index_max,
                        repository: latest.watermark(),
                    });
                }
            }
            state.checked_last_unit = true;
            tracing::info!(
                %selector,
                "verified index watermark is at or behind the repository watermark"
            );
        }
    }

    Ok(())
}
