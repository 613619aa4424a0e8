//! Hole-retention window scan.
//!
//! Steps forward in time from the scan floor, doubling the window width on
//! every empty or already-consumed result (capped at 32 days), until a
//! novel, non-empty result set is found or the window start passes the stop
//! bound. The bounded widening catches up quickly over idle gaps without
//! scanning day by day, while the found-window check prevents re-returning a
//! window already consumed.

use shardsync_core::config::TIME_STEP_32_DAYS_MS;
use shardsync_core::error::Result;
use shardsync_core::repository::RepositoryClient;
use shardsync_core::types::{ChangeUnit, CommitTime, StoreSelector};

use crate::found::FoundWindow;

/// Fetches the next window of change units after `from`.
///
/// Returns an empty vector when the scan reached `stop_time` without finding
/// anything new; the remainder is naturally picked up next cycle.
pub async fn pull_next_window(
    client: &dyn RepositoryClient,
    selector: StoreSelector,
    found: &FoundWindow,
    from: CommitTime,
    time_step_ms: u64,
    max_units: usize,
    stop_time: CommitTime,
) -> Result<Vec<ChangeUnit>> {
    let mut start = from;
    let mut step = time_step_ms.max(1);

    loop {
        let units = client
            .list_change_units(
                selector,
                Some(start),
                None,
                Some(start.plus_millis(step)),
                None,
                max_units,
            )
            .await?;
        start = start.plus_millis(step);
        step = (step.saturating_mul(2)).min(TIME_STEP_32_DAYS_MS);

        if units.is_empty() {
            if start < stop_time {
                continue;
            }
            return Ok(units);
        }
        if found.already_seen_all(&units) {
            continue;
        }
        return Ok(units);
    }
}

/// Splits eligible units into apply batches, closing a batch once its
/// accumulated update+delete count would exceed the threshold.
pub fn batch_by_work_size(units: Vec<ChangeUnit>, threshold: u64) -> Vec<Vec<ChangeUnit>> {
    let mut batches = Vec::new();
    let mut current: Vec<ChangeUnit> = Vec::new();
    let mut work = 0u64;
    for unit in units {
        let size = unit.work_size();
        if !current.is_empty() && work + size > threshold {
            batches.push(std::mem::take(&mut current));
            work = 0;
        }
        work += size;
        current.push(unit);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use shardsync_core::memory::MemoryRepository;
    use shardsync_core::types::ChangeUnitId;

    use super::*;

    fn unit(id: u64, time: u64) -> ChangeUnit {
        ChangeUnit::new(ChangeUnitId::new(id), CommitTime::from_millis(time), 1, 0)
    }

    #[tokio::test]
    async fn test_finds_units_in_first_window() {
        let repo = MemoryRepository::new();
        repo.push_unit(StoreSelector::Metadata, unit(1, 500));

        let found = FoundWindow::new(10);
        let units = pull_next_window(
            &repo,
            StoreSelector::Metadata,
            &found,
            CommitTime::ZERO,
            1000,
            100,
            CommitTime::from_millis(10_000),
        )
        .await
        .unwrap();
        assert_eq!(units.len(), 1);
    }

    #[tokio::test]
    async fn test_widens_over_idle_gap() {
        let repo = MemoryRepository::new();
        // A unit far beyond the initial one-second step; the exponential
        // widening must reach it without a day-by-day crawl.
        repo.push_unit(StoreSelector::Metadata, unit(1, 5_000_000));

        let found = FoundWindow::new(10);
        let units = pull_next_window(
            &repo,
            StoreSelector::Metadata,
            &found,
            CommitTime::ZERO,
            1000,
            100,
            CommitTime::from_millis(10_000_000),
        )
        .await
        .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id, ChangeUnitId::new(1));
    }

    #[tokio::test]
    async fn test_stops_at_bound_when_quiet() {
        let repo = MemoryRepository::new();
        let found = FoundWindow::new(10);
        let units = pull_next_window(
            &repo,
            StoreSelector::Metadata,
            &found,
            CommitTime::ZERO,
            1000,
            100,
            CommitTime::from_millis(5_000),
        )
        .await
        .unwrap();
        assert!(units.is_empty());
    }

    #[tokio::test]
    async fn test_skips_already_consumed_window() {
        let repo = MemoryRepository::new();
        repo.push_unit(StoreSelector::Metadata, unit(1, 100));
        repo.push_unit(StoreSelector::Metadata, unit(2, 200));
        repo.push_unit(StoreSelector::Metadata, unit(3, 900_000));

        let mut found = FoundWindow::new(10);
        found.add(unit(1, 100));
        found.add(unit(2, 200));

        let units = pull_next_window(
            &repo,
            StoreSelector::Metadata,
            &found,
            CommitTime::ZERO,
            1000,
            100,
            CommitTime::from_millis(1_000_000),
        )
        .await
        .unwrap();
        // The first window only holds consumed units; the scan widens past
        // it and returns the novel one.
        assert!(units.iter().any(|u| u.id == ChangeUnitId::new(3)));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let repo = MemoryRepository::new();
        repo.fail_next("connection reset");
        let found = FoundWindow::new(10);
        let err = pull_next_window(
            &repo,
            StoreSelector::Metadata,
            &found,
            CommitTime::ZERO,
            1000,
            100,
            CommitTime::from_millis(1000),
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_batch_by_work_size() {
        let units = vec![
            ChangeUnit::new(ChangeUnitId::new(1), CommitTime::from_millis(1), 3, 0),
            ChangeUnit::new(ChangeUnitId::new(2), CommitTime::from_millis(2), 3, 0),
            ChangeUnit::new(ChangeUnitId::new(3), CommitTime::from_millis(3), 3, 0),
            ChangeUnit::new(ChangeUnitId::new(4), CommitTime::from_millis(4), 1, 0),
        ];
        let batches = batch_by_work_size(units, 6);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 2);
    }

    #[test]
    fn test_batch_oversized_unit_gets_own_batch() {
        let units = vec![
            ChangeUnit::new(ChangeUnitId::new(1), CommitTime::from_millis(1), 100, 0),
            ChangeUnit::new(ChangeUnitId::new(2), CommitTime::from_millis(2), 1, 0),
        ];
        let batches = batch_by_work_size(units, 10);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].id, ChangeUnitId::new(1));
    }

    #[tokio::test]
    async fn test_hole_retention_convergence() {
        // Units scattered arbitrarily in [0, T]: repeated pulls (no new
        // writes) visit every unit exactly once.
        let repo = MemoryRepository::new();
        let times = [50u64, 120, 3_600, 90_000, 90_001, 2_500_000];
        for (i, t) in times.iter().enumerate() {
            repo.push_unit(StoreSelector::Metadata, unit(i as u64 + 1, *t));
        }

        let mut found = FoundWindow::new(100);
        let mut seen = Vec::new();
        let stop = CommitTime::from_millis(3_000_000);
        loop {
            let from = found.last().map(|u| u.commit_time).unwrap_or(CommitTime::ZERO);
            let units = pull_next_window(
                &repo,
                StoreSelector::Metadata,
                &found,
                from,
                1000,
                100,
                stop,
            )
            .await
            .unwrap();
            if units.is_empty() {
                break;
            }
            for u in units {
                if !seen.contains(&u.id) {
                    seen.push(u.id);
                }
                found.add(u);
            }
        }
        assert_eq!(seen.len(), times.len());
    }
}
