//! Bounded parallel fan-out for apply work.
//!
//! Sub-batches inside one change-unit batch are independent and unordered;
//! only the watermark advance after the whole batch is ordered. The pool is
//! bounded so a wide batch cannot exhaust the runtime.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use shardsync_core::error::{Result, SyncError};

/// Runs one worker future per item, at most `parallelism` at a time, and
/// waits for all of them. Join results are returned in completion order.
pub async fn run_bounded<T, F, Fut>(parallelism: usize, items: Vec<T>, mut worker: F) -> Vec<Result<()>>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for item in items {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("worker semaphore closed");
        let fut = worker(item);
        tasks.spawn(async move {
            let _permit = permit;
            fut.await
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(match joined {
            Ok(result) => result,
            Err(join_error) => Err(SyncError::Index(format!(
                "apply worker panicked: {join_error}"
            ))),
        });
    }
    results
}

/// Collapses worker results to the first failure, preferring shutdown so a
/// stopping cycle is not misclassified as a rollback cause.
pub fn first_failure(results: Vec<Result<()>>) -> Result<usize> {
    let total = results.len();
    let mut failure = None;
    for result in results {
        match result {
            Ok(()) => {}
            Err(error) if error.is_shutdown() => return Err(error),
            Err(error) => {
                if failure.is_none() {
                    failure = Some(error);
                }
            }
        }
    }
    match failure {
        Some(error) => Err(error),
        None => Ok(total),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_all_items_processed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let results = run_bounded(4, (0..20).collect::<Vec<_>>(), |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert_eq!(results.len(), 20);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(first_failure(results).unwrap(), 20);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded(3, (0..12).collect::<Vec<_>>(), |_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_first_failure_surfaces_error() {
        let results = run_bounded(2, vec![1, 2, 3], |n| async move {
            if n == 2 {
                Err(SyncError::Index("bad record".into()))
            } else {
                Ok(())
            }
        })
        .await;
        let err = first_failure(results).unwrap_err();
        assert!(err.to_string().contains("bad record"));
    }

    #[tokio::test]
    async fn test_shutdown_outranks_other_failures() {
        let results = vec![
            Err(SyncError::Index("bad".into())),
            Err(SyncError::Shutdown),
            Ok(()),
        ];
        assert!(first_failure(results).unwrap_err().is_shutdown());
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_error() {
        let results = run_bounded(2, vec![1], |n| async move {
            if n == 1 {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        let err = first_failure(results).unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}
