//! ---
//! psoak_section: "06-orchestration"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Bounded worker pool for concurrent phases."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use psoak_api::{HarnessError, HarnessResult};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runs phase work on tokio tasks, at most `concurrency` at a time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Dispatch `work(item)` for every item and wait for all of them.
    ///
    /// Every dispatched task is awaited even after a failure. Results come back
    /// in dispatch order; the first failure in that order is returned.
    pub async fn run_all<I, T, F, Fut>(&self, items: Vec<I>, work: F) -> HarnessResult<Vec<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = HarnessResult<T>> + Send + 'static,
    {
        let mut handles: Vec<JoinHandle<HarnessResult<T>>> = Vec::with_capacity(items.len());
        for item in items {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    let dispatch_err = HarnessError::Worker(format!("worker pool closed: {err}"));
                    return Err(drain(handles).await.err().unwrap_or(dispatch_err));
                }
            };
            let task = work(item);
            handles.push(tokio::spawn(async move {
                let result = task.await;
                drop(permit);
                result
            }));
        }
        debug!(dispatched = handles.len(), "waiting for phase barrier");
        drain(handles).await
    }
}

async fn drain<T>(handles: Vec<JoinHandle<HarnessResult<T>>>) -> HarnessResult<Vec<T>> {
    let joined = join_all(handles).await;
    let mut results = Vec::with_capacity(joined.len());
    let mut first_error = None;
    for (index, joined) in joined.into_iter().enumerate() {
        let outcome = match joined {
            Ok(result) => result,
            Err(join_err) => Err(HarnessError::Worker(join_err.to_string())),
        };
        match outcome {
            Ok(value) => results.push(value),
            Err(err) => {
                warn!(index, kind = err.kind(), error = %err, "worker failed");
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_concurrency() {
        let pool = WorkerPool::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let results = pool
            .run_all((0..20).collect(), |i: usize| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(i * 2)
                }
            })
            .await
            .unwrap();
        assert_eq!(results, (0..20).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waits_for_everything_and_reports_first_failure() {
        let pool = WorkerPool::new(4);
        let finished = Arc::new(AtomicUsize::new(0));
        let err = pool
            .run_all((0..10).collect(), |i: usize| {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10 - i as u64)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    if i == 3 || i == 7 {
                        Err(HarnessError::remote("create_resource", format!("item {i}")))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap_err();
        assert_eq!(finished.load(Ordering::SeqCst), 10);
        assert_eq!(err, HarnessError::remote("create_resource", "item 3"));
    }

    #[tokio::test]
    async fn panics_surface_as_worker_errors() {
        let pool = WorkerPool::new(2);
        let err = pool
            .run_all(vec![1usize], |i| async move {
                if i == 1 {
                    panic!("boom");
                }
                Ok::<(), HarnessError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "worker");
    }
}
