//! Bounded pool for blocking collaborator calls

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::collaborators::CollaboratorResult;
use crate::error::{PipelineError, Stage};

/// Runs CPU-bound work on tokio's blocking pool, at most `max_concurrency`
/// calls at a time
///
/// The permit travels with the blocking closure, so a caller that is
/// cancelled mid-call still holds its slot until the work finishes.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl WorkerPool {
    /// Create a pool; zero is treated as one
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Slots not currently held by a running call
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse new work; calls already running complete normally
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Run a collaborator call off the async scheduler
    pub async fn run<T, F>(&self, stage: Stage, f: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce() -> CollaboratorResult<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::WorkerAborted {
                stage,
                message: "worker pool is shut down".to_string(),
            })?;

        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(PipelineError::CollaboratorFailure { stage, source }),
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    let panic = join_error.into_panic();
                    panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker panicked".to_string())
                } else {
                    "worker cancelled".to_string()
                };
                tracing::error!(stage = %stage, "Collaborator worker aborted: {}", message);
                Err(PipelineError::WorkerAborted { stage, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_and_maps_errors() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.run(Stage::Decode, || Ok(41 + 1)).await.unwrap(), 42);

        let err = pool
            .run::<(), _>(Stage::Denoise, || Err(CollaboratorError::Failed("nope".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CollaboratorFailure { stage: Stage::Denoise, .. }));
    }

    #[tokio::test]
    async fn test_panic_becomes_worker_aborted() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run::<(), _>(Stage::SuggestChords, || panic!("model crashed"))
            .await
            .unwrap_err();
        match err {
            PipelineError::WorkerAborted { stage, message } => {
                assert_eq!(stage, Stage::SuggestChords);
                assert!(message.contains("model crashed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Permit is returned after a panic
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(Stage::ExtractFeatures, move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(1);
        pool.close();
        let err = pool.run(Stage::Decode, || Ok(())).await.unwrap_err();
        assert!(matches!(err, PipelineError::WorkerAborted { .. }));
    }
}
