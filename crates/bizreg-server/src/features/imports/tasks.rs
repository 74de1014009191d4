//! Background commit jobs
//!
//! Every commit-mode import runs on a task owned by [`ImportTasks`], so
//! shutdown can wait for jobs in flight instead of dropping them with the
//! runtime. Jobs that outlive the grace period are cancelled and record
//! themselves as `failed`.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How long cancelled jobs get to save their final state
const CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ImportTasks {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl ImportTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token a job polls to learn the server is going away
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(job);
    }

    /// Number of jobs still running
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Waits up to `grace` for running jobs, then cancels the rest.
    ///
    /// Returns `true` when every job finished on its own.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        if self.tracker.is_empty() {
            return true;
        }

        info!(
            running = self.tracker.len(),
            "Waiting up to {}s for imports to finish",
            grace.as_secs()
        );
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            info!("All imports finished");
            return true;
        }

        warn!(running = self.tracker.len(), "Cancelling unfinished imports");
        self.cancel.cancel();
        if tokio::time::timeout(CANCEL_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                running = self.tracker.len(),
                "Imports did not stop after cancellation"
            );
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_waits_for_running_jobs() {
        let tasks = ImportTasks::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(tasks.running(), 1);

        assert!(tasks.shutdown(Duration::from_secs(5)).await);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(tasks.running(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_jobs_past_grace() {
        let tasks = ImportTasks::new();
        let token = tasks.cancellation();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        tasks.spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!tasks.shutdown(Duration::from_millis(10)).await);
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(tasks.running(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_running() {
        assert!(ImportTasks::new().shutdown(Duration::ZERO).await);
    }
}
