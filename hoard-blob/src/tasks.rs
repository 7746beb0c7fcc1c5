use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Runs deferred work detached from the request that scheduled it.
///
/// Tasks are tracked so shutdown can wait for every one of them, and a
/// semaphore bounds how many run at once.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl TaskRunner {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Spawn `task`; it waits for a permit before running.
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            // The semaphore is never closed, so acquire cannot fail
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            debug!("Running background task: {}", label);
            task.await;
        });
    }

    /// Tasks spawned and not yet finished
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task spawned so far. New tasks may still be spawned.
    pub async fn drain(&self) {
        let pending = self.tracker.len();
        if pending > 0 {
            info!("Waiting for {} background task(s)", pending);
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
