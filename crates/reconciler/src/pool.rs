//! Bounded worker pool for convergence tasks.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// A unit of work handed to the pool.
pub type Job = BoxFuture<'static, ()>;

struct Task {
    repo: String,
    job: Job,
    token: TaskTrackerToken,
}

/// Fixed number of workers sharing one bounded queue.
///
/// Every accepted job holds a token of the outstanding-task counter from
/// submission until it finishes, so [`WorkerPool::wait_idle`] and
/// [`WorkerPool::shutdown`] see queued work as well as running work.
pub struct WorkerPool {
    tx: mpsc::Sender<Task>,
    tracker: TaskTracker,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers over a queue holding up to `queue_size` jobs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if either bound is zero.
    pub fn new(size: usize, queue_size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_config("worker pool size must be bigger than 0"));
        }
        if queue_size == 0 {
            return Err(Error::invalid_config("worker queue size must be bigger than 0"));
        }

        let (tx, rx) = mpsc::channel::<Task>(queue_size);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..size)
            .map(|id| tokio::spawn(worker(id, rx.clone())))
            .collect();

        info!(size, queue_size, "Started worker pool");
        Ok(Self {
            tx,
            tracker: TaskTracker::new(),
            workers,
        })
    }

    /// Queue a job without waiting.
    ///
    /// # Errors
    ///
    /// Returns `DispatchRejected` when the queue is full or the pool is
    /// closed. The job is dropped.
    pub fn submit(&self, repo: &str, job: Job) -> Result<()> {
        let task = Task {
            repo: repo.to_string(),
            job,
            token: self.tracker.token(),
        };

        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::dispatch_rejected(repo, "saturated"),
            mpsc::error::TrySendError::Closed(_) => Error::dispatch_rejected(repo, "closed"),
        })
    }

    /// Jobs accepted and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every accepted job has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Close the queue, wait for outstanding jobs and join the workers.
    pub async fn shutdown(self) {
        let Self {
            tx,
            tracker,
            workers,
        } = self;
        drop(tx);

        tracker.close();
        tracker.wait().await;

        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker exited abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker(id: usize, rx: Arc<Mutex<mpsc::Receiver<Task>>>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(Task { repo, job, token }) = next else {
            break;
        };

        // A panicking job only takes down its own task.
        if let Err(e) = tokio::spawn(job).await {
            error!(worker = id, repo = %repo, error = %e, "Convergence task aborted");
        }
        drop(token);
    }
    debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(matches!(WorkerPool::new(0, 1), Err(Error::InvalidConfig { .. })));
        assert!(matches!(WorkerPool::new(1, 0), Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_jobs_run_and_counter_drains() {
        let pool = WorkerPool::new(2, 16).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let done = done.clone();
            pool.submit(&format!("repo{i}"), async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
            .boxed())
            .unwrap();
        }

        pool.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(pool.outstanding(), 0);

        // Still accepts work after going idle.
        pool.submit("again", async {}.boxed()).unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        pool.submit("busy", async move {
            started_tx.send(()).ok();
            release_rx.await.ok();
        }
        .boxed())
        .unwrap();
        started_rx.await.unwrap();

        pool.submit("queued", async {}.boxed()).unwrap();
        let err = pool.submit("rejected", async {}.boxed()).unwrap_err();

        assert_eq!(err, Error::dispatch_rejected("rejected", "saturated"));
        assert_eq!(pool.outstanding(), 2);

        release_tx.send(()).unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_job_is_isolated() {
        let pool = WorkerPool::new(1, 4).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit("boom", async { panic!("boom") }.boxed()).unwrap();
        let counter = done.clone();
        pool.submit("fine", async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed())
        .unwrap();

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_jobs() {
        let pool = WorkerPool::new(3, 8).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let done = done.clone();
            pool.submit(&format!("repo{i}"), async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
            .boxed())
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
    }
}
