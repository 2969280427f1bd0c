//! # Job Queue
//!
//! A single FIFO worker: jobs run one at a time, in the order they were
//! enqueued, on one background task. A job that returns an error or panics
//! only fails its own caller; the worker moves on to the next job.
//!
//! ```rust,ignore
//! let queue = JobQueue::new();
//! let uploaded = queue.enqueue("upload", async move { run_batch().await }).await?;
//! ```
//!
//! The worker is spawned on the first `enqueue`, so a queue can be built
//! outside a Tokio runtime.

use crate::{Result, SyncError};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

struct QueuedJob {
    label: &'static str,
    run: BoxFuture<'static, ()>,
}

/// FIFO serializer for sync batches.
pub struct JobQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    pending: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Jobs waiting or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Append `job` and wait for its output.
    ///
    /// Fails with [`SyncError::Internal`] when the job panicked.
    pub async fn enqueue<F, T>(&self, label: &'static str, job: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        let run = async move {
            let output = job.await;
            pending.fetch_sub(1, Ordering::SeqCst);
            // The caller may have stopped waiting.
            let _ = tx.send(output);
        }
        .boxed();

        self.submit(QueuedJob { label, run })?;
        rx.await
            .map_err(|_| SyncError::Internal(format!("queued {label} job did not complete")))
    }

    fn submit(&self, job: QueuedJob) -> Result<()> {
        let mut sender = self.sender.lock();
        let live = sender.as_ref().filter(|tx| !tx.is_closed()).cloned();
        let tx = match live {
            Some(tx) => tx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_worker(rx, Arc::clone(&self.pending)));
                *sender = Some(tx.clone());
                tx
            }
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        tx.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            SyncError::Internal("job queue worker stopped".to_string())
        })
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<QueuedJob>, pending: Arc<AtomicUsize>) {
    while let Some(job) = rx.recv().await {
        debug!(job = job.label, "Running queued job");
        if AssertUnwindSafe(job.run).catch_unwind().await.is_err() {
            pending.fetch_sub(1, Ordering::SeqCst);
            error!(job = job.label, "Queued job panicked; continuing with the next job");
        }
    }
}
