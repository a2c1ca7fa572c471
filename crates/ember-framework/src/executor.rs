//! Bounded worker pool for threaded handlers and tasks.
//!
//! Jobs are queued on an unbounded channel and handed to tokio's blocking
//! thread pool by a single dispatcher task. A job is not handed off until the
//! one before it is running on a worker thread, so jobs start in submission
//! order; at most `size` run at once. Every submission returns a
//! [`PendingReply`] that resolves when the job finishes.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{BoxError, HandlerError};
use crate::handler::invoke;
use crate::reply::Reply;

/// Default number of concurrently running jobs.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// A reply that may not be available yet. `None` means "no action".
pub type PendingReply = BoxFuture<'static, Option<Reply>>;

/// A reply that is already known.
pub fn ready(reply: Option<Reply>) -> PendingReply {
    future::ready(reply).boxed()
}

type Job = Box<dyn FnOnce() -> Option<Reply> + Send>;

struct Submission {
    label: String,
    job: Job,
    done: oneshot::Sender<Option<Reply>>,
}

/// FIFO worker pool backed by `spawn_blocking`.
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Submission>,
    size: usize,
    dispatcher: JoinHandle<()>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool running at most `size` jobs at once.
    ///
    /// Must be called from within a Tokio runtime. A size of zero is raised
    /// to one.
    pub fn new(size: usize) -> Arc<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(rx, Arc::new(Semaphore::new(size))));
        debug!(size, "Worker pool started");
        Arc::new(Self {
            tx,
            size,
            dispatcher,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues `f` and returns its pending reply.
    ///
    /// Errors and panics inside `f` are logged under `label` and resolve to
    /// `None`.
    pub fn submit<F>(&self, label: impl Into<String>, f: F) -> PendingReply
    where
        F: FnOnce() -> Result<Reply, BoxError> + Send + 'static,
    {
        let label = label.into();
        let (done, rx) = oneshot::channel();
        let job_label = label.clone();
        let submission = Submission {
            label: label.clone(),
            job: Box::new(move || invoke(&job_label, f)),
            done,
        };

        if self.tx.send(submission).is_err() {
            error!(error = %HandlerError::PoolClosed { label }, "Job dropped");
            return ready(None);
        }

        async move {
            match rx.await {
                Ok(reply) => reply,
                Err(_) => {
                    error!(error = %HandlerError::PoolClosed { label }, "Job lost");
                    None
                }
            }
        }
        .boxed()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Submission>, permits: Arc<Semaphore>) {
    while let Some(Submission { label, job, done }) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let (started_tx, started_rx) = oneshot::channel();
        let worker = tokio::task::spawn_blocking(move || {
            let _ = started_tx.send(());
            job()
        });
        // Hold back the next job until this one is on a worker thread.
        if started_rx.await.is_err() {
            debug!(handler = %label, "Job cancelled before it started");
        }

        tokio::spawn(async move {
            let outcome = worker.await;
            drop(permit);
            let reply = outcome.unwrap_or_else(|e| {
                error!(handler = %label, error = %e, "Worker thread failed");
                None
            });
            let _ = done.send(reply);
        });
    }
}
