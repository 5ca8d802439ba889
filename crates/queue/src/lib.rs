//! Single-flight job queue.
//!
//! Every build requested anywhere in the process goes through one
//! [`JobQueue`]. The queue runs exactly one job at a time, strictly in
//! submission order, on a dedicated Tokio task. It is a global throttle and
//! not a per-key lock: two jobs for unrelated packages still wait on each
//! other, because they share the same sandboxed build environment.
//!
//! [`JobQueue::submit`] enqueues immediately and returns a [`JobHandle`]; the
//! handle resolves to whatever the operation returned, so an operation that
//! itself returns a `Result` gets that `Result` back unchanged. A failing or
//! panicking job only ever affects its own submitter.
//!
//! ```
//! use compdb_queue::JobQueue;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = JobQueue::new();
//! let first = queue.submit(async { 1 + 1 });
//! let second = queue.submit(async { "second" });
//! assert_eq!(first.await?, 2);
//! assert_eq!(second.await?, "second");
//! # Ok(())
//! # }
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

type Job = BoxFuture<'static, ()>;

/// Handle to the shared single-flight queue.
///
/// Cloning is cheap and every clone feeds the same worker. The worker stops
/// once every handle has been dropped and the backlog is drained.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl JobQueue {
    /// Create a queue and spawn its worker.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(drain(receiver));
        Self { sender, pending: Arc::new(AtomicUsize::new(0)) }
    }

    /// Append `operation` to the queue.
    ///
    /// The job is enqueued before this function returns, so the order of
    /// `submit` calls is the order of execution. Dropping the returned handle
    /// does not cancel the job; cancellation has to be threaded through the
    /// operation itself.
    pub fn submit<F>(&self, operation: F) -> JobHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        let ahead = pending.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(ahead, "Job queued");

        let job = async move {
            let outcome = AssertUnwindSafe(operation).catch_unwind().await;
            pending.fetch_sub(1, Ordering::AcqRel);
            if outcome.is_err() {
                tracing::warn!("Queued job panicked; continuing with the next one");
            }
            // The submitter may have stopped waiting; its result goes with it.
            _ = sender.send(outcome);
        }
        .boxed();

        // On failure the rejected job (and the oneshot sender inside it) is
        // dropped here, which resolves the handle to `Closed`.
        if self.sender.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        JobHandle { receiver }
    }

    /// Number of jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("pending", &self.pending()).finish()
    }
}

async fn drain(mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = receiver.recv().await {
        job.await;
    }
    tracing::trace!("Job queue closed");
}

/// Resolves to the output of one submitted job.
#[must_use = "the job runs regardless, but its result is only observable through the handle"]
pub struct JobHandle<T> {
    receiver: oneshot::Receiver<std::thread::Result<T>>,
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(_panic))) => Poll::Ready(Err(exn::Exn::from(ErrorKind::Panicked))),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(exn::Exn::from(ErrorKind::Closed))),
        }
    }
}
