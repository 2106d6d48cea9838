//! Shared worker pool for SDK callbacks and deferred work.
//!
//! Backed by a dedicated tokio multi-thread runtime so that callers do not
//! need one of their own. Results come back as [`QiFuture`]s. Jobs run on
//! the runtime's blocking threads, capped at the configured worker count.
//! A [`SerialQueue`] runs its jobs one at a time, in posting order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use qi_core::QiError;
use qi_resolve::{Promise, QiFuture};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Owned worker pool. Dropping it stops accepting work without waiting for
/// running jobs.
pub struct QiThreadPool {
    runtime: Option<Runtime>,
    handle: Handle,
    workers: usize,
}

impl std::fmt::Debug for QiThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QiThreadPool")
            .field("workers", &self.workers)
            .finish()
    }
}

impl QiThreadPool {
    /// Start a pool with `workers` threads.
    pub fn new(workers: usize) -> Result<Self, QiError> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .thread_name("qi-pool")
            .build()
            .map_err(|e| QiError::Internal(format!("failed to start thread pool: {e}")))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            workers,
        })
    }

    /// Run `job` on the pool.
    ///
    /// An error returned by the job, or a panic, fails the future and is
    /// logged.
    pub fn execute<V, F>(&self, job: F) -> QiFuture<V>
    where
        V: Clone + Send + 'static,
        F: FnOnce() -> Result<V, QiError> + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        let _ = self.handle.spawn_blocking(move || run_job(&promise, job));
        future
    }

    /// Run `job` on the pool after `delay`.
    ///
    /// Requesting cancellation of the returned future before the delay
    /// elapses aborts the job and settles the future as cancelled.
    pub fn schedule<V, F>(&self, job: F, delay: Duration) -> QiFuture<V>
    where
        V: Clone + Send + 'static,
        F: FnOnce() -> Result<V, QiError> + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        let token = CancellationToken::new();

        let cancel = token.clone();
        promise.set_on_cancel(move |p| {
            cancel.cancel();
            let _ = p.set_cancelled();
        });

        let _ = self.handle.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tokio::task::spawn_blocking(move || run_job(&promise, job)).await;
                }
            }
        });
        future
    }

    /// A future that succeeds after `delay`.
    pub fn delay(&self, delay: Duration) -> QiFuture<()> {
        self.schedule(|| Ok(()), delay)
    }

    /// A new queue whose jobs run on this pool strictly one after another.
    pub fn serial_queue(&self) -> SerialQueue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let _ = self.handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                let ran = tokio::task::spawn_blocking(move || catch_unwind(AssertUnwindSafe(job)));
                if !matches!(ran.await, Ok(Ok(()))) {
                    error!("serial job panicked");
                }
            }
        });
        SerialQueue { tx }
    }

    /// Maximum number of jobs running at once.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Handle to the underlying runtime, for async consumers.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// FIFO lane onto a [`QiThreadPool`], created by
/// [`QiThreadPool::serial_queue`].
///
/// A job starts only after the previous one has returned. Dropping the
/// queue lets already posted jobs finish.
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    /// Append `job`. Returns `false` once the pool has shut down.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let posted = self.tx.send(Box::new(job)).is_ok();
        if !posted {
            debug!("pool shut down, serial job dropped");
        }
        posted
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl Drop for QiThreadPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn run_job<V, F>(promise: &Promise<V>, job: F)
where
    V: Clone + Send + 'static,
    F: FnOnce() -> Result<V, QiError>,
{
    // the promise may already be cancelled
    let _ = match catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => promise.set_value(value),
        Ok(Err(err)) => {
            error!(error = %err, "pool job failed");
            promise.set_error(err)
        }
        Err(_) => {
            error!("pool job panicked");
            promise.set_error(QiError::Internal("pool job panicked".into()))
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
