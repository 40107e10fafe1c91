//! Bounded worker pool.
//!
//! A `WorkerPool` owns a multi-threaded Tokio runtime with a fixed number of
//! worker threads. Operations are written once as futures and then either
//! driven to completion on the caller's thread ([`WorkerPool::block_on`]) or
//! submitted to the workers ([`WorkerPool::spawn`]). Both forms block on the
//! same network I/O; the pooled form only moves *where* the wait happens.
//!
//! # Platform Notes
//!
//! `block_on` must not be called from inside an async context: doing so would
//! park a runtime thread. It returns [`TaskError::BlockingInAsyncContext`]
//! instead of panicking.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

/// Name given to the pool's worker threads.
const WORKER_THREAD_NAME: &str = "drive-worker";

/// Errors produced while scheduling or awaiting pooled work.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task was cancelled before completion")]
    Cancelled,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Blocking call issued from inside an async context; use the pooled form instead")]
    BlockingInAsyncContext,
}

impl From<JoinError> for TaskError {
    fn from(error: JoinError) -> Self {
        if error.is_cancelled() {
            return TaskError::Cancelled;
        }

        match error.try_into_panic() {
            Ok(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                TaskError::Panicked(message)
            }
            Err(_) => TaskError::Cancelled,
        }
    }
}

/// Bounded pool of worker threads.
pub struct WorkerPool {
    // Only `None` while dropping.
    runtime: Option<Runtime>,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()?;

        debug!(workers, "Started worker pool");

        Ok(Self {
            runtime: Some(runtime),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn runtime(&self) -> &Runtime {
        self.runtime
            .as_ref()
            .expect("worker pool runtime is only released on drop")
    }

    /// Handle onto the pool's runtime.
    pub fn handle(&self) -> &Handle {
        self.runtime().handle()
    }

    /// Drive `future` to completion on the calling thread.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, TaskError>
    where
        F: Future,
    {
        if Handle::try_current().is_ok() {
            return Err(TaskError::BlockingInAsyncContext);
        }

        Ok(self.runtime().block_on(future))
    }

    /// Submit `future` to the worker threads.
    pub fn spawn<F>(&self, future: F) -> PoolTask<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        PoolTask {
            handle: self.runtime().spawn(future),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // `shutdown_background` never blocks, so dropping the last handle
        // from inside an async context is safe.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish()
    }
}

/// Handle to work submitted with [`WorkerPool::spawn`].
///
/// Awaiting it yields the task's output. It can be awaited from any executor,
/// including another runtime or `futures::executor::block_on`.
#[derive(Debug)]
pub struct PoolTask<T> {
    handle: JoinHandle<T>,
}

impl<T> PoolTask<T> {
    /// Request cancellation. The task stops at its next suspension point,
    /// which drops any in-flight network call.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for PoolTask<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map_err(TaskError::from)
    }
}
