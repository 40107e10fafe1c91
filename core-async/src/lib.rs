//! Runtime facade for the drive connection core.
//!
//! All core-* and provider-* crates depend on this crate instead of naming
//! tokio directly. It provides:
//!
//! - [`pool::WorkerPool`]: a bounded pool of worker threads that runs
//!   operations either on the caller's thread (`block_on`) or in the
//!   background (`spawn`, returning an awaitable [`pool::PoolTask`])
//! - [`time`], [`fs`] and [`io`]: the async primitives the transfer engine
//!   needs
//! - [`sync`]: the lock the token lifecycle is held under
//!
//! # Examples
//!
//! ```rust
//! use core_async::pool::WorkerPool;
//!
//! let pool = WorkerPool::new(2).unwrap();
//!
//! // Blocking form: runs on the pool's runtime, blocks this thread.
//! let answer = pool.block_on(async { 40 + 2 }).unwrap();
//! assert_eq!(answer, 42);
//!
//! // Pooled form: runs on a worker thread, awaited later.
//! let task = pool.spawn(async { "done" });
//! assert_eq!(pool.block_on(task).unwrap().unwrap(), "done");
//! ```

pub mod pool;

pub use pool::{PoolTask, TaskError, WorkerPool};

/// Timers.
pub mod time {
    pub use std::time::{Duration, Instant};
    pub use tokio::time::{sleep, timeout};
}

/// Async synchronization primitives.
pub mod sync {
    pub use tokio::sync::{Mutex, MutexGuard};
}

/// Async filesystem access used by transfers.
pub mod fs {
    pub use tokio::fs::{create_dir_all, metadata, remove_file, rename, File, OpenOptions};
}

/// Async I/O traits and adapters used by transfers.
pub mod io {
    pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
    pub use tokio_util::io::ReaderStream;
}
