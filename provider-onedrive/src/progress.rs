//! Transfer progress reporting.
//!
//! Listeners see a monotonic byte count: an upload that restarts after a
//! failed attempt does not report smaller numbers than it already did.
//! Exactly one of [`ProgressListener::on_complete`] and
//! [`ProgressListener::on_failure`] is delivered per transfer.

use crate::error::DriveError;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

/// Receives progress for one transfer.
///
/// Callbacks run on whichever thread drives the transfer, possibly a pool
/// worker, and must not block for long.
pub trait ProgressListener: Send + Sync {
    fn on_update(&self, bytes_so_far: u64, expected: Option<u64>);

    fn on_complete(&self, total: u64);

    fn on_failure(&self, error: &DriveError);
}

/// Listener that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_update(&self, _bytes_so_far: u64, _expected: Option<u64>) {}

    fn on_complete(&self, _total: u64) {}

    fn on_failure(&self, _error: &DriveError) {}
}

/// Enforces the delivery rules in front of a listener.
pub(crate) struct ProgressReporter {
    listener: Arc<dyn ProgressListener>,
    expected: OnceLock<u64>,
    high_water: AtomicU64,
    finished: AtomicBool,
}

impl ProgressReporter {
    pub(crate) fn new(listener: Arc<dyn ProgressListener>, expected: Option<u64>) -> Self {
        let slot = OnceLock::new();
        if let Some(total) = expected {
            let _ = slot.set(total);
        }

        Self {
            listener,
            expected: slot,
            high_water: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// Record the expected total unless one is already known.
    pub(crate) fn expect(&self, total: u64) {
        let _ = self.expected.set(total);
    }

    /// Report `bytes_so_far` if it moves past everything reported before.
    pub(crate) fn update(&self, bytes_so_far: u64) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }

        let previous = self.high_water.fetch_max(bytes_so_far, Ordering::AcqRel);
        if bytes_so_far > previous {
            self.listener
                .on_update(bytes_so_far, self.expected.get().copied());
        }
    }

    pub(crate) fn complete(&self, total: u64) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.listener.on_complete(total);
        }
    }

    pub(crate) fn fail(&self, error: &DriveError) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.listener.on_failure(error);
        }
    }
}

/// Byte stream wrapper that reports the running total after each chunk.
pub(crate) struct ProgressBody<S> {
    inner: S,
    sent: u64,
    reporter: Arc<ProgressReporter>,
}

impl<S> ProgressBody<S> {
    pub(crate) fn new(inner: S, reporter: Arc<ProgressReporter>) -> Self {
        Self {
            inner,
            sent: 0,
            reporter,
        }
    }
}

impl<S> Stream for ProgressBody<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            self.sent += chunk.len() as u64;
            self.reporter.update(self.sent);
        }
        polled
    }
}
