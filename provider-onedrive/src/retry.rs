//! Retry policies.
//!
//! A [`RetryStrategy`] is consulted after every retryable failure: server
//! errors (5xx) and transport failures. Client errors (4xx) never reach it.
//! Strategies are stateless; the attempt counter lives in the dispatch loop.

use bridge_traits::error::BridgeError;
use core_runtime::config::RetrySettings;
use std::time::Duration;

/// Why an attempt failed.
#[derive(Debug)]
pub enum RetryCause<'a> {
    /// The server answered with a 5xx status.
    Status {
        status: u16,
        /// Parsed `Retry-After` header, if the server sent one
        retry_after: Option<Duration>,
    },
    /// No usable response arrived.
    Transport(&'a BridgeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Policy deciding whether a failed attempt is tried again.
pub trait RetryStrategy: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn decide(&self, attempt: u32, cause: &RetryCause<'_>) -> RetryDecision;
}

/// Exponential backoff: `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
///
/// A `Retry-After` hint longer than the computed delay wins, still capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for ExponentialBackoff {
    fn from(settings: RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            settings.base_delay,
            settings.max_delay,
        )
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn decide(&self, attempt: u32, cause: &RetryCause<'_>) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let computed = self.delay_for(attempt);
        let delay = match cause {
            RetryCause::Status {
                retry_after: Some(hint),
                ..
            } => computed.max(*hint).min(self.max_delay),
            _ => computed,
        };

        RetryDecision::RetryAfter(delay)
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn decide(&self, _attempt: u32, _cause: &RetryCause<'_>) -> RetryDecision {
        RetryDecision::GiveUp
    }
}

/// Parse a `Retry-After` value given in whole seconds.
///
/// HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
