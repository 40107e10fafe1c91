//! # Connection Configuration
//!
//! Static configuration shared read-only by every operation on a connection.
//!
//! ## Overview
//!
//! A `ConnectionConfig` is created through a validating factory
//! ([`ConnectionConfig::new`], [`ConnectionConfig::personal`] or
//! [`ConnectionConfig::from_env`]) and then adjusted with `with_*` methods.
//! Call [`ConnectionConfig::validate`] after adjusting; connections validate
//! again when they are constructed.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::{ConnectionConfig, RetrySettings};
//! use std::time::Duration;
//!
//! let config = ConnectionConfig::personal()
//!     .with_worker_threads(8)
//!     .with_max_pages(Some(500))
//!     .with_retry(RetrySettings::new(5, Duration::from_millis(200), Duration::from_secs(10)));
//!
//! config.validate().unwrap();
//! ```
//!
//! ## Environment
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DRIVE_BASE_URL` | `base_url` |
//! | `DRIVE_USER_AGENT` | `user_agent` |
//! | `DRIVE_ACCEPT_GZIP` | `accept_gzip` (`true`/`false`/`1`/`0`) |
//! | `DRIVE_WORKER_THREADS` | `worker_threads` |
//! | `DRIVE_MAX_PAGES` | `max_pages` |

use crate::error::{Error, Result};
use std::time::Duration;
use url::Url;

/// Microsoft Graph v1.0 endpoint used by personal accounts.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// User agent sent on every request unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("drive-connect/", env!("CARGO_PKG_VERSION"));

const DEFAULT_WORKER_THREADS: usize = 4;
const MAX_WORKER_THREADS: usize = 256;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry tuning used to build the default exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each following retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetrySettings {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// A single attempt, never retried.
    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Retry max_attempts must be at least 1".to_string(),
            ));
        }

        if self.base_delay > self.max_delay {
            return Err(Error::Config(format!(
                "Retry base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }

        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Static configuration for a drive connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Base URL relative request paths are resolved against
    pub base_url: String,

    /// `User-Agent` header value
    pub user_agent: String,

    /// Ask the server for gzip-compressed responses
    pub accept_gzip: bool,

    /// Size of the worker pool used by the pooled (`*_async`) operations
    pub worker_threads: usize,

    /// Per-request timeout handed to the transport
    pub request_timeout: Duration,

    /// Retry tuning for the default retry strategy
    pub retry: RetrySettings,

    /// Upper bound on pages followed by a paginated fetch (`None` = unbounded)
    pub max_pages: Option<u32>,
}

impl ConnectionConfig {
    /// Creates a configuration for the given API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let config = Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_gzip: true,
            worker_threads: DEFAULT_WORKER_THREADS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetrySettings::default(),
            max_pages: None,
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration targeting Microsoft Graph.
    pub fn personal() -> Self {
        Self {
            base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_gzip: true,
            worker_threads: DEFAULT_WORKER_THREADS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetrySettings::default(),
            max_pages: None,
        }
    }

    /// Loads configuration from `DRIVE_*` environment variables, falling back
    /// to [`ConnectionConfig::personal`] for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::personal();

        if let Some(base_url) = lookup("DRIVE_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }

        if let Some(user_agent) = lookup("DRIVE_USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Some(raw) = lookup("DRIVE_ACCEPT_GZIP") {
            config.accept_gzip = parse_bool("DRIVE_ACCEPT_GZIP", &raw)?;
        }

        if let Some(raw) = lookup("DRIVE_WORKER_THREADS") {
            config.worker_threads = raw.trim().parse().map_err(|e| {
                Error::Config(format!("DRIVE_WORKER_THREADS must be an integer: {}", e))
            })?;
        }

        if let Some(raw) = lookup("DRIVE_MAX_PAGES") {
            let max_pages: u32 = raw.trim().parse().map_err(|e| {
                Error::Config(format!("DRIVE_MAX_PAGES must be an integer: {}", e))
            })?;
            config.max_pages = Some(max_pages);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_gzip(mut self, accept_gzip: bool) -> Self {
        self.accept_gzip = accept_gzip;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Base URL is an absolute http(s) URL
    /// - User agent is not empty
    /// - Worker pool size is between 1 and 256
    /// - Request timeout is non-zero
    /// - Retry settings are consistent
    /// - A page bound, when set, is non-zero
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(Error::Config(format!(
                "Base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("User agent cannot be empty".to_string()));
        }

        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(Error::Config(format!(
                "Worker threads must be between 1 and {}, got {}",
                MAX_WORKER_THREADS, self.worker_threads
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        self.retry.validate()?;

        if self.max_pages == Some(0) {
            return Err(Error::Config(
                "max_pages must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::personal()
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_personal_defaults_are_valid() {
        let config = ConnectionConfig::personal();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url, DEFAULT_GRAPH_BASE_URL);
        assert!(config.accept_gzip);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.max_pages, None);
        assert!(config.user_agent.starts_with("drive-connect/"));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let config = ConnectionConfig::new("https://contoso.sharepoint.com/_api/v2.0/").unwrap();
        assert_eq!(config.base_url, "https://contoso.sharepoint.com/_api/v2.0");
    }

    #[test]
    fn test_new_rejects_invalid_urls() {
        assert!(ConnectionConfig::new("not a url").is_err());
        assert!(ConnectionConfig::new("ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = ConnectionConfig::personal();

        assert!(base.clone().with_worker_threads(0).validate().is_err());
        assert!(base.clone().with_user_agent("  ").validate().is_err());
        assert!(base.clone().with_max_pages(Some(0)).validate().is_err());
        assert!(base
            .clone()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(base
            .with_retry(RetrySettings::new(
                3,
                Duration::from_secs(5),
                Duration::from_secs(1)
            ))
            .validate()
            .is_err());
    }

    #[test]
    fn test_retry_settings() {
        assert!(RetrySettings::default().validate().is_ok());
        assert!(RetrySettings::disabled().validate().is_ok());
        assert_eq!(RetrySettings::disabled().max_attempts, 1);
        assert!(RetrySettings::new(0, Duration::ZERO, Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_lookup_reads_all_fields() {
        let config = ConnectionConfig::from_lookup(lookup_from(&[
            ("DRIVE_BASE_URL", "https://example.com/api/"),
            ("DRIVE_USER_AGENT", "tests/1.0"),
            ("DRIVE_ACCEPT_GZIP", "false"),
            ("DRIVE_WORKER_THREADS", "2"),
            ("DRIVE_MAX_PAGES", "10"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://example.com/api");
        assert_eq!(config.user_agent, "tests/1.0");
        assert!(!config.accept_gzip);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.max_pages, Some(10));
    }

    #[test]
    fn test_from_lookup_defaults_when_unset() {
        let config = ConnectionConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ConnectionConfig::personal());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        assert!(ConnectionConfig::from_lookup(lookup_from(&[("DRIVE_ACCEPT_GZIP", "maybe")])).is_err());
        assert!(ConnectionConfig::from_lookup(lookup_from(&[("DRIVE_WORKER_THREADS", "many")])).is_err());
        assert!(ConnectionConfig::from_lookup(lookup_from(&[("DRIVE_MAX_PAGES", "0")])).is_err());
    }
}
