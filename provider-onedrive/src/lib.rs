//! # OneDrive Provider
//!
//! Signed, retried access to the OneDrive and SharePoint REST APIs.
//!
//! ## Overview
//!
//! This module provides:
//! - [`Connection`]: request signing with the current OAuth grant, retry
//!   dispatch and response decoding
//! - [`RetryStrategy`] with [`ExponentialBackoff`] and [`NoRetry`]
//! - Cursor pagination over collections (`@odata.nextLink`)
//! - Streamed downloads and uploads with [`ProgressListener`] callbacks
//!
//! Every operation has a blocking form and a pooled `*_async` form that runs
//! on the connection's worker pool and returns a [`DriveTask`].
//!
//! Resource paths (`/me/drive/items/{id}/children`, ...) are built by callers;
//! [`request::encode_path`] escapes item paths for path-based addressing.

pub mod connection;
pub mod error;
pub mod pagination;
pub mod progress;
pub mod request;
pub mod retry;
pub mod transfer;

#[cfg(feature = "desktop-http")]
pub use connection::default_http_client;
pub use connection::{Connection, DriveTask};
pub use error::{BoxError, DriveError, Result};
pub use pagination::Page;
pub use progress::{NoProgress, ProgressListener};
pub use request::ApiRequest;
pub use retry::{ExponentialBackoff, NoRetry, RetryCause, RetryDecision, RetryStrategy};
