//! # Host Bridge Traits
//!
//! Host abstraction traits that the connection core depends on.
//!
//! ## Overview
//!
//! This crate defines the contract between the core and host-specific
//! implementations. The core never talks to a socket or reads the wall clock
//! directly; it goes through these traits so that tests can substitute fakes
//! and hosts can substitute their own transports.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - One network exchange per call: buffered,
//!   streamed response body, or streamed request body
//! - [`Clock`](time::Clock) - Time source for token expiry decisions
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. An `Err`
//! from an `HttpClient` always means the exchange failed at the transport
//! level; HTTP error statuses are returned as ordinary responses.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so a single implementation
//! can be shared across worker threads.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{ByteStream, HttpClient, HttpRequest, HttpResponse, StreamingResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient;
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         todo!()
//!     }
//!
//!     async fn execute_stream(&self, request: HttpRequest) -> Result<StreamingResponse> {
//!         todo!()
//!     }
//!
//!     async fn send_stream(&self, request: HttpRequest, body: ByteStream, len: u64) -> Result<HttpResponse> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, StreamingResponse};
pub use time::{Clock, ManualClock, SystemClock};
