//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the drive connection core:
//! - Logging and tracing infrastructure
//! - Connection configuration with validation and environment loading
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions and the configuration values every
//! connection is built from.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ConnectionConfig, RetrySettings};
pub use error::{Error, Result};
