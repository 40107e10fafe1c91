//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `provider-onedrive`, `core-runtime`). Host
//! applications can depend on `drive-connect-workspace` and enable the
//! documented features without needing to wire each crate individually.

#[cfg(feature = "desktop-http")]
pub use provider_onedrive as onedrive;

#[cfg(feature = "logging")]
pub use core_runtime::logging;
