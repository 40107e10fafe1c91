//! # Authentication Module
//!
//! OAuth 2.0 grant management for OneDrive connections.
//!
//! ## Overview
//!
//! This module redeems authorization codes, keeps access tokens valid and
//! hands out `Authorization` header values. Personal accounts use
//! [`PersonalAuthManager`]; OneDrive for Business and SharePoint use
//! [`BusinessAuthManager`], which adds service discovery and per-resource
//! binding.
//!
//! ## Features
//!
//! - Authorization code and refresh token grants
//! - Refresh on demand, serialized so concurrent callers refresh once
//! - Persistable [`TokenState`] with redacted `Debug` output
//! - Injectable clock for expiry checks

pub mod business;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod types;

pub use business::BusinessAuthManager;
pub use error::{AuthError, Result};
pub use manager::{Authenticator, PersonalAuthManager};
pub use oauth::OAuthClient;
pub use types::{
    ClientCredentials, OAuthEndpoints, ServiceInfo, TokenResponse, TokenState,
    BUSINESS_TOKEN_URL, DISCOVERY_RESOURCE, DISCOVERY_URL, PERSONAL_TOKEN_URL,
};
