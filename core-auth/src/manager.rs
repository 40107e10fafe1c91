//! # Authentication Manager
//!
//! Owns the OAuth grant for one connection and keeps it valid.
//!
//! ## Overview
//!
//! The current grant is a single `Arc<TokenState>` behind one async mutex.
//! Every grant change (redeem, refresh, resource binding, reset) happens while
//! that lock is held, and [`Authenticator::get_valid_token`] checks expiry and
//! refreshes inside the same critical section. Callers queued on the lock
//! therefore observe the refreshed grant instead of refreshing again.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{Authenticator, ClientCredentials, OAuthEndpoints, PersonalAuthManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let credentials = ClientCredentials::new(
//!     "client-id",
//!     None,
//!     "https://login.live.com/oauth20_desktop.srf",
//! )?;
//! let manager = PersonalAuthManager::new(credentials, OAuthEndpoints::personal(), http_client);
//!
//! manager.authenticate("code-from-redirect").await?;
//! let header = manager.get_valid_token().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::oauth::OAuthClient;
use crate::types::{ClientCredentials, OAuthEndpoints, TokenState};
use async_trait::async_trait;
use bridge_traits::http::HttpClient;
use bridge_traits::time::{Clock, SystemClock};
use std::sync::Arc;
use core_async::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Source of authorization for API requests.
///
/// Implementations are shared across threads as `Arc<dyn Authenticator>`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Redeem an authorization code and replace the held grant.
    async fn authenticate(&self, code: &str) -> Result<()>;

    /// Whether the held access token has reached its expiry.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotAuthenticated`] when no grant is held.
    async fn is_expired(&self) -> Result<bool>;

    /// Exchange the held refresh token for a new grant.
    async fn refresh(&self) -> Result<()>;

    /// `Authorization` header value for a token that is valid now,
    /// refreshing first when the held token has expired.
    async fn get_valid_token(&self) -> Result<String>;

    /// API base URL the grant authorizes, when it differs from the
    /// connection's configured base URL.
    async fn bound_endpoint(&self) -> Option<String>;

    /// Snapshot of the held grant, e.g. for persisting it.
    async fn current_token(&self) -> Option<Arc<TokenState>>;

    /// Drop the held grant.
    async fn reset(&self);
}

/// Grant storage and renewal shared by the personal and business managers.
pub(crate) struct TokenLifecycle {
    oauth: OAuthClient,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<Arc<TokenState>>>,
}

impl TokenLifecycle {
    pub(crate) fn new(oauth: OAuthClient, initial: Option<TokenState>) -> Self {
        Self {
            oauth,
            clock: Arc::new(SystemClock),
            state: Mutex::new(initial.map(Arc::new)),
        }
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    fn now_millis(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    pub(crate) async fn redeem(&self, code: &str, resource: Option<&str>) -> Result<()> {
        let mut guard = self.state.lock().await;

        let response = self.oauth.redeem_code(code, resource).await?;
        let state = TokenState::from_response(
            response,
            self.now_millis(),
            None,
            resource.map(str::to_string),
        )?;

        info!(expires_at = state.expires_at_millis(), "Grant established");
        *guard = Some(Arc::new(state));
        Ok(())
    }

    pub(crate) async fn is_expired(&self) -> Result<bool> {
        let guard = self.state.lock().await;
        let current = guard.as_ref().ok_or(AuthError::NotAuthenticated)?;
        Ok(current.is_expired_at(self.now_millis()))
    }

    /// Refresh for the resource the held grant is scoped to.
    pub(crate) async fn refresh(&self) -> Result<Arc<TokenState>> {
        let mut guard = self.state.lock().await;
        let resource = guard
            .as_ref()
            .ok_or(AuthError::NotAuthenticated)?
            .resource_id()
            .map(str::to_string);

        self.refresh_locked(&mut guard, resource).await
    }

    /// Refresh and re-scope the grant to `resource`.
    pub(crate) async fn rescope(&self, resource: &str) -> Result<Arc<TokenState>> {
        let mut guard = self.state.lock().await;
        self.refresh_locked(&mut guard, Some(resource.to_string()))
            .await
    }

    /// Re-scope to `resource` unless the held grant is already scoped to it.
    pub(crate) async fn rescope_if_needed(&self, resource: &str) -> Result<Arc<TokenState>> {
        let mut guard = self.state.lock().await;
        let current = guard.as_ref().ok_or(AuthError::NotAuthenticated)?;
        if current.resource_id() == Some(resource) {
            return Ok(Arc::clone(current));
        }

        info!(resource, "Re-scoping grant");
        self.refresh_locked(&mut guard, Some(resource.to_string()))
            .await
    }

    pub(crate) async fn valid_token(&self) -> Result<String> {
        let mut guard = self.state.lock().await;
        let current = Arc::clone(guard.as_ref().ok_or(AuthError::NotAuthenticated)?);

        if !current.is_expired_at(self.now_millis()) {
            return Ok(current.bearer_header());
        }

        debug!("Access token expired, refreshing");
        let resource = current.resource_id().map(str::to_string);
        let refreshed = self.refresh_locked(&mut guard, resource).await?;
        Ok(refreshed.bearer_header())
    }

    /// On failure the held grant is left untouched.
    async fn refresh_locked(
        &self,
        slot: &mut Option<Arc<TokenState>>,
        resource: Option<String>,
    ) -> Result<Arc<TokenState>> {
        let current = Arc::clone(slot.as_ref().ok_or(AuthError::NotAuthenticated)?);

        let response = self
            .oauth
            .refresh(current.refresh_token(), resource.as_deref())
            .await
            .map_err(|e| {
                warn!(error = %e, "Token refresh failed");
                e
            })?;

        let refreshed = Arc::new(TokenState::from_response(
            response,
            self.now_millis(),
            Some(current.refresh_token()),
            resource,
        )?);

        info!(
            expires_at = refreshed.expires_at_millis(),
            "Access token refreshed"
        );
        *slot = Some(Arc::clone(&refreshed));
        Ok(refreshed)
    }

    pub(crate) async fn current(&self) -> Option<Arc<TokenState>> {
        self.state.lock().await.clone()
    }

    pub(crate) async fn reset(&self) {
        *self.state.lock().await = None;
        debug!("Grant dropped");
    }
}

/// Authenticator for personal Microsoft accounts.
///
/// The grant authorizes the connection's configured base URL, so
/// [`Authenticator::bound_endpoint`] is always `None`.
pub struct PersonalAuthManager {
    lifecycle: TokenLifecycle,
}

impl PersonalAuthManager {
    /// Create an unauthenticated manager; call
    /// [`Authenticator::authenticate`] next.
    pub fn new(
        credentials: ClientCredentials,
        endpoints: OAuthEndpoints,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            lifecycle: TokenLifecycle::new(
                OAuthClient::new(credentials, endpoints, http_client),
                None,
            ),
        }
    }

    /// Create a manager holding a previously persisted grant.
    pub fn with_token(
        credentials: ClientCredentials,
        endpoints: OAuthEndpoints,
        http_client: Arc<dyn HttpClient>,
        token: TokenState,
    ) -> Self {
        Self {
            lifecycle: TokenLifecycle::new(
                OAuthClient::new(credentials, endpoints, http_client),
                Some(token),
            ),
        }
    }

    /// Replace the time source used for expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.lifecycle.set_clock(clock);
        self
    }
}

#[async_trait]
impl Authenticator for PersonalAuthManager {
    #[instrument(skip(self, code))]
    async fn authenticate(&self, code: &str) -> Result<()> {
        self.lifecycle.redeem(code, None).await
    }

    async fn is_expired(&self) -> Result<bool> {
        self.lifecycle.is_expired().await
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<()> {
        self.lifecycle.refresh().await.map(|_| ())
    }

    async fn get_valid_token(&self) -> Result<String> {
        self.lifecycle.valid_token().await
    }

    async fn bound_endpoint(&self) -> Option<String> {
        None
    }

    async fn current_token(&self) -> Option<Arc<TokenState>> {
        self.lifecycle.current().await
    }

    async fn reset(&self) {
        self.lifecycle.reset().await
    }
}

impl std::fmt::Debug for PersonalAuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonalAuthManager")
            .field("oauth", self.lifecycle.oauth())
            .finish()
    }
}
