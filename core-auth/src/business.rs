//! Authenticator for OneDrive for Business and SharePoint.
//!
//! Business grants are issued per resource. The first grant targets the
//! discovery service; the caller then picks a service from
//! [`BusinessAuthManager::discover_services`] and binds to it with
//! [`BusinessAuthManager::bind_to_resource`], which reissues the grant for
//! that resource and moves the API base to `<resource>/_api/v2.0`.

use crate::error::{AuthError, Result};
use crate::manager::{Authenticator, TokenLifecycle};
use crate::oauth::OAuthClient;
use crate::types::{ClientCredentials, OAuthEndpoints, ServiceInfo, ServiceList, TokenState};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::time::Clock;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const API_SUFFIX: &str = "/_api/v2.0";

pub struct BusinessAuthManager {
    lifecycle: TokenLifecycle,
}

impl BusinessAuthManager {
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

    /// Create a manager holding a previously persisted grant. A grant
    /// persisted after binding stays bound to its resource.
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

    fn discovery_resource(&self) -> &str {
        &self.lifecycle.oauth().endpoints().discovery_resource
    }

    /// List the services the signed-in user can reach.
    ///
    /// Needs a grant scoped to the discovery resource. A grant bound to some
    /// other resource is re-scoped to discovery first, so bind again after
    /// picking a service.
    #[instrument(skip(self))]
    pub async fn discover_services(&self) -> Result<Vec<ServiceInfo>> {
        self.lifecycle
            .rescope_if_needed(self.discovery_resource())
            .await?;

        let bearer = self.lifecycle.valid_token().await?;
        let endpoints = self.lifecycle.oauth().endpoints();
        let request = HttpRequest::new(HttpMethod::Get, endpoints.discovery_url.clone())
            .authorization(bearer)
            .header("Accept", "application/json");

        let response = self
            .lifecycle
            .oauth()
            .http_client()
            .execute(request)
            .await
            .map_err(AuthError::Transport)?;

        if !response.is_success() {
            let status = response.status;
            warn!(status, "Service discovery failed");
            return Err(AuthError::Discovery {
                status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let list: ServiceList =
            serde_json::from_slice(&response.body).map_err(AuthError::MalformedResponse)?;

        info!(services = list.value.len(), "Discovered services");
        Ok(list.value)
    }

    /// Reissue the grant for `resource_id` (a `serviceResourceId` from
    /// discovery). On failure the previous grant stays in place.
    #[instrument(skip(self))]
    pub async fn bind_to_resource(&self, resource_id: &str) -> Result<()> {
        if resource_id.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "resource id cannot be empty".to_string(),
            ));
        }

        self.lifecycle.rescope(resource_id).await?;
        info!("Grant bound to resource");
        Ok(())
    }
}

#[async_trait]
impl Authenticator for BusinessAuthManager {
    #[instrument(skip(self, code))]
    async fn authenticate(&self, code: &str) -> Result<()> {
        self.lifecycle
            .redeem(code, Some(self.discovery_resource()))
            .await
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

    /// `None` until bound to a resource other than discovery.
    async fn bound_endpoint(&self) -> Option<String> {
        let current = self.lifecycle.current().await?;
        let resource = current.resource_id()?;

        if resource == self.discovery_resource() {
            return None;
        }

        Some(format!("{}{}", resource.trim_end_matches('/'), API_SUFFIX))
    }

    async fn current_token(&self) -> Option<Arc<TokenState>> {
        self.lifecycle.current().await
    }

    async fn reset(&self) {
        self.lifecycle.reset().await
    }
}

impl std::fmt::Debug for BusinessAuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessAuthManager")
            .field("oauth", self.lifecycle.oauth())
            .finish()
    }
}
