//! OAuth 2.0 token endpoint client.
//!
//! Redeems authorization codes and refresh tokens (RFC 6749 §4.1.3, §6).
//! Every call is a single form-encoded POST: the token endpoint is never
//! retried, so a rejected grant surfaces immediately.
//!
//! # Security
//!
//! Never logs sensitive values (tokens, codes, client secrets).

use crate::error::{AuthError, Result};
use crate::types::{ClientCredentials, OAuthEndpoints, TokenResponse};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Client for the token endpoint described by an [`OAuthEndpoints`].
pub struct OAuthClient {
    credentials: ClientCredentials,
    endpoints: OAuthEndpoints,
    http_client: Arc<dyn HttpClient>,
}

impl OAuthClient {
    pub fn new(
        credentials: ClientCredentials,
        endpoints: OAuthEndpoints,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            credentials,
            endpoints,
            http_client,
        }
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    pub(crate) fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.http_client
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `resource` is sent for business grants, which are issued per resource.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenEndpoint`] for a non-2xx reply
    /// - [`AuthError::MalformedResponse`] when the body is not a token response
    /// - [`AuthError::Transport`] when the endpoint cannot be reached
    #[instrument(skip(self, code), fields(token_url = %self.endpoints.token_url))]
    pub async fn redeem_code(&self, code: &str, resource: Option<&str>) -> Result<TokenResponse> {
        debug!("Exchanging authorization code for tokens");

        let mut params = vec![("grant_type", "authorization_code"), ("code", code)];
        if let Some(resource) = resource {
            params.push(("resource", resource));
        }

        let response = self.post_form(params).await?;
        debug!(expires_in = response.expires_in, "Authorization code redeemed");
        Ok(response)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The reply may or may not carry a rotated refresh token; callers keep
    /// the old one when it does not.
    #[instrument(skip(self, refresh_token), fields(token_url = %self.endpoints.token_url))]
    pub async fn refresh(&self, refresh_token: &str, resource: Option<&str>) -> Result<TokenResponse> {
        debug!("Refreshing access token");

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(resource) = resource {
            params.push(("resource", resource));
        }

        let response = self.post_form(params).await?;
        debug!(expires_in = response.expires_in, "Access token refreshed");
        Ok(response)
    }

    async fn post_form(&self, grant: Vec<(&str, &str)>) -> Result<TokenResponse> {
        let mut params: Vec<(&str, &str)> = grant;
        params.push(("client_id", self.credentials.client_id.as_str()));
        params.push(("redirect_uri", self.credentials.redirect_uri.as_str()));
        if let Some(client_secret) = self.credentials.client_secret.as_deref() {
            params.push(("client_secret", client_secret));
        }

        let encoded_body = serde_urlencoded::to_string(&params).map_err(|e| {
            AuthError::InvalidConfig(format!("Failed to encode token request: {}", e))
        })?;

        let request = HttpRequest::new(HttpMethod::Post, self.endpoints.token_url.clone())
            .header("Content-Type", FORM_CONTENT_TYPE)
            .header("Accept", "application/json")
            .body(Bytes::from(encoded_body));

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(AuthError::Transport)?;

        parse_token_response(response)
    }
}

fn parse_token_response(response: HttpResponse) -> Result<TokenResponse> {
    if !response.is_success() {
        let status = response.status;
        let body = String::from_utf8_lossy(&response.body).into_owned();

        warn!(status, "Token endpoint rejected the grant");

        return Err(AuthError::TokenEndpoint { status, body });
    }

    serde_json::from_slice(&response.body).map_err(AuthError::MalformedResponse)
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}
