use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use url::Url;

/// Token endpoint for personal (Microsoft account) grants.
pub const PERSONAL_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Token endpoint for business (Azure AD) grants.
pub const BUSINESS_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/token";

/// Service discovery endpoint for business accounts.
pub const DISCOVERY_URL: &str = "https://api.office.com/discovery/v2.0/me/services";

/// Resource a business grant is first issued for.
pub const DISCOVERY_RESOURCE: &str = "https://api.office.com/discovery/";

const DEFAULT_TOKEN_TYPE: &str = "bearer";
const SCOPE_SEPARATOR: &str = "%20";

/// Escaped inside each persisted scope so decoding gives back the original.
const SCOPE_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%');

/// An immutable snapshot of an OAuth grant.
///
/// A new `TokenState` is created on every redeem or refresh and swapped in
/// whole; holders of an older `Arc<TokenState>` keep a consistent view.
///
/// # Examples
///
/// ```
/// use core_auth::TokenState;
///
/// let token = TokenState::new(
///     "bearer",
///     vec!["Files.ReadWrite".to_string(), "offline_access".to_string()],
///     "access",
///     "refresh",
///     1_700_000_000_000,
///     None,
/// )
/// .unwrap();
///
/// assert_eq!(token.bearer_header(), "bearer access");
/// assert!(token.is_expired_at(1_700_000_000_000));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TokenStateWire", into = "TokenStateWire")]
pub struct TokenState {
    token_type: String,
    scopes: Vec<String>,
    access_token: String,
    refresh_token: String,
    expires_at_millis: i64,
    resource_id: Option<String>,
}

impl TokenState {
    /// Builds a token state, rejecting grants without both tokens.
    pub fn new(
        token_type: impl Into<String>,
        scopes: Vec<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at_millis: i64,
        resource_id: Option<String>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();

        if access_token.is_empty() {
            return Err(AuthError::IncompleteGrant(
                "access_token is empty".to_string(),
            ));
        }
        if refresh_token.is_empty() {
            return Err(AuthError::IncompleteGrant(
                "refresh_token is empty".to_string(),
            ));
        }

        let token_type = token_type.into();
        Ok(Self {
            token_type: if token_type.is_empty() {
                DEFAULT_TOKEN_TYPE.to_string()
            } else {
                token_type
            },
            scopes: dedup_scopes(scopes),
            access_token,
            refresh_token,
            expires_at_millis,
            resource_id,
        })
    }

    /// Builds the state described by a token endpoint response received at
    /// `now_millis`.
    ///
    /// `previous_refresh_token` is kept when the response omits a new one.
    pub fn from_response(
        response: TokenResponse,
        now_millis: i64,
        previous_refresh_token: Option<&str>,
        resource_id: Option<String>,
    ) -> Result<Self> {
        let refresh_token = response
            .refresh_token
            .or_else(|| previous_refresh_token.map(str::to_string))
            .ok_or_else(|| {
                AuthError::IncompleteGrant("response did not include a refresh_token".to_string())
            })?;

        let scopes = response
            .scope
            .as_deref()
            .map(|scope| scope.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let expires_at_millis = now_millis.saturating_add(response.expires_in.saturating_mul(1000));

        Self::new(
            response.token_type.unwrap_or_default(),
            scopes,
            response.access_token,
            refresh_token,
            expires_at_millis,
            resource_id,
        )
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn expires_at_millis(&self) -> i64 {
        self.expires_at_millis
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at_millis)
    }

    /// Resource the access token is scoped to (business grants only).
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// A token is expired from its expiry instant onwards.
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at_millis
    }

    /// Value for the `Authorization` header.
    pub fn bearer_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at_millis", &self.expires_at_millis)
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

/// Persisted form of a [`TokenState`].
#[derive(Serialize, Deserialize)]
struct TokenStateWire {
    token_type: String,
    #[serde(default)]
    scope: String,
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
}

impl From<TokenState> for TokenStateWire {
    fn from(state: TokenState) -> Self {
        Self {
            token_type: state.token_type,
            scope: state
                .scopes
                .iter()
                .map(|scope| utf8_percent_encode(scope, SCOPE_ESCAPE).to_string())
                .collect::<Vec<_>>()
                .join(SCOPE_SEPARATOR),
            access_token: state.access_token,
            refresh_token: state.refresh_token,
            expires_at: state.expires_at_millis,
            resource: state.resource_id,
        }
    }
}

impl TryFrom<TokenStateWire> for TokenState {
    type Error = AuthError;

    fn try_from(wire: TokenStateWire) -> Result<Self> {
        let decoded = percent_decode_str(&wire.scope).decode_utf8_lossy();
        let scopes = decoded.split_whitespace().map(str::to_string).collect();

        TokenState::new(
            wire.token_type,
            scopes,
            wire.access_token,
            wire.refresh_token,
            wire.expires_at,
            wire.resource,
        )
    }
}

fn dedup_scopes(scopes: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        if !unique.contains(&scope) {
            unique.push(scope);
        }
    }
    unique
}

/// Token response from the OAuth provider.
///
/// This structure represents the JSON response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default = "default_expires_in", deserialize_with = "seconds")]
    pub expires_in: i64,
    #[serde(default, deserialize_with = "optional_seconds")]
    pub ext_expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600 // Default to 1 hour if not specified
}

// The Azure AD v1 endpoint sends lifetimes as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(i64),
    Text(String),
}

impl Seconds {
    fn into_i64<E: serde::de::Error>(self) -> std::result::Result<i64, E> {
        match self {
            Seconds::Number(n) => Ok(n),
            Seconds::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid lifetime '{}'", s))),
        }
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    Seconds::deserialize(deserializer)?.into_i64()
}

fn optional_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error> {
    Option::<Seconds>::deserialize(deserializer)?
        .map(Seconds::into_i64::<D::Error>)
        .transpose()
}

/// Application registration used against the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    /// Absent for public clients
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

impl ClientCredentials {
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] when the client id is empty or
    /// the redirect URI does not parse.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Self {
            client_id: client_id.into(),
            client_secret: client_secret.filter(|secret| !secret.is_empty()),
            redirect_uri: redirect_uri.into(),
        };

        if credentials.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "client_id cannot be empty".to_string(),
            ));
        }

        Url::parse(&credentials.redirect_uri).map_err(|e| {
            AuthError::InvalidConfig(format!(
                "Invalid redirect URI '{}': {}",
                credentials.redirect_uri, e
            ))
        })?;

        Ok(credentials)
    }

    /// Reads `DRIVE_CLIENT_ID`, `DRIVE_CLIENT_SECRET` (optional) and
    /// `DRIVE_REDIRECT_URI`.
    pub fn from_env() -> Result<Self> {
        let required = |key: &str| {
            std::env::var(key)
                .map_err(|_| AuthError::InvalidConfig(format!("{} is not set", key)))
        };

        Self::new(
            required("DRIVE_CLIENT_ID")?,
            std::env::var("DRIVE_CLIENT_SECRET").ok(),
            required("DRIVE_REDIRECT_URI")?,
        )
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Authorization server locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub token_url: String,
    pub discovery_url: String,
    pub discovery_resource: String,
}

impl OAuthEndpoints {
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if any value is not a URL.
    pub fn new(
        token_url: impl Into<String>,
        discovery_url: impl Into<String>,
        discovery_resource: impl Into<String>,
    ) -> Result<Self> {
        let endpoints = Self {
            token_url: token_url.into(),
            discovery_url: discovery_url.into(),
            discovery_resource: discovery_resource.into(),
        };

        for (name, value) in [
            ("token_url", &endpoints.token_url),
            ("discovery_url", &endpoints.discovery_url),
            ("discovery_resource", &endpoints.discovery_resource),
        ] {
            Url::parse(value).map_err(|e| {
                AuthError::InvalidConfig(format!("Invalid {} '{}': {}", name, value, e))
            })?;
        }

        Ok(endpoints)
    }

    pub fn personal() -> Self {
        Self {
            token_url: PERSONAL_TOKEN_URL.to_string(),
            discovery_url: DISCOVERY_URL.to_string(),
            discovery_resource: DISCOVERY_RESOURCE.to_string(),
        }
    }

    pub fn business() -> Self {
        Self {
            token_url: BUSINESS_TOKEN_URL.to_string(),
            discovery_url: DISCOVERY_URL.to_string(),
            discovery_resource: DISCOVERY_RESOURCE.to_string(),
        }
    }
}

/// A service advertised by the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub service_resource_id: String,
    pub service_endpoint_uri: String,
    #[serde(default)]
    pub capability: String,
    #[serde(default)]
    pub service_api_version: String,
}

impl ServiceInfo {
    /// Whether this entry is the user's OneDrive for Business.
    pub fn is_my_files(&self) -> bool {
        self.capability.eq_ignore_ascii_case("MyFiles")
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceList {
    #[serde(default)]
    pub value: Vec<ServiceInfo>,
}
