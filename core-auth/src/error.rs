use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("Malformed authorization response: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    #[error("Incomplete grant: {0}")]
    IncompleteGrant(String),

    #[error("Transport failure while talking to the authorization server: {0}")]
    Transport(#[source] BridgeError),

    #[error("Service discovery failed with {status}: {body}")]
    Discovery { status: u16, body: String },

    #[error("Invalid auth configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
