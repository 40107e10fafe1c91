use bridge_traits::http::HttpResponse;
use core_async::TaskError;
use core_auth::AuthError;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Longest body excerpt kept on request and response errors.
pub const BODY_SNIPPET_LIMIT: usize = 512;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    /// The server rejected the request (4xx). Never retried.
    #[error("Request rejected with status {status}: {message}")]
    Request {
        status: u16,
        /// Graph error code, e.g. `itemNotFound`
        code: Option<String>,
        message: String,
        body: String,
    },

    /// The server failed (5xx), the transport failed, or the reply could not
    /// be used. Surfaced once the retry strategy gives up.
    #[error("Response failure: {message}")]
    Response {
        status: Option<u16>,
        code: Option<String>,
        message: String,
        body: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Transfer I/O failure on {}: {source}", .path.display())]
    TransferIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pagination stopped after {limit} pages")]
    PageLimitExceeded { limit: u32 },

    #[error("Background task failed: {0}")]
    Task(#[from] TaskError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Config(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, DriveError>;

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    code: Option<String>,
    message: Option<String>,
}

impl DriveError {
    /// Classify a non-success reply: 4xx becomes [`DriveError::Request`],
    /// anything else [`DriveError::Response`].
    pub fn from_response(response: &HttpResponse) -> Self {
        let status = response.status;
        let body = snippet(&response.body);
        let (code, graph_message) = parse_graph_error(&response.body);
        let message = graph_message.unwrap_or_else(|| format!("HTTP {}", status));

        if response.is_client_error() {
            DriveError::Request {
                status,
                code,
                message,
                body,
            }
        } else {
            DriveError::Response {
                status: Some(status),
                code,
                message,
                body,
                source: None,
            }
        }
    }

    /// A response-side failure with an underlying cause.
    pub fn response(status: Option<u16>, message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        DriveError::Response {
            status,
            code: None,
            message: message.into(),
            body: String::new(),
            source: Some(source.into()),
        }
    }

    pub fn transfer_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriveError::TransferIo {
            path: path.into(),
            source,
        }
    }

    /// HTTP status behind this error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            DriveError::Request { status, .. } => Some(*status),
            DriveError::Response { status, .. } => *status,
            DriveError::Auth(AuthError::TokenEndpoint { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Graph error code from the reply envelope.
    pub fn graph_code(&self) -> Option<&str> {
        match self {
            DriveError::Request { code, .. } | DriveError::Response { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

fn parse_graph_error(body: &[u8]) -> (Option<String>, Option<String>) {
    match serde_json::from_slice::<GraphErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => (None, None),
    }
}

/// First [`BODY_SNIPPET_LIMIT`] characters of a body, lossily decoded.
pub(crate) fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_SNIPPET_LIMIT) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.into_owned(),
    }
}
