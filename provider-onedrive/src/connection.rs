//! # Connection
//!
//! Signs requests with the current grant and dispatches them through the
//! retry strategy.
//!
//! ## Overview
//!
//! Every operation is written once as an async function on the shared
//! connection core and exposed twice:
//!
//! - a blocking form (`execute`, `fetch_all`, `download`, ...) that drives the
//!   operation on the caller's thread through the worker pool's runtime
//! - a pooled form (`execute_async`, ...) that runs it on a worker thread and
//!   returns a [`DriveTask`]
//!
//! Each attempt is signed again, so a token refreshed between attempts is
//! picked up. Client errors (4xx) fail immediately; server errors (5xx) and
//! transport failures go to the [`RetryStrategy`].
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::ClientCredentials;
//! use core_runtime::config::ConnectionConfig;
//! use provider_onedrive::{default_http_client, ApiRequest, Connection};
//!
//! # fn main() -> provider_onedrive::Result<()> {
//! let config = ConnectionConfig::personal();
//! let credentials = ClientCredentials::new(
//!     "client-id",
//!     None,
//!     "https://login.live.com/oauth20_desktop.srf",
//! )?;
//! let http = default_http_client(&config)?;
//! let connection = Connection::from_auth_code(config, credentials, http, "code")?;
//!
//! let drive: serde_json::Value = connection.execute_json(ApiRequest::get("/me/drive"))?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BoxError, DriveError, Result};
use crate::progress::ProgressReporter;
use crate::request::ApiRequest;
use crate::retry::{parse_retry_after, ExponentialBackoff, RetryCause, RetryDecision, RetryStrategy};
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_async::pool::{PoolTask, WorkerPool};
use core_async::time::sleep;
use core_auth::{Authenticator, ClientCredentials, OAuthEndpoints, PersonalAuthManager, TokenState};
use core_runtime::config::ConnectionConfig;
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::io::Read;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why an attempt did not produce a usable reply.
pub(crate) enum Failure {
    Status(HttpResponse),
    Transport(BridgeError),
}

impl Failure {
    fn status(&self) -> Option<u16> {
        match self {
            Failure::Status(response) => Some(response.status),
            Failure::Transport(_) => None,
        }
    }

    fn into_error(self) -> DriveError {
        match self {
            Failure::Status(response) => DriveError::from_response(&response),
            Failure::Transport(error) => {
                DriveError::response(None, format!("Transport failure: {}", error), error)
            }
        }
    }
}

/// Result of one attempt.
pub(crate) enum Outcome<R> {
    Success(R),
    Failed(Failure),
    /// Stop without consulting the retry strategy.
    Abort(DriveError),
}

impl Outcome<HttpResponse> {
    pub(crate) fn from_reply(reply: std::result::Result<HttpResponse, BridgeError>) -> Self {
        match reply {
            Ok(response) if response.is_success() => Outcome::Success(response),
            Ok(response) => Outcome::Failed(Failure::Status(response)),
            Err(error) => Outcome::Failed(Failure::Transport(error)),
        }
    }
}

/// State shared by every operation, including pooled ones.
pub(crate) struct ConnectionCore {
    pub(crate) config: ConnectionConfig,
    pub(crate) auth: Arc<dyn Authenticator>,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) retry: Arc<dyn RetryStrategy>,
}

impl ConnectionCore {
    /// Build the wire request for one attempt.
    pub(crate) async fn sign(&self, request: &ApiRequest, allow_gzip: bool) -> Result<HttpRequest> {
        let base = match self.auth.bound_endpoint().await {
            Some(endpoint) => endpoint,
            None => self.config.base_url.clone(),
        };
        let url = request.resolve(&base)?;
        let authorization = self.auth.get_valid_token().await?;

        let mut signed = HttpRequest::new(request.method, url)
            .authorization(authorization)
            .header("User-Agent", self.config.user_agent.clone())
            .header("client-request-id", Uuid::new_v4().to_string())
            .timeout(self.config.request_timeout);

        if allow_gzip && self.config.accept_gzip {
            signed = signed.header("Accept-Encoding", "gzip");
        }
        for (name, value) in &request.headers {
            signed = signed.header(name.clone(), value.clone());
        }
        if let Some(body) = &request.body {
            signed = signed.body(body.clone());
        }

        Ok(signed)
    }

    /// Sign and send until `send` succeeds, fails terminally, or the retry
    /// strategy gives up.
    pub(crate) async fn dispatch<R, F, Fut>(
        &self,
        request: &ApiRequest,
        allow_gzip: bool,
        mut send: F,
    ) -> Result<R>
    where
        F: FnMut(HttpRequest) -> Fut,
        Fut: Future<Output = Outcome<R>>,
    {
        let path = request.target.split('?').next().unwrap_or_default();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let signed = self.sign(request, allow_gzip).await?;
            debug!(attempt, method = %request.method, path, "Sending request");

            let failure = match send(signed).await {
                Outcome::Success(reply) => return Ok(reply),
                Outcome::Abort(error) => return Err(error),
                Outcome::Failed(failure) => failure,
            };

            let decision = match &failure {
                Failure::Status(response) if response.is_server_error() => {
                    let retry_after = response
                        .header("Retry-After")
                        .and_then(parse_retry_after);
                    self.retry.decide(
                        attempt,
                        &RetryCause::Status {
                            status: response.status,
                            retry_after,
                        },
                    )
                }
                Failure::Status(response) => {
                    warn!(status = response.status, path, "Request failed");
                    return Err(DriveError::from_response(response));
                }
                Failure::Transport(error) => self.retry.decide(attempt, &RetryCause::Transport(error)),
            };

            match decision {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        status = failure.status(),
                        delay_ms = delay.as_millis() as u64,
                        path,
                        "Request failed, retrying"
                    );
                    sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    let error = failure.into_error();
                    warn!(attempt, error = %error, path, "Request failed, giving up");
                    return Err(error);
                }
            }
        }
    }

    pub(crate) async fn execute<T, P, E>(&self, request: &ApiRequest, parser: P) -> Result<T>
    where
        P: FnOnce(&HttpResponse) -> std::result::Result<T, E>,
        E: Into<BoxError>,
    {
        let http = &self.http;
        let response = self
            .dispatch(request, true, |signed| async move {
                Outcome::from_reply(http.execute(signed).await)
            })
            .await?;

        let response = decode_body(response)?;
        parser(&response).map_err(|e| {
            DriveError::response(Some(response.status), "Failed to parse response body", e)
        })
    }
}

/// Undo `Content-Encoding: gzip`.
pub(crate) fn decode_body(mut response: HttpResponse) -> Result<HttpResponse> {
    let gzipped = response
        .header("Content-Encoding")
        .map(|value| value.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !gzipped {
        return Ok(response);
    }

    let mut decoded = Vec::new();
    GzDecoder::new(&response.body[..])
        .read_to_end(&mut decoded)
        .map_err(|e| DriveError::response(Some(response.status), "Failed to decode gzip body", e))?;

    response.body = Bytes::from(decoded);
    response
        .headers
        .retain(|name, _| !name.eq_ignore_ascii_case("Content-Encoding"));
    Ok(response)
}

fn json_parser<T: DeserializeOwned>(response: &HttpResponse) -> serde_json::Result<T> {
    serde_json::from_slice(&response.body)
}

fn empty_parser(_: &HttpResponse) -> std::result::Result<(), std::convert::Infallible> {
    Ok(())
}

/// Handle to an operation running on the worker pool.
///
/// Await it from any executor. [`DriveTask::cancel`] stops the operation at
/// its next suspension point; awaiting afterwards yields
/// `DriveError::Task(TaskError::Cancelled)`.
#[must_use = "a DriveTask does nothing observable unless awaited or cancelled"]
pub struct DriveTask<T> {
    inner: PoolTask<Result<T>>,
    reporter: Option<Arc<ProgressReporter>>,
}

impl<T> DriveTask<T> {
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for DriveTask<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(task_error)) => {
                let error = DriveError::Task(task_error);
                if let Some(reporter) = &self.reporter {
                    reporter.fail(&error);
                }
                Poll::Ready(Err(error))
            }
        }
    }
}

impl<T> std::fmt::Debug for DriveTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveTask")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Authenticated connection to a OneDrive or SharePoint API.
///
/// Cloning is cheap; clones share the grant, transport and worker pool.
#[derive(Clone)]
pub struct Connection {
    pub(crate) core: Arc<ConnectionCore>,
    pool: Arc<WorkerPool>,
}

impl Connection {
    /// Create a connection around an existing authenticator.
    ///
    /// # Errors
    ///
    /// [`DriveError::Config`] when `config` fails validation or the worker
    /// pool cannot start.
    pub fn with_authenticator(
        config: ConnectionConfig,
        auth: Arc<dyn Authenticator>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = WorkerPool::new(config.worker_threads).map_err(|e| {
            core_runtime::Error::Config(format!("Failed to start worker pool: {}", e))
        })?;
        let retry: Arc<dyn RetryStrategy> = Arc::new(ExponentialBackoff::from(config.retry));

        info!(
            base_url = %config.base_url,
            workers = config.worker_threads,
            "Connection created"
        );

        Ok(Self {
            core: Arc::new(ConnectionCore {
                config,
                auth,
                http,
                retry,
            }),
            pool: Arc::new(pool),
        })
    }

    /// Redeem an authorization code for a personal account and connect.
    ///
    /// Blocks the calling thread for the token exchange.
    pub fn from_auth_code(
        config: ConnectionConfig,
        credentials: ClientCredentials,
        http: Arc<dyn HttpClient>,
        code: &str,
    ) -> Result<Self> {
        let auth = Arc::new(PersonalAuthManager::new(
            credentials,
            OAuthEndpoints::personal(),
            Arc::clone(&http),
        ));
        let connection = Self::with_authenticator(config, auth.clone(), http)?;

        connection.pool.block_on(auth.authenticate(code))??;
        Ok(connection)
    }

    /// Connect a personal account with a previously persisted grant.
    pub fn from_token(
        config: ConnectionConfig,
        credentials: ClientCredentials,
        http: Arc<dyn HttpClient>,
        token: TokenState,
    ) -> Result<Self> {
        let auth = Arc::new(PersonalAuthManager::with_token(
            credentials,
            OAuthEndpoints::personal(),
            Arc::clone(&http),
            token,
        ));
        Self::with_authenticator(config, auth, http)
    }

    /// Replace the retry strategy.
    pub fn with_retry_strategy(self, retry: Arc<dyn RetryStrategy>) -> Self {
        let core = ConnectionCore {
            config: self.core.config.clone(),
            auth: Arc::clone(&self.core.auth),
            http: Arc::clone(&self.core.http),
            retry,
        };

        Self {
            core: Arc::new(core),
            pool: self.pool,
        }
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.core.auth
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.core.config
    }

    /// Drive any future to completion on the connection's runtime, e.g.
    /// business service discovery before the first request.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        Ok(self.pool.block_on(future)?)
    }

    /// Run an operation on the caller's thread.
    pub(crate) fn run<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        self.pool.block_on(operation)?
    }

    /// Run an operation on the caller's thread, reporting scheduling
    /// failures to `reporter`.
    pub(crate) fn run_reported<T>(
        &self,
        operation: impl Future<Output = Result<T>>,
        reporter: &ProgressReporter,
    ) -> Result<T> {
        match self.pool.block_on(operation) {
            Ok(result) => result,
            Err(task_error) => {
                let error = DriveError::Task(task_error);
                reporter.fail(&error);
                Err(error)
            }
        }
    }

    /// Submit an operation to the worker pool.
    pub(crate) fn submit<T, F>(&self, operation: F, reporter: Option<Arc<ProgressReporter>>) -> DriveTask<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        DriveTask {
            inner: self.pool.spawn(operation),
            reporter,
        }
    }

    /// Sign `request` as its next attempt would be signed.
    ///
    /// Refreshes the grant first when it has expired.
    pub fn new_signed_request(&self, request: &ApiRequest) -> Result<HttpRequest> {
        self.run(self.core.sign(request, true))
    }

    /// Send `request` and hand the successful, decoded reply to `parser`.
    ///
    /// # Errors
    ///
    /// - [`DriveError::Request`] for a 4xx reply, without retrying
    /// - [`DriveError::Response`] once retries of a 5xx reply or a transport
    ///   failure are exhausted, or when `parser` fails
    /// - [`DriveError::Auth`] when no valid token can be obtained
    pub fn execute<T, P, E>(&self, request: ApiRequest, parser: P) -> Result<T>
    where
        P: FnOnce(&HttpResponse) -> std::result::Result<T, E>,
        E: Into<BoxError>,
    {
        self.run(self.core.execute(&request, parser))
    }

    /// Pooled form of [`Connection::execute`].
    pub fn execute_async<T, P, E>(&self, request: ApiRequest, parser: P) -> DriveTask<T>
    where
        P: FnOnce(&HttpResponse) -> std::result::Result<T, E> + Send + 'static,
        E: Into<BoxError> + 'static,
        T: Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.submit(async move { core.execute(&request, parser).await }, None)
    }

    /// Send `request` and deserialize the JSON reply.
    pub fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.execute(request, json_parser::<T>)
    }

    pub fn execute_json_async<T>(&self, request: ApiRequest) -> DriveTask<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.execute_async(request, json_parser::<T>)
    }

    /// Send `request`, ignoring any reply body (e.g. `DELETE`).
    pub fn execute_empty(&self, request: ApiRequest) -> Result<()> {
        self.execute(request, empty_parser)
    }

    pub fn execute_empty_async(&self, request: ApiRequest) -> DriveTask<()> {
        self.execute_async(request, empty_parser)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.core.config.base_url)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Reqwest transport configured from `config`.
#[cfg(feature = "desktop-http")]
pub fn default_http_client(config: &ConnectionConfig) -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::with_timeout(config.request_timeout).map_err(
        |e| core_runtime::Error::Config(format!("Failed to build HTTP client: {}", e)),
    )?;
    Ok(Arc::new(client))
}
