//! Shared fakes for connection tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{ByteStream, HttpClient, HttpRequest, HttpResponse, StreamingResponse};
use bytes::Bytes;
use core_auth::{AuthError, Authenticator, TokenState};
use core_runtime::config::{ConnectionConfig, RetrySettings};
use futures::StreamExt;
use provider_onedrive::{Connection, DriveError, ProgressListener};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Box<dyn Fn(&HttpRequest, usize) -> BridgeResult<HttpResponse> + Send + Sync>;
type StreamResponder =
    Box<dyn Fn(&HttpRequest, usize) -> BridgeResult<StreamingResponse> + Send + Sync>;

/// API server stand-in that records every request.
///
/// Buffered and streamed-body calls go to `responder`; streamed-response
/// calls go to the stream responder. Both get the zero-based call index.
pub struct FakeGraph {
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
    uploads: Mutex<Vec<(Vec<u8>, u64)>>,
    responder: Responder,
    stream_responder: Option<StreamResponder>,
    delay: Duration,
}

impl FakeGraph {
    pub fn new(
        responder: impl Fn(&HttpRequest, usize) -> BridgeResult<HttpResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            stream_responder: None,
            delay: Duration::ZERO,
        }
    }

    pub fn streaming(
        responder: impl Fn(&HttpRequest, usize) -> BridgeResult<StreamingResponse>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        let mut fake = Self::new(|_, _| Ok(HttpResponse::new(500, "not expected")));
        fake.stream_responder = Some(Box::new(responder));
        fake
    }

    /// Hold every reply for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Bodies received through `send_stream`, with the declared length.
    pub fn uploads(&self) -> Vec<(Vec<u8>, u64)> {
        self.uploads.lock().unwrap().clone()
    }

    async fn record(&self, request: &HttpRequest) -> usize {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        index
    }
}

#[async_trait]
impl HttpClient for FakeGraph {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let index = self.record(&request).await;
        (self.responder)(&request, index)
    }

    async fn execute_stream(&self, request: HttpRequest) -> BridgeResult<StreamingResponse> {
        let index = self.record(&request).await;
        match &self.stream_responder {
            Some(responder) => responder(&request, index),
            None => Err(BridgeError::NotAvailable("streaming not faked".to_string())),
        }
    }

    async fn send_stream(
        &self,
        request: HttpRequest,
        mut body: ByteStream,
        content_length: u64,
    ) -> BridgeResult<HttpResponse> {
        let index = self.record(&request).await;

        let mut received = Vec::new();
        while let Some(chunk) = body.next().await {
            received.extend_from_slice(&chunk?);
        }
        self.uploads.lock().unwrap().push((received, content_length));

        (self.responder)(&request, index)
    }
}

/// Streamed reply made of `chunks`.
pub fn stream_reply(status: u16, chunks: Vec<std::io::Result<Bytes>>) -> StreamingResponse {
    let length: usize = chunks
        .iter()
        .map(|chunk| chunk.as_ref().map(|c| c.len()).unwrap_or(0))
        .sum();

    StreamingResponse {
        status,
        headers: HashMap::from([("Content-Length".to_string(), length.to_string())]),
        body: Box::pin(futures::stream::iter(chunks)),
    }
}

pub fn json_reply(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(status, serde_json::to_vec(&body).unwrap())
        .with_header("Content-Type", "application/json")
}

/// Authenticator handing out `Bearer token-<n>`, where `n` counts the
/// tokens issued so far.
pub struct CountingAuth {
    issued: AtomicUsize,
    endpoint: Option<String>,
    fail: bool,
}

impl CountingAuth {
    pub fn new() -> Self {
        Self {
            issued: AtomicUsize::new(0),
            endpoint: None,
            fail: false,
        }
    }

    pub fn bound_to(endpoint: &str) -> Self {
        Self {
            endpoint: Some(endpoint.to_string()),
            ..Self::new()
        }
    }

    /// Every token request fails as if the grant was never established.
    pub fn unauthenticated() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for CountingAuth {
    async fn authenticate(&self, _code: &str) -> core_auth::Result<()> {
        Ok(())
    }

    async fn is_expired(&self) -> core_auth::Result<bool> {
        Ok(false)
    }

    async fn refresh(&self) -> core_auth::Result<()> {
        Ok(())
    }

    async fn get_valid_token(&self) -> core_auth::Result<String> {
        if self.fail {
            return Err(AuthError::NotAuthenticated);
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("Bearer token-{}", n))
    }

    async fn bound_endpoint(&self) -> Option<String> {
        self.endpoint.clone()
    }

    async fn current_token(&self) -> Option<Arc<TokenState>> {
        None
    }

    async fn reset(&self) {}
}

/// Fast retries so failure paths finish quickly.
pub fn config() -> ConnectionConfig {
    ConnectionConfig::personal()
        .with_worker_threads(2)
        .with_retry(RetrySettings::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
        ))
}

pub fn connect(http: Arc<FakeGraph>) -> Connection {
    Connection::with_authenticator(config(), Arc::new(CountingAuth::new()), http).unwrap()
}

/// Listener that records every callback.
#[derive(Default)]
pub struct RecordingListener {
    pub updates: Mutex<Vec<(u64, Option<u64>)>>,
    pub completed: Mutex<Vec<u64>>,
    pub failures: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn updates(&self) -> Vec<(u64, Option<u64>)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<u64> {
        self.completed.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    /// Updates never shrink and end at `total`.
    pub fn assert_monotonic_to(&self, total: u64) {
        let updates = self.updates();
        assert!(!updates.is_empty(), "no progress reported");
        for pair in updates.windows(2) {
            assert!(pair[0].0 < pair[1].0, "progress went backwards: {:?}", updates);
        }
        assert_eq!(updates.last().map(|u| u.0), Some(total));
    }
}

impl ProgressListener for RecordingListener {
    fn on_update(&self, bytes_so_far: u64, expected: Option<u64>) {
        self.updates.lock().unwrap().push((bytes_so_far, expected));
    }

    fn on_complete(&self, total: u64) {
        self.completed.lock().unwrap().push(total);
    }

    fn on_failure(&self, error: &DriveError) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}
