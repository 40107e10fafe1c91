//! Shared fakes for authentication tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{ByteStream, HttpClient, HttpRequest, HttpResponse, StreamingResponse};
use core_auth::{ClientCredentials, TokenState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const START_MILLIS: i64 = 1_700_000_000_000;

type Responder = Box<dyn Fn(&HttpRequest, usize) -> BridgeResult<HttpResponse> + Send + Sync>;

/// Authorization server stand-in that records every request.
pub struct FakeTokenServer {
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
    responder: Responder,
    delay: Duration,
}

impl FakeTokenServer {
    /// `responder` gets the request and its zero-based call index.
    pub fn new(
        responder: impl Fn(&HttpRequest, usize) -> BridgeResult<HttpResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            delay: Duration::ZERO,
        }
    }

    /// Hold every reply for `delay` so concurrent callers overlap.
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

    pub fn form(&self, index: usize) -> HashMap<String, String> {
        let request = &self.requests()[index];
        serde_urlencoded::from_bytes(request.body.as_deref().unwrap_or_default()).unwrap()
    }
}

#[async_trait]
impl HttpClient for FakeTokenServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        (self.responder)(&request, index)
    }

    async fn execute_stream(&self, _request: HttpRequest) -> BridgeResult<StreamingResponse> {
        Err(BridgeError::NotAvailable("streaming not faked".to_string()))
    }

    async fn send_stream(
        &self,
        _request: HttpRequest,
        _body: ByteStream,
        _content_length: u64,
    ) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable("streaming not faked".to_string()))
    }
}

pub fn token_reply(access: &str, refresh: Option<&str>, expires_in: i64) -> HttpResponse {
    let mut body = serde_json::json!({
        "token_type": "Bearer",
        "access_token": access,
        "expires_in": expires_in,
        "scope": "Files.ReadWrite offline_access",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::from(refresh);
    }
    HttpResponse::new(200, serde_json::to_vec(&body).unwrap())
}

pub fn credentials() -> ClientCredentials {
    ClientCredentials::new(
        "client-123",
        Some("secret".to_string()),
        "https://login.live.com/oauth20_desktop.srf",
    )
    .unwrap()
}

/// A grant that expires one hour after [`START_MILLIS`].
pub fn token(access: &str, resource: Option<&str>) -> TokenState {
    TokenState::new(
        "Bearer",
        vec!["Files.ReadWrite".to_string()],
        access,
        "refresh-0",
        START_MILLIS + 3_600_000,
        resource.map(str::to_string),
    )
    .unwrap()
}
