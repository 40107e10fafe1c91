//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, StreamingResponse},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - TLS support by default
/// - Streamed request and response bodies
///
/// Exactly one network exchange is made per call. Retries, authorization and
/// gzip decoding are handled by the caller.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    /// Build reqwest request from bridge request, without its body
    fn build_request(&self, request: HttpRequest) -> (reqwest::RequestBuilder, Option<bytes::Bytes>) {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        (req, request.body)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| {
            warn!(error = %e, "HTTP request failed");
            Self::convert_error(e)
        })
    }

    fn convert_error(error: reqwest::Error) -> BridgeError {
        if error.is_timeout() {
            BridgeError::Timeout(error.to_string())
        } else if error.is_connect() {
            BridgeError::ConnectionFailed(error.to_string())
        } else {
            BridgeError::OperationFailed(error.to_string())
        }
    }

    fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }

    async fn buffer(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers = Self::collect_headers(&response);
        let body = response.bytes().await.map_err(Self::convert_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "Executing HTTP request");

        let (mut builder, body) = self.build_request(request);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = self.send(builder).await?;
        Self::buffer(response).await
    }

    async fn execute_stream(&self, request: HttpRequest) -> Result<StreamingResponse> {
        debug!(method = %request.method, url = %request.url, "Executing streaming HTTP request");

        let (mut builder, body) = self.build_request(request);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = self.send(builder).await?;
        let status = response.status().as_u16();
        let headers = Self::collect_headers(&response);
        let body: ByteStream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(
        &self,
        request: HttpRequest,
        body: ByteStream,
        content_length: u64,
    ) -> Result<HttpResponse> {
        debug!(
            method = %request.method,
            url = %request.url,
            content_length,
            "Executing HTTP request with streamed body"
        );

        let (builder, _) = self.build_request(request);
        let builder = builder
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(body));

        let response = self.send(builder).await?;
        Self::buffer(response).await
    }
}
