//! Unsigned API requests.
//!
//! An [`ApiRequest`] names its target either relative to the API base
//! (`/me/drive/root/children`) or as an absolute URL (a `@odata.nextLink`,
//! an upload URL). Signing happens per attempt in the connection.

use crate::error::{DriveError, Result};
use bridge_traits::http::HttpMethod;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use url::Url;

/// Characters escaped inside a single item path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b':');

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub target: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, target)
    }

    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, target)
    }

    /// Serialize `body` as the JSON request body.
    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body)
            .map_err(|e| DriveError::InvalidRequest(format!("JSON serialization failed: {}", e)))?;
        Ok(self.with_body(json, "application/json"))
    }

    pub fn with_body(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.body = Some(body.into());
        self.with_header("Content-Type", content_type)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Whether the target is a complete URL rather than an API path.
    pub fn is_absolute(&self) -> bool {
        self.target.starts_with("https://") || self.target.starts_with("http://")
    }

    /// Full URL for this request against `base`.
    ///
    /// Absolute targets are used verbatim (only the query is appended), so
    /// continuation links come back exactly as the server sent them.
    pub fn resolve(&self, base: &str) -> Result<String> {
        let raw = if self.is_absolute() {
            self.target.clone()
        } else {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.target.trim_start_matches('/')
            )
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| DriveError::InvalidRequest(format!("Invalid URL '{}': {}", raw, e)))?;

        if self.query.is_empty() {
            return Ok(if self.is_absolute() {
                raw
            } else {
                url.to_string()
            });
        }

        url.query_pairs_mut().extend_pairs(self.query.iter());
        Ok(url.to_string())
    }
}

/// Percent-encode an item path, leaving the `/` separators intact.
///
/// ```
/// use provider_onedrive::request::encode_path;
///
/// assert_eq!(encode_path("Documents/Q1 report#2.xlsx"), "Documents/Q1%20report%232.xlsx");
/// ```
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://graph.microsoft.com/v1.0";

    #[test]
    fn test_relative_target_joins_base() {
        let request = ApiRequest::get("/me/drive/root/children");
        assert_eq!(
            request.resolve(BASE).unwrap(),
            "https://graph.microsoft.com/v1.0/me/drive/root/children"
        );

        let request = ApiRequest::get("me/drive");
        assert_eq!(
            request.resolve("https://graph.microsoft.com/v1.0/").unwrap(),
            "https://graph.microsoft.com/v1.0/me/drive"
        );
    }

    #[test]
    fn test_absolute_target_is_verbatim() {
        let link = "https://graph.microsoft.com/v1.0/me/drive/root/children?$skiptoken=a%2Bb";
        assert_eq!(ApiRequest::get(link).resolve(BASE).unwrap(), link);
    }

    #[test]
    fn test_query_pairs_are_encoded() {
        let request = ApiRequest::get("/me/drive/root/search(q='x')")
            .with_query("$select", "id,name")
            .with_query("$top", "50");

        let url = request.resolve(BASE).unwrap();
        assert!(url.ends_with("?%24select=id%2Cname&%24top=50"), "{}", url);
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let request = ApiRequest::get("/me/drive");
        assert!(matches!(
            request.resolve("not a url"),
            Err(DriveError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = ApiRequest::post("/me/drive/root/children")
            .with_json(&serde_json::json!({ "name": "Reports", "folder": {} }))
            .unwrap();

        assert_eq!(
            request.headers,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );
        assert!(request.body.is_some());
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("a b/c?d"), "a%20b/c%3Fd");
        assert_eq!(encode_path("plain/name.txt"), "plain/name.txt");
        assert_eq!(encode_path("100%"), "100%25");
    }
}
