//! # AppShell Net
//!
//! Request/response model and the network capability the offline worker
//! intercepts in front of.
//!
//! ## Design Goals
//!
//! 1. **Owned values**: responses carry their whole body, so duplicating one
//!    for the cache is a cheap reference-counted clone
//! 2. **Injected transport**: everything above this crate talks to
//!    [`NetworkFetch`], never to `reqwest` directly
//! 3. **One cache key policy**: [`normalize_path`] is the only way a URL
//!    becomes a store key

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
pub use url::Url;

pub mod fetcher;

pub use fetcher::{HttpFetcher, LoaderConfig, OfflineFetcher};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unavailable")]
    Offline,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as reported by the host for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Full document load (address bar, link click).
    Navigate,
    /// Anything a loaded document asks for: scripts, styles, images, API calls.
    #[default]
    Subresource,
}

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET sub-resource request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
        }
    }

    /// Create a navigation request for a document.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Parse `url` and create a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this request is a full document navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// The exact key: the full URL, query and all.
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }

    /// The path-only key used for every store write.
    pub fn normalized_path(&self) -> String {
        normalize_path(&self.url)
    }
}

/// Reduce a URL to its path, dropping scheme, host, query and fragment.
pub fn normalize_path(url: &Url) -> String {
    match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    /// Fetched over the network for this request.
    #[default]
    Network,
    /// Read from the active cache generation.
    Cache,
    /// The cached offline fallback document.
    Fallback,
    /// Built locally because nothing else was available.
    Synthesized,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Fallback => "fallback",
            ResponseSource::Synthesized => "synthesized",
        };
        f.write_str(name)
    }
}

/// A fully buffered response. Clones share the body buffer.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    /// Create a response with the given status and body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    /// Build a local response, tagged [`ResponseSource::Synthesized`].
    pub fn synthesized(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self::new(status, body)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static(content_type))
            .with_source(ResponseSource::Synthesized)
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Retag the response source.
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// The `Content-Type` header, if present and valid UTF-8.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network transport capability.
///
/// Any HTTP status counts as a successful fetch; only a transport failure
/// is an `Err`.
#[async_trait]
pub trait NetworkFetch: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/app.js").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/javascript"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(!request.is_navigation());
        assert_eq!(request.mode, RequestMode::Subresource);
    }

    #[test]
    fn test_navigation_request() {
        let request = Request::navigate(Url::parse("https://example.com/deep/link").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn test_request_parse_rejects_relative() {
        assert!(matches!(
            Request::parse("/index.html"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_normalize_strips_query_and_host() {
        let a = Url::parse("https://example.com/img/a.png?v=3#top").unwrap();
        let b = Url::parse("http://cdn.example.org/img/a.png").unwrap();
        assert_eq!(normalize_path(&a), "/img/a.png");
        assert_eq!(normalize_path(&a), normalize_path(&b));
    }

    #[test]
    fn test_normalize_root() {
        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(normalize_path(&url), "/");
    }

    #[test]
    fn test_exact_key_keeps_query() {
        let request = Request::parse("https://example.com/data.json?page=2").unwrap();
        assert_eq!(request.cache_key(), "https://example.com/data.json?page=2");
        assert_eq!(request.normalized_path(), "/data.json");
    }

    #[test]
    fn test_synthesized_response() {
        let response = Response::synthesized(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "Offline");
        assert_eq!(response.source, ResponseSource::Synthesized);
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.text().unwrap(), "Offline");
        assert!(!response.ok());
    }

    #[test]
    fn test_response_clone_shares_body() {
        let original = Response::new(StatusCode::OK, Bytes::from_static(b"shell"));
        let copy = original.clone();
        assert_eq!(original.body.as_ptr(), copy.body.as_ptr());
    }
}
