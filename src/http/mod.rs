//! HTTP 边界模块：请求/响应类型、处理器抽象，以及响应缓存与按客户端限流中间件。
//!
//! # HTTP Boundary Module
//!
//! Routing lives outside this crate. What is here is the contract a router hands
//! requests through, plus the two middlewares that wrap every read:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`HttpRequest`] / [`HttpResponse`] | Transport-neutral request and response values |
//! | [`Handler`] | Async request handler; middlewares are handlers around handlers |
//! | [`handler_fn`] | Adapts an async closure into a [`Handler`] |
//! | [`ResponseCache`] | Whole-response cache for `GET` with `X-Cache: HIT/MISS/BYPASS` |
//! | [`RateLimit`] | Per-client token bucket, `429` with `Retry-After` on rejection |
//!
//! ## Composition
//!
//! ```rust,no_run
//! use podcast_sync::cache::MemoryCache;
//! use podcast_sync::http::{handler_fn, HttpResponse, RateLimit, RateLimitConfig, ResponseCache, ResponseCacheConfig};
//! use podcast_sync::resilience::ClientRateLimiter;
//! use std::sync::Arc;
//!
//! let inner = handler_fn(|_req| async { HttpResponse::ok().with_body("hello") });
//! let cached = ResponseCache::new(inner, Arc::new(MemoryCache::new(1024)), ResponseCacheConfig::default());
//! let limited = RateLimit::new(cached, Arc::new(ClientRateLimiter::default()), RateLimitConfig::default());
//! ```

mod rate_limit;
mod response_cache;

pub use rate_limit::{client_id, RateLimit, RateLimitConfig};
pub use response_cache::{CachedResponse, ResponseCache, ResponseCacheConfig, ResponseCacheStats};

pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};

use crate::Error;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    /// Decoded query parameters in arrival order.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub client_addr: Option<IpAddr>,
    pub body: Bytes,
}

impl HttpRequest {
    /// Build a request from a raw `path?query` target.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = Self::parse_uri(target);
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            client_addr: None,
            body: Bytes::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    /// Split `path?query` and percent-decode the query pairs.
    pub fn parse_uri(target: &str) -> (String, Vec<(String, String)>) {
        let (path, raw_query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        let path = if path.is_empty() { "/" } else { path };
        let query = url::form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();
        (path.to_string(), query)
    }

    /// Add a header; invalid names or values are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Serialize `value` as a JSON body.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> crate::Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    /// Machine-readable error body: `{"error":{"code":..,"message":..}}`.
    pub fn error(status: StatusCode, code: &str, message: &str) -> Self {
        let body = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(n), Ok(v)) => {
            headers.insert(n, v);
        }
        _ => debug!(header = name, "invalid header dropped"),
    }
}

impl Error {
    /// HTTP status a router should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Remote { .. } | Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PartialSync(_)
            | Error::Configuration { .. }
            | Error::Runtime { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_response(&self) -> HttpResponse {
        let mut resp = HttpResponse::error(self.status_code(), self.code(), &self.to_string());
        if let Error::ResourceExhausted {
            retry_after: Some(after),
            ..
        } = self
        {
            resp = resp.with_header("retry-after", &retry_after_secs(*after).to_string());
        }
        resp
    }
}

/// Whole seconds, rounded up, never below one.
pub(crate) fn retry_after_secs(after: std::time::Duration) -> u64 {
    let secs = after.as_secs() + u64::from(after.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: HttpRequest) -> HttpResponse;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, req: HttpRequest) -> HttpResponse {
        (**self).handle(req).await
    }
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Box<H> {
    async fn handle(&self, req: HttpRequest) -> HttpResponse {
        (**self).handle(req).await
    }
}

pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    async fn handle(&self, req: HttpRequest) -> HttpResponse {
        (self.f)(req).await
    }
}
