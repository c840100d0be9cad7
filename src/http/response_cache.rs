use super::{Handler, HttpRequest, HttpResponse, Method, StatusCode};
use crate::cache::{key, CacheBackend};
use crate::Result;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const X_CACHE: &str = "x-cache";

/// Headers that are either regenerated on replay or must never be shared.
const UNSTORED_HEADERS: &[&str] = &[
    "set-cookie",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-type",
    "date",
    "age",
    "etag",
    X_CACHE,
];

#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub enabled: bool,
    pub default_ttl: Duration,
    /// Per-path TTL overrides. An exact path wins over the longest matching prefix.
    pub path_ttls: Vec<(String, Duration)>,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(60),
            path_ttls: Vec::new(),
        }
    }
}

impl ResponseCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
    pub fn with_path_ttl(mut self, path: impl Into<String>, ttl: Duration) -> Self {
        self.path_ttls.push((path.into(), ttl));
        self
    }

    pub fn ttl_for(&self, path: &str) -> Duration {
        if let Some((_, ttl)) = self.path_ttls.iter().find(|(p, _)| p == path) {
            return *ttl;
        }
        self.path_ttls
            .iter()
            .filter(|(p, _)| path.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }
}

/// A stored response.
///
/// Serialized as `name: value` metadata lines, a blank line, then the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub etag: String,
    /// Unix milliseconds.
    pub stored_at: i64,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn from_response(resp: &HttpResponse, stored_at: i64) -> Self {
        let headers = resp
            .headers
            .iter()
            .filter(|(name, _)| !UNSTORED_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            status: resp.status,
            content_type: resp.header("content-type").map(str::to_string),
            headers,
            etag: etag_for(&resp.body),
            stored_at,
            body: resp.body.clone(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut head = format!("status: {}\n", self.status.as_u16());
        if let Some(ct) = &self.content_type {
            head.push_str(&format!("content-type: {}\n", ct));
        }
        head.push_str(&format!("etag: {}\n", self.etag));
        head.push_str(&format!("stored-at: {}\n", self.stored_at));
        for (name, value) in &self.headers {
            head.push_str(&format!("header: {}: {}\n", name, value));
        }
        head.push('\n');

        let mut buf = BytesMut::with_capacity(head.len() + self.body.len());
        buf.put_slice(head.as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// `None` when the record is truncated or malformed.
    pub fn decode(raw: &Bytes) -> Option<Self> {
        let split = raw.windows(2).position(|w| w == b"\n\n")?;
        let head = std::str::from_utf8(&raw[..split]).ok()?;
        let body = raw.slice(split + 2..);

        let mut status = None;
        let mut content_type = None;
        let mut etag = None;
        let mut stored_at = None;
        let mut headers = Vec::new();
        for line in head.lines() {
            let (name, value) = line.split_once(": ")?;
            match name {
                "status" => status = StatusCode::from_u16(value.parse().ok()?).ok(),
                "content-type" => content_type = Some(value.to_string()),
                "etag" => etag = Some(value.to_string()),
                "stored-at" => stored_at = value.parse().ok(),
                "header" => {
                    let (h, v) = value.split_once(": ")?;
                    headers.push((h.to_string(), v.to_string()));
                }
                _ => {}
            }
        }
        Some(Self {
            status: status?,
            content_type,
            headers,
            etag: etag?,
            stored_at: stored_at?,
            body,
        })
    }

    pub fn age_secs(&self, now_millis: i64) -> u64 {
        (now_millis.saturating_sub(self.stored_at).max(0) / 1000) as u64
    }

    fn replay(&self, age: u64) -> HttpResponse {
        let mut resp = HttpResponse::new(self.status).with_body(self.body.clone());
        for (name, value) in &self.headers {
            resp = resp.with_header(name, value);
        }
        if let Some(ct) = &self.content_type {
            resp = resp.with_header("content-type", ct);
        }
        resp.with_header("etag", &self.etag)
            .with_header("age", &age.to_string())
            .with_header(X_CACHE, "HIT")
    }

    fn not_modified(&self, age: u64) -> HttpResponse {
        HttpResponse::new(StatusCode::NOT_MODIFIED)
            .with_header("etag", &self.etag)
            .with_header("age", &age.to_string())
            .with_header(X_CACHE, "HIT")
    }
}

/// Quoted prefix of the body's SHA-256.
pub(crate) fn etag_for(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("\"{}\"", hex)
}

fn client_bypass(req: &HttpRequest) -> bool {
    let cache_control = req
        .headers
        .get_all("cache-control")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase().replace(' ', ""))
        .any(|d| d == "no-cache" || d == "no-store" || d == "max-age=0");
    cache_control
        || req
            .header("pragma")
            .map(|p| p.to_ascii_lowercase().contains("no-cache"))
            .unwrap_or(false)
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || tag.trim_start_matches("W/") == etag)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub stores: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    stores: AtomicU64,
}

/// Whole-response cache for idempotent reads.
///
/// Only `GET` is considered. Everything else passes straight through and is
/// never stored.
pub struct ResponseCache<H> {
    inner: H,
    store: Arc<dyn CacheBackend>,
    config: ResponseCacheConfig,
    counters: Counters,
}

impl<H: Handler> ResponseCache<H> {
    pub fn new(inner: H, store: Arc<dyn CacheBackend>, config: ResponseCacheConfig) -> Self {
        Self {
            inner,
            store,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ResponseCacheConfig {
        &self.config
    }

    /// Drop every cached variant of `path`, whatever its query.
    pub async fn invalidate_path(&self, path: &str) -> Result<usize> {
        let removed = self
            .store
            .delete_pattern(&key::http_path_pattern(&Method::GET, path))
            .await?;
        debug!(path, removed, "cached responses invalidated");
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            bypasses: self.counters.bypasses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
        }
    }

    async fn lookup(&self, cache_key: &str) -> Option<CachedResponse> {
        match self.store.get(cache_key).await {
            Ok(Some(raw)) => match CachedResponse::decode(&raw) {
                Some(record) => Some(record),
                None => {
                    warn!(key = cache_key, "malformed cached response dropped");
                    let _ = self.store.delete(cache_key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = cache_key, error = %e, "response cache read failed");
                None
            }
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for ResponseCache<H> {
    async fn handle(&self, req: HttpRequest) -> HttpResponse {
        if !self.config.enabled || req.method != Method::GET {
            return self.inner.handle(req).await;
        }

        if client_bypass(&req) {
            self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
            return self.inner.handle(req).await.with_header(X_CACHE, "BYPASS");
        }

        let cache_key = key::http_response(&req.method, &req.path, &req.query);
        if let Some(record) = self.lookup(&cache_key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            let age = record.age_secs(Utc::now().timestamp_millis());
            if let Some(inm) = req.header("if-none-match") {
                if etag_matches(inm, &record.etag) {
                    return record.not_modified(age);
                }
            }
            return record.replay(age);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let path = req.path.clone();
        let resp = self.inner.handle(req).await;
        if resp.status != StatusCode::OK || resp.body.is_empty() {
            return resp.with_header(X_CACHE, "MISS");
        }

        let record = CachedResponse::from_response(&resp, Utc::now().timestamp_millis());
        let ttl = self.config.ttl_for(&path);
        match self.store.set(&cache_key, record.encode(), ttl).await {
            Ok(()) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(key = %cache_key, error = %e, "response cache write failed"),
        }
        resp.with_header("etag", &record.etag)
            .with_header(X_CACHE, "MISS")
    }
}
