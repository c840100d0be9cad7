use super::{Handler, HttpRequest, HttpResponse};
use crate::resilience::ClientRateLimiter;
use crate::Error;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client. `<= 0` disables limiting.
    pub rps: f64,
    pub burst: u32,
    /// Take the client identity from `X-Forwarded-For` / `X-Real-IP` when present.
    pub trust_forwarded: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 10.0,
            burst: 20,
            trust_forwarded: true,
        }
    }
}

impl RateLimitConfig {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            rps,
            burst,
            ..Self::default()
        }
    }
    pub fn with_trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }
}

/// Client identity used as the rate-limit bucket key.
///
/// With `trust_forwarded`, the first hop of `X-Forwarded-For` wins, then
/// `X-Real-IP`; otherwise (or when both are absent) the socket address.
pub fn client_id(req: &HttpRequest, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = req
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
        if let Some(ip) = req.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty()) {
            return ip.to_string();
        }
    }
    req.client_addr
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rejects requests from clients that exhausted their bucket with `429`.
pub struct RateLimit<H> {
    inner: H,
    limiter: Arc<ClientRateLimiter>,
    config: RateLimitConfig,
}

impl<H: Handler> RateLimit<H> {
    /// Wrap `inner`. The limiter's idle-bucket janitor is started here; building
    /// several middlewares over the same limiter still runs a single janitor.
    pub fn new(inner: H, limiter: Arc<ClientRateLimiter>, config: RateLimitConfig) -> Self {
        limiter.start_janitor();
        Self {
            inner,
            limiter,
            config,
        }
    }

    pub fn limiter(&self) -> &Arc<ClientRateLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl<H: Handler> Handler for RateLimit<H> {
    async fn handle(&self, req: HttpRequest) -> HttpResponse {
        let id = client_id(&req, self.config.trust_forwarded);
        if self.limiter.allow(&id, self.config.rps, self.config.burst) {
            return self.inner.handle(req).await;
        }
        let retry_after = self
            .limiter
            .retry_after(&id)
            .unwrap_or(Duration::from_secs(1));
        debug!(client = %id, path = %req.path, "request rate limited");
        Error::ResourceExhausted {
            message: "too many requests".to_string(),
            retry_after: Some(retry_after),
        }
        .to_response()
    }
}
