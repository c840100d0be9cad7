//! 弹性模式模块：提供按客户端限流、令牌桶与重试策略。
//!
//! # Resilience Primitives Module
//!
//! Protects both the remote catalog and this service from overload.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Non-blocking token bucket |
//! | [`client_limiter`] | Per-client buckets with a once-only idle-eviction janitor |
//! | [`retry`] | Exponential backoff for transient remote failures |
//!
//! ## Per-Client Rate Limiting
//!
//! ```rust
//! use podcast_sync::resilience::client_limiter::ClientRateLimiter;
//!
//! let limiter = ClientRateLimiter::default();
//! // 5 requests/second, burst of 10, per client address
//! if limiter.allow("203.0.113.7", 5.0, 10) {
//!     // handle request...
//! }
//! ```
//!
//! Buckets are created lazily and removed once idle past the configured
//! threshold, so memory stays bounded by the number of recently active clients.

pub mod client_limiter;
pub mod rate_limiter;
pub mod retry;

pub use client_limiter::{ClientRateLimiter, ClientRateLimiterConfig};
pub use rate_limiter::{TokenBucket, TokenBucketConfig};
pub use retry::RetryPolicy;
