//! 缓存模块：实体级 TTL 缓存、键生成与字节缓存后端。
//!
//! # Caching Module
//!
//! Two independent caches live here:
//!
//! - an entity-level read-through cache ([`TtlCache`]) used by the sync engine for
//!   single episodes and paged episode lists, and
//! - a byte-oriented store ([`CacheBackend`]) used by the HTTP response cache.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TtlCache`] | Typed entity/list cache with expiry, pattern invalidation and a background sweep |
//! | [`TtlCacheConfig`] | TTL and sweep interval |
//! | [`CacheStats`] | Hit/miss/expiry counters |
//! | [`CacheBackend`] | Trait for byte stores keyed by string |
//! | [`MemoryCache`] | Bounded in-memory byte store |
//! | [`NullCache`] | No-op store for disabling caching |
//! | [`key`] | Key and invalidation-pattern generation |
//!
//! ## Example
//!
//! ```rust
//! use podcast_sync::cache::{key, TtlCache, TtlCacheConfig};
//! use std::time::Duration;
//!
//! let cache: TtlCache<String> =
//!     TtlCache::new(TtlCacheConfig::new().with_ttl(Duration::from_secs(60)));
//! cache.set_list(key::podcast_episodes(5, 1, 20), vec!["ep".to_string()], 1);
//!
//! // Any change to podcast 5 drops every cached page of it.
//! cache.invalidate_pattern(&key::podcast_pattern(5));
//! assert!(cache.get_list(&key::podcast_episodes(5, 1, 20)).is_none());
//! ```

mod backend;
pub mod key;
mod ttl;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use ttl::{CacheStats, TtlCache, TtlCacheConfig};
