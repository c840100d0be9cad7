//! Service assembly: builds the long-lived components once and wires the
//! middleware stack around request handlers.

use crate::cache::{key, CacheBackend, MemoryCache, NullCache, TtlCache};
use crate::config::ServiceConfig;
use crate::http::{Handler, Method, RateLimit, ResponseCache};
use crate::remote::{HttpRemoteFetcher, RemoteFetcher};
use crate::resilience::ClientRateLimiter;
use crate::storage::{EpisodeRepository, MemoryRepository};
use crate::sync::SyncEngine;
use crate::types::Episode;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Owns the sync engine, the entity cache, the client rate limiter and the
/// response-cache store.
///
/// Every handler wrapped by [`wrap`](Self::wrap) shares these instances, so the
/// rate limiter's janitor and the cache sweep each run exactly once. Must be
/// built inside a tokio runtime.
pub struct SyncService {
    config: ServiceConfig,
    engine: SyncEngine,
    entity_cache: Arc<TtlCache<Episode>>,
    limiter: Arc<ClientRateLimiter>,
    response_store: Arc<dyn CacheBackend>,
}

impl SyncService {
    pub fn new(
        config: ServiceConfig,
        fetcher: Arc<dyn RemoteFetcher>,
        repo: Arc<dyn EpisodeRepository>,
    ) -> Result<Self> {
        config.validate()?;
        let entity_cache = TtlCache::start(config.ttl_cache_config());
        let engine = SyncEngine::new(fetcher, repo, entity_cache.clone(), config.sync_config());
        let limiter = Arc::new(ClientRateLimiter::new(config.client_limiter_config()));
        limiter.start_janitor();
        let response_store: Arc<dyn CacheBackend> = if config.response_cache.enabled {
            Arc::new(MemoryCache::new(config.response_cache.max_entries))
        } else {
            Arc::new(NullCache::new())
        };

        info!(
            max_concurrency = config.sync.max_concurrency,
            cache_ttl_secs = config.cache.ttl_secs,
            rps = config.rate_limit.rps,
            response_store = response_store.name(),
            "sync service ready"
        );
        Ok(Self {
            config,
            engine,
            entity_cache,
            limiter,
            response_store,
        })
    }

    /// Build against the HTTP catalog client and an in-memory repository.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpRemoteFetcher::new(config.remote_config())?);
        Self::new(config, fetcher, Arc::new(MemoryRepository::new()))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn entity_cache(&self) -> &Arc<TtlCache<Episode>> {
        &self.entity_cache
    }

    pub fn rate_limiter(&self) -> &Arc<ClientRateLimiter> {
        &self.limiter
    }

    /// Store shared by every response cache this service wraps. A
    /// [`NullCache`] when the response cache is disabled.
    pub fn response_store(&self) -> &Arc<dyn CacheBackend> {
        &self.response_store
    }

    /// Wrap `handler` as `RateLimit -> ResponseCache -> handler`.
    pub fn wrap<H: Handler>(&self, handler: H) -> RateLimit<ResponseCache<H>> {
        let cached = ResponseCache::new(
            handler,
            self.response_store.clone(),
            self.config.response_cache_config(),
        );
        RateLimit::new(cached, self.limiter.clone(), self.config.rate_limit_config())
    }

    /// Drop cached responses for `path` across every wrapped handler.
    pub async fn invalidate_responses(&self, path: &str) -> Result<usize> {
        self.response_store
            .delete_pattern(&key::http_path_pattern(&Method::GET, path))
            .await
    }

    /// Drain background syncs within the configured grace period, then stop the
    /// cache sweep and the rate-limit janitor. Returns `true` if no sync had to
    /// be cancelled.
    pub async fn shutdown(&self) -> bool {
        let drained = self.engine.shutdown(self.config.shutdown_grace()).await;
        self.entity_cache.stop();
        self.limiter.stop();
        info!(drained, "sync service stopped");
        drained
    }
}
