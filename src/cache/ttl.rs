//! Process-local TTL cache for entities and entity lists.

use super::key;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl TtlCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    expirations: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
enum Payload<T> {
    Entity(T),
    List { items: Vec<T>, total: u64 },
}

struct Entry<T> {
    payload: Payload<T>,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// TTL cache holding single entities and paged lists under string keys.
///
/// A read never returns an entry past its expiration, whether or not the
/// background sweep has run yet.
pub struct TtlCache<T> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    ttl: Duration,
    stats: AtomicStats,
    sweeping: AtomicBool,
    stopped: AtomicBool,
    shutdown: CancellationToken,
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    /// Create a cache without a background sweep. Expired entries are still
    /// never served; they are dropped lazily on read or by [`purge_expired`](Self::purge_expired).
    pub fn new(config: TtlCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: config.ttl,
            stats: AtomicStats::default(),
            sweeping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a cache and spawn its periodic sweep on the current tokio runtime.
    ///
    /// Outside a runtime the cache is returned without a sweep; expired entries
    /// are then only dropped on read.
    pub fn start(config: TtlCacheConfig) -> Arc<Self> {
        let interval = config.sweep_interval;
        let cache = Arc::new(Self::new(config));
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, cache sweep not started");
            return cache;
        };
        let weak = Arc::downgrade(&cache);
        let token = cache.shutdown.clone();
        runtime.spawn(sweep_loop(weak, token, interval));
        cache.sweeping.store(true, Ordering::Release);
        cache
    }

    /// Whether a background sweep was started and has not been stopped.
    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_entity(&self, key: &str) -> Option<T> {
        match self.lookup(key)? {
            Payload::Entity(value) => Some(value),
            Payload::List { .. } => None,
        }
    }

    pub fn set_entity(&self, key: impl Into<String>, value: T) {
        self.store(key.into(), Payload::Entity(value));
    }

    pub fn get_list(&self, key: &str) -> Option<(Vec<T>, u64)> {
        match self.lookup(key)? {
            Payload::List { items, total } => Some((items, total)),
            Payload::Entity(_) => None,
        }
    }

    pub fn set_list(&self, key: impl Into<String>, items: Vec<T>, total: u64) {
        self.store(key.into(), Payload::List { items, total });
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.write().remove(key).is_some();
        if removed {
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every key matching `pattern` (exact, or prefix when it ends with `*`).
    /// Returns the number of removed entries.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|k, _| !key::matches(pattern, k));
        let removed = before - entries.len();
        drop(entries);
        if removed > 0 {
            self.stats
                .invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(pattern, removed, "cache pattern invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.read().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.stats
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Stop the background sweep. Safe to call any number of times.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shutdown.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    fn lookup(&self, key: &str) -> Option<Payload<T>> {
        let now = Instant::now();
        let hit = {
            let entries = self.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Some(entry.payload.clone()),
                Some(_) => None,
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };
        match hit {
            Some(payload) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            None => {
                // Expired: drop it now unless a writer already replaced it.
                let mut entries = self.write();
                if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
                    entries.remove(key);
                    self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn store(&self, key: String, payload: Payload<T>) {
        let entry = Entry {
            payload,
            expires_at: Instant::now() + self.ttl,
        };
        self.write().insert(key, entry);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry<T>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry<T>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Drop for TtlCache<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn sweep_loop<T: Clone + Send + Sync + 'static>(
    cache: Weak<TtlCache<T>>,
    shutdown: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "cache sweep removed expired entries");
                }
            }
        }
    }
    debug!("cache sweep stopped");
}
