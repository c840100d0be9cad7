//! Per-client token buckets with idle eviction.

use super::rate_limiter::{TokenBucket, TokenBucketConfig};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ClientRateLimiterConfig {
    /// How often the janitor scans for idle buckets.
    pub janitor_interval: Duration,
    /// Buckets untouched for longer than this are dropped.
    pub idle_timeout: Duration,
}

impl Default for ClientRateLimiterConfig {
    fn default() -> Self {
        Self {
            janitor_interval: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl ClientRateLimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

struct Bucket {
    limiter: Arc<TokenBucket>,
    last_seen: Mutex<Instant>,
}

impl Bucket {
    fn new(rps: f64, burst: u32) -> Self {
        let cfg = TokenBucketConfig::new()
            .with_refill_rate(rps)
            .with_max_tokens(burst.max(1));
        Self {
            limiter: Arc::new(TokenBucket::new(cfg)),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self, now: Instant) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Rate limiter keyed by client identity (usually the network address).
///
/// Each client gets its own token bucket on first sight. A janitor task drops
/// buckets that have been idle past `idle_timeout`; the next request from such a
/// client starts again with a full burst.
pub struct ClientRateLimiter {
    buckets: DashMap<String, Bucket>,
    cfg: ClientRateLimiterConfig,
    janitor_started: AtomicBool,
    stopped: AtomicBool,
    shutdown: CancellationToken,
}

impl ClientRateLimiter {
    pub fn new(cfg: ClientRateLimiterConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            cfg,
            janitor_started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ClientRateLimiterConfig {
        &self.cfg
    }

    /// Take one token from `client_id`'s bucket, creating it if needed.
    ///
    /// Last-seen is refreshed whether the request is allowed or not.
    pub fn allow(&self, client_id: &str, rps: f64, burst: u32) -> bool {
        let now = Instant::now();
        // Hold the shard guard only long enough to clone the limiter handle.
        let limiter = {
            let bucket = self
                .buckets
                .entry(client_id.to_string())
                .or_insert_with(|| Bucket::new(rps, burst));
            bucket.touch(now);
            Arc::clone(&bucket.limiter)
        };
        limiter.try_acquire()
    }

    /// Estimated wait before `client_id` would be allowed again.
    pub fn retry_after(&self, client_id: &str) -> Option<Duration> {
        let limiter = self
            .buckets
            .get(client_id)
            .map(|b| Arc::clone(&b.limiter))?;
        Some(limiter.wait_time())
    }

    /// Remove buckets idle longer than the configured timeout. Returns the count removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        let idle = self.cfg.idle_timeout;
        self.buckets.retain(|_, b| b.idle_for(now) <= idle);
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.buckets.contains_key(client_id)
    }

    /// Spawn the idle-bucket janitor. Only the first call spawns; later calls
    /// return `false` and do nothing.
    pub fn start_janitor(self: &Arc<Self>) -> bool {
        if self
            .janitor_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // Re-arm so a later call from inside a runtime can start it.
            self.janitor_started.store(false, Ordering::Release);
            warn!("no tokio runtime, rate limiter janitor not started");
            return false;
        };
        let weak = Arc::downgrade(self);
        let token = self.shutdown.clone();
        let interval = self.cfg.janitor_interval;
        runtime.spawn(janitor_loop(weak, token, interval));
        info!(
            interval_secs = interval.as_secs_f64(),
            idle_secs = self.cfg.idle_timeout.as_secs_f64(),
            "rate limiter janitor started"
        );
        true
    }

    pub fn janitor_running(&self) -> bool {
        self.janitor_started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    /// Stop the janitor. Safe to call any number of times.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shutdown.cancel();
        }
    }
}

impl Default for ClientRateLimiter {
    fn default() -> Self {
        Self::new(ClientRateLimiterConfig::default())
    }
}

impl Drop for ClientRateLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn janitor_loop(limiter: Weak<ClientRateLimiter>, shutdown: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(limiter) = limiter.upgrade() else { break };
                let removed = limiter.evict_idle();
                if removed > 0 {
                    debug!(removed, remaining = limiter.len(), "evicted idle rate-limit buckets");
                }
            }
        }
    }
    debug!("rate limiter janitor stopped");
}
