use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TokenBucketSnapshot {
    pub rps: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Tokens per second.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
}

impl TokenBucketConfig {
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: rps.max(1.0), // default burst: 1 second worth, at least 1
        })
    }

    /// Create a new config with default values
    pub fn new() -> Self {
        Self {
            rps: 10.0,
            burst: 10.0,
        }
    }

    /// Set the maximum tokens (burst size)
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.burst = tokens as f64;
        self
    }

    /// Set the refill rate (tokens per second)
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rps = rate;
        self
    }
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Non-blocking token bucket.
///
/// - Starts full (`burst` tokens)
/// - `rps <= 0` disables limiting
pub struct TokenBucket {
    cfg: TokenBucketConfig,
    state: Mutex<State>,
}

impl TokenBucket {
    pub fn new(cfg: TokenBucketConfig) -> Self {
        let burst = cfg.burst;
        Self {
            cfg,
            state: Mutex::new(State {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.cfg
    }

    fn refill_locked(cfg: &TokenBucketConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst);
            st.last = now;
        }
    }

    /// Try to take one token without waiting, returns true if successful
    pub fn try_acquire(&self) -> bool {
        let cfg = &self.cfg;
        if cfg.rps <= 0.0 {
            return true;
        }

        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::refill_locked(cfg, &mut st);

        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token is available; zero when one is ready now.
    pub fn wait_time(&self) -> Duration {
        self.snapshot()
            .estimated_wait_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> TokenBucketSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut wait_ms = None;
        if cfg.rps > 0.0 {
            Self::refill_locked(cfg, &mut st);
            if st.tokens < 1.0 {
                let missing = 1.0 - st.tokens;
                wait_ms = Some((missing / cfg.rps * 1000.0).ceil() as u64);
            }
        }

        TokenBucketSnapshot {
            rps: cfg.rps,
            burst: cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms: wait_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_config_from_rps() {
        let config = TokenBucketConfig::from_rps(10.0).unwrap();
        assert_eq!(config.rps, 10.0);
        assert_eq!(config.burst, 10.0);
    }

    #[test]
    fn test_token_bucket_config_from_rps_low() {
        let config = TokenBucketConfig::from_rps(0.5).unwrap();
        assert_eq!(config.rps, 0.5);
        // burst should be at least 1.0
        assert_eq!(config.burst, 1.0);
    }

    #[test]
    fn test_token_bucket_config_from_rps_invalid() {
        assert!(TokenBucketConfig::from_rps(-1.0).is_none());
        assert!(TokenBucketConfig::from_rps(f64::NAN).is_none());
        assert!(TokenBucketConfig::from_rps(f64::INFINITY).is_none());
    }

    #[test]
    fn test_token_bucket_burst_then_deny() {
        let limiter = TokenBucket::new(
            TokenBucketConfig::new()
                .with_max_tokens(3)
                .with_refill_rate(1.0),
        );

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        // Fourth should fail (no tokens left)
        assert!(!limiter.try_acquire());
        assert!(limiter.wait_time() > Duration::ZERO);
    }

    #[test]
    fn test_token_bucket_zero_rps_is_unlimited() {
        let limiter = TokenBucket::new(TokenBucketConfig::from_rps(0.0).unwrap());
        for _ in 0..100 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn test_token_bucket_refill() {
        let limiter = TokenBucket::new(
            TokenBucketConfig::new()
                .with_max_tokens(5)
                .with_refill_rate(100.0), // 100 tokens/sec = 1 token/10ms
        );

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(20));

        // Should have at least 1 token now
        assert!(limiter.try_acquire());
    }
}
