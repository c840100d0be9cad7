//! Service configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed `PODCAST_SYNC_`. The merged result is checked
//! by [`ServiceConfig::validate`] before anything is built from it.
//!
//! ```yaml
//! sync:
//!   max_concurrency: 8
//!   protected_fields: [played, play_position]
//! cache:
//!   ttl_secs: 120
//! response_cache:
//!   path_ttls:
//!     /episodes/recent: 15
//! remote:
//!   base_url: https://api.podcastindex.org/api/1.0
//! ```

use crate::cache::TtlCacheConfig;
use crate::http::{RateLimitConfig, ResponseCacheConfig};
use crate::remote::RemoteConfig;
use crate::resilience::{ClientRateLimiterConfig, RetryPolicy};
use crate::sync::{ProtectedField, ReconcilePolicy, SyncConfig};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PODCAST_SYNC_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_concurrency: usize,
    pub background_timeout_secs: u64,
    /// How long shutdown waits for background syncs before cancelling them.
    pub shutdown_grace_secs: u64,
    pub max_fetch_limit: usize,
    pub max_page_size: u32,
    pub max_recent_limit: u32,
    pub protected_fields: Vec<ProtectedField>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            background_timeout_secs: 120,
            shutdown_grace_secs: 10,
            max_fetch_limit: 1000,
            max_page_size: 100,
            max_recent_limit: 100,
            protected_fields: ProtectedField::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub rps: f64,
    pub burst: u32,
    pub trust_forwarded: bool,
    pub janitor_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rps: 10.0,
            burst: 20,
            trust_forwarded: true,
            janitor_interval_secs: 300,
            idle_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCacheSettings {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub max_entries: usize,
    /// Path or path prefix to TTL in seconds.
    pub path_ttls: BTreeMap<String, u64>,
}

impl Default for ResponseCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 60,
            max_entries: 10_000,
            path_ttls: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        let remote = RemoteConfig::default();
        let retry = RetryPolicy::default();
        Self {
            base_url: remote.base_url,
            api_key: None,
            timeout_ms: remote.timeout.as_millis() as u64,
            max_retries: retry.max_retries,
            retry_min_delay_ms: retry.min_delay.as_millis() as u64,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub sync: SyncSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub response_cache: ResponseCacheSettings,
    pub remote: RemoteSettings,
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sync: SyncSettings::default(),
            cache: CacheSettings::default(),
            rate_limit: RateLimitSettings::default(),
            response_cache: ResponseCacheSettings::default(),
            remote: RemoteSettings::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Defaults, then `path` if given, then the process environment; validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                "cannot read config file",
                ErrorContext::new()
                    .with_details(format!("{}: {}", path.display(), e))
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                "invalid config file",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config_loader"),
            )
        })
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `PODCAST_SYNC_*` overrides read through `lookup`.
    ///
    /// Unset variables leave the current value alone; unparsable ones are errors.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        set_parsed(&mut self.sync.max_concurrency, "MAX_CONCURRENCY", var("MAX_CONCURRENCY"))?;
        set_parsed(
            &mut self.sync.background_timeout_secs,
            "BACKGROUND_TIMEOUT_SECS",
            var("BACKGROUND_TIMEOUT_SECS"),
        )?;
        set_parsed(
            &mut self.sync.shutdown_grace_secs,
            "SHUTDOWN_GRACE_SECS",
            var("SHUTDOWN_GRACE_SECS"),
        )?;
        set_parsed(&mut self.cache.ttl_secs, "CACHE_TTL_SECS", var("CACHE_TTL_SECS"))?;
        set_parsed(
            &mut self.cache.sweep_interval_secs,
            "CACHE_SWEEP_SECS",
            var("CACHE_SWEEP_SECS"),
        )?;
        set_parsed(&mut self.rate_limit.rps, "RATE_LIMIT_RPS", var("RATE_LIMIT_RPS"))?;
        set_parsed(&mut self.rate_limit.burst, "RATE_LIMIT_BURST", var("RATE_LIMIT_BURST"))?;
        set_parsed(
            &mut self.response_cache.enabled,
            "RESPONSE_CACHE_ENABLED",
            var("RESPONSE_CACHE_ENABLED"),
        )?;
        set_parsed(
            &mut self.response_cache.default_ttl_secs,
            "RESPONSE_CACHE_TTL_SECS",
            var("RESPONSE_CACHE_TTL_SECS"),
        )?;
        if let Some(url) = var("REMOTE_BASE_URL") {
            self.remote.base_url = url;
        }
        if let Some(key) = var("REMOTE_API_KEY").filter(|k| !k.is_empty()) {
            self.remote.api_key = Some(key);
        }
        set_parsed(&mut self.remote.timeout_ms, "REMOTE_TIMEOUT_MS", var("REMOTE_TIMEOUT_MS"))?;
        if let Some(filter) = var("LOG") {
            self.log_filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &str, message: &str) -> Error {
            Error::configuration_with_context(
                message,
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("config_validator"),
            )
        }

        if self.sync.max_concurrency == 0 {
            return Err(invalid("sync.max_concurrency", "must be at least 1"));
        }
        if self.sync.background_timeout_secs == 0 {
            return Err(invalid("sync.background_timeout_secs", "must be at least 1"));
        }
        if self.sync.max_fetch_limit == 0 {
            return Err(invalid("sync.max_fetch_limit", "must be at least 1"));
        }
        if self.sync.max_page_size == 0 || self.sync.max_recent_limit == 0 {
            return Err(invalid("sync.max_page_size", "page limits must be at least 1"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs", "must be at least 1"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(invalid("cache.sweep_interval_secs", "must be at least 1"));
        }
        if !self.rate_limit.rps.is_finite() {
            return Err(invalid("rate_limit.rps", "must be a finite number"));
        }
        if self.rate_limit.rps > 0.0 && self.rate_limit.burst == 0 {
            return Err(invalid("rate_limit.burst", "must be at least 1 when limiting"));
        }
        if self.rate_limit.janitor_interval_secs == 0 || self.rate_limit.idle_timeout_secs == 0 {
            return Err(invalid("rate_limit.janitor_interval_secs", "janitor timings must be at least 1"));
        }
        if self.response_cache.enabled && self.response_cache.default_ttl_secs == 0 {
            return Err(invalid("response_cache.default_ttl_secs", "must be at least 1"));
        }
        if let Some((path, _)) = self.response_cache.path_ttls.iter().find(|(p, _)| !p.starts_with('/')) {
            return Err(invalid(
                &format!("response_cache.path_ttls.{}", path),
                "paths must start with '/'",
            ));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(invalid("remote.base_url", "must not be empty"));
        }
        if self.remote.timeout_ms == 0 {
            return Err(invalid("remote.timeout_ms", "must be at least 1"));
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_concurrency: self.sync.max_concurrency,
            background_timeout: Duration::from_secs(self.sync.background_timeout_secs),
            max_fetch_limit: self.sync.max_fetch_limit,
            max_page_size: self.sync.max_page_size,
            max_recent_limit: self.sync.max_recent_limit,
            policy: ReconcilePolicy::new(self.sync.protected_fields.iter().copied()),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.sync.shutdown_grace_secs)
    }

    pub fn ttl_cache_config(&self) -> TtlCacheConfig {
        TtlCacheConfig::new()
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
            .with_sweep_interval(Duration::from_secs(self.cache.sweep_interval_secs))
    }

    pub fn client_limiter_config(&self) -> ClientRateLimiterConfig {
        ClientRateLimiterConfig::new()
            .with_janitor_interval(Duration::from_secs(self.rate_limit.janitor_interval_secs))
            .with_idle_timeout(Duration::from_secs(self.rate_limit.idle_timeout_secs))
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.rate_limit.rps, self.rate_limit.burst)
            .with_trust_forwarded(self.rate_limit.trust_forwarded)
    }

    pub fn response_cache_config(&self) -> ResponseCacheConfig {
        self.response_cache.path_ttls.iter().fold(
            ResponseCacheConfig::new()
                .with_enabled(self.response_cache.enabled)
                .with_default_ttl(Duration::from_secs(self.response_cache.default_ttl_secs)),
            |cfg, (path, secs)| cfg.with_path_ttl(path.clone(), Duration::from_secs(*secs)),
        )
    }

    pub fn remote_config(&self) -> RemoteConfig {
        let retry = RetryPolicy::new()
            .with_max_retries(self.remote.max_retries)
            .with_delays(
                Duration::from_millis(self.remote.retry_min_delay_ms),
                Duration::from_millis(self.remote.retry_max_delay_ms),
            );
        let mut cfg = RemoteConfig::new(self.remote.base_url.clone())
            .with_timeout(Duration::from_millis(self.remote.timeout_ms))
            .with_retry(retry);
        if let Some(key) = &self.remote.api_key {
            cfg = cfg.with_api_key(key.clone());
        }
        cfg
    }
}

fn set_parsed<T>(slot: &mut T, suffix: &str, raw: Option<String>) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return Ok(());
    };
    *slot = raw.trim().parse().map_err(|e: T::Err| {
        Error::configuration_with_context(
            "invalid environment override",
            ErrorContext::new()
                .with_field_path(format!("{}{}", ENV_PREFIX, suffix))
                .with_details(format!("{:?}: {}", raw, e))
                .with_source("config_loader"),
        )
    })?;
    Ok(())
}
