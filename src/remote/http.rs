use super::RemoteFetcher;
use crate::resilience::RetryPolicy;
use crate::types::RemoteEpisode;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.podcastindex.org/api/1.0".to_string(),
            api_key: None,
            user_agent: format!("podcast-sync/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Deserialize)]
struct EpisodePage {
    #[serde(default)]
    items: Vec<RemoteEpisode>,
    #[serde(default)]
    description: Option<String>,
}

/// Remote catalog client over HTTP.
///
/// Issues `GET {base_url}/episodes/byfeedid?id={feed_id}&max={limit}` and retries
/// transient failures (transport errors, 429, 5xx) according to the configured
/// [`RetryPolicy`].
pub struct HttpRemoteFetcher {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpRemoteFetcher {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        let endpoint = Url::parse(&format!("{}/episodes/byfeedid", base)).map_err(|e| {
            Error::configuration_with_context(
                "invalid remote base URL",
                ErrorContext::new()
                    .with_field_path("remote.base_url")
                    .with_details(e.to_string())
                    .with_source("remote_fetcher"),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            retry: config.retry,
        })
    }

    async fn fetch_once(&self, feed_id: i64, limit: usize) -> Result<Vec<RemoteEpisode>> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .query(&[("id", feed_id.to_string()), ("max", limit.to_string())])
            .header("accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::remote(None, e.to_string(), true))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(Error::remote(
                Some(status.as_u16()),
                truncate(&body, 200),
                retryable,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::remote(Some(status.as_u16()), e.to_string(), true))?;
        let page: EpisodePage = serde_json::from_slice(&bytes).map_err(|e| {
            Error::remote(
                Some(status.as_u16()),
                format!("malformed episode page: {}", e),
                false,
            )
        })?;
        if let Some(desc) = &page.description {
            debug!(feed_id, description = %desc, "remote page received");
        }

        let total = page.items.len();
        let mut items: Vec<RemoteEpisode> = page
            .items
            .into_iter()
            .filter(|ep| !ep.guid.trim().is_empty())
            .collect();
        if items.len() < total {
            warn!(
                feed_id,
                dropped = total - items.len(),
                "remote records without guid dropped"
            );
        }
        items.truncate(limit);
        Ok(items)
    }
}

#[async_trait]
impl RemoteFetcher for HttpRemoteFetcher {
    async fn fetch_page(&self, feed_id: i64, limit: usize) -> Result<Vec<RemoteEpisode>> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(feed_id, limit).await {
                Ok(items) => return Ok(items),
                Err(e) => match self.retry.should_retry(attempt, &e) {
                    Some(delay) => {
                        warn!(feed_id, attempt, error = %e, ?delay, "remote fetch failed, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_base_url_is_configuration_error() {
        let err = HttpRemoteFetcher::new(RemoteConfig::new("not a url")).err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é...");
    }
}
