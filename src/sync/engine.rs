use super::reconcile::ReconcilePolicy;
use crate::cache::{key, TtlCache};
use crate::error::PartialSyncError;
use crate::remote::RemoteFetcher;
use crate::storage::EpisodeRepository;
use crate::types::{Episode, NewEpisode, PlayState, RemoteEpisode};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of records reconciled at the same time.
    pub max_concurrency: usize,
    /// Hard limit for one background reconciliation.
    pub background_timeout: Duration,
    /// Upper bound for the `limit` argument of a remote fetch.
    pub max_fetch_limit: usize,
    pub max_page_size: u32,
    pub max_recent_limit: u32,
    pub policy: ReconcilePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            background_timeout: Duration::from_secs(120),
            max_fetch_limit: 1000,
            max_page_size: 100,
            max_recent_limit: 100,
            policy: ReconcilePolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }
    pub fn with_background_timeout(mut self, timeout: Duration) -> Self {
        self.background_timeout = timeout;
        self
    }
    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// One page of a podcast's episodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodePage {
    pub items: Vec<Episode>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

struct Outcome {
    episode: Episode,
    created: bool,
    previous_podcast: Option<i64>,
}

struct Inner {
    fetcher: Arc<dyn RemoteFetcher>,
    repo: Arc<dyn EpisodeRepository>,
    cache: Arc<TtlCache<Episode>>,
    config: SyncConfig,
    permits: Arc<Semaphore>,
    background: TaskTracker,
    closing: AtomicBool,
    shutdown: CancellationToken,
}

/// Keeps local episodes in step with the remote catalog and serves cached reads.
///
/// Cloning is cheap; clones share the same cache, permits and background tasks.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        fetcher: Arc<dyn RemoteFetcher>,
        repo: Arc<dyn EpisodeRepository>,
        cache: Arc<TtlCache<Episode>>,
        config: SyncConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                fetcher,
                repo,
                cache,
                config,
                permits,
                background: TaskTracker::new(),
                closing: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<TtlCache<Episode>> {
        &self.inner.cache
    }

    pub fn repository(&self) -> &Arc<dyn EpisodeRepository> {
        &self.inner.repo
    }

    /// Number of background reconciliations still running.
    pub fn background_in_flight(&self) -> usize {
        self.inner.background.len()
    }

    /// Fetch one page from the remote catalog and reconcile it in the background.
    ///
    /// The fetch runs on the caller's task, so dropping the returned future aborts
    /// it. Reconciliation is detached from the caller and bounded only by
    /// `background_timeout`; its failures are logged, never returned here.
    pub async fn fetch_and_sync(
        &self,
        feed_id: i64,
        podcast_id: i64,
        limit: usize,
    ) -> Result<Vec<RemoteEpisode>> {
        self.validate_fetch_limit(limit)?;
        let records = self.inner.fetcher.fetch_page(feed_id, limit).await?;
        debug!(feed_id, podcast_id, fetched = records.len(), "remote page fetched");

        if records.is_empty() {
            return Ok(records);
        }
        if self.inner.closing.load(Ordering::Acquire) {
            warn!(feed_id, podcast_id, "engine shutting down, background sync skipped");
            return Ok(records);
        }

        let engine = self.clone();
        let batch = records.clone();
        let timeout = self.inner.config.background_timeout;
        let shutdown = self.inner.shutdown.clone();
        let span = info_span!("background_sync", feed_id, podcast_id);
        self.inner.background.spawn(
            async move {
                let started = Instant::now();
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        warn!("background sync cancelled by shutdown");
                    }
                    res = tokio::time::timeout(timeout, engine.reconcile_batch(batch, podcast_id)) => match res {
                        Ok(Ok(n)) => info!(succeeded = n, elapsed_ms = started.elapsed().as_millis() as u64, "background sync finished"),
                        Ok(Err(e)) => warn!(error = %e, "background sync finished with errors"),
                        Err(_) => error!(timeout_secs = timeout.as_secs_f64(), "background sync timed out"),
                    },
                }
            }
            .instrument(span),
        );
        Ok(records)
    }

    /// Fetch one page and reconcile it before returning.
    ///
    /// Unlike [`fetch_and_sync`](Self::fetch_and_sync), partial failures are
    /// returned to the caller as [`Error::PartialSync`].
    pub async fn fetch_and_reconcile(
        &self,
        feed_id: i64,
        podcast_id: i64,
        limit: usize,
    ) -> Result<usize> {
        self.validate_fetch_limit(limit)?;
        let records = self.inner.fetcher.fetch_page(feed_id, limit).await?;
        self.reconcile_batch(records, podcast_id).await
    }

    /// Create or update one local episode per remote record.
    ///
    /// Records are matched by guid (the last duplicate in the batch wins). At most
    /// `max_concurrency` records are in flight at once. Returns the number of
    /// records persisted; if any record failed the result is
    /// [`Error::PartialSync`] and the successful writes stay in place.
    pub async fn reconcile_batch(
        &self,
        records: Vec<RemoteEpisode>,
        podcast_id: i64,
    ) -> Result<usize> {
        let records = dedupe_by_guid(records);
        let total = records.len();
        let mut failures: Vec<Error> = Vec::new();
        let mut units: JoinSet<Result<Outcome>> = JoinSet::new();

        for record in records {
            if record.guid.trim().is_empty() {
                failures.push(Error::validation_with_context(
                    "remote record has no guid",
                    ErrorContext::new()
                        .with_field_path("guid")
                        .with_details(format!("title: {}", record.title))
                        .with_source("sync_engine"),
                ));
                continue;
            }

            // Permit is taken before spawning and moved into the unit, so it is
            // released on completion, error or panic alike.
            let permit = match Arc::clone(&self.inner.permits).acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    failures.push(Error::runtime_with_context(
                        "reconcile permits closed",
                        ErrorContext::new().with_source("sync_engine"),
                    ));
                    continue;
                }
            };
            let inner = Arc::clone(&self.inner);
            units.spawn(async move {
                let _permit = permit;
                inner.reconcile_one(record, podcast_id).await
            });
        }

        let mut succeeded: Vec<Outcome> = Vec::with_capacity(total);
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(outcome)) => succeeded.push(outcome),
                Ok(Err(e)) => failures.push(e),
                Err(join_err) => {
                    let details = if join_err.is_panic() {
                        panic_message(join_err.into_panic())
                    } else {
                        "cancelled".to_string()
                    };
                    failures.push(Error::runtime_with_context(
                        "reconcile unit panicked",
                        ErrorContext::new()
                            .with_details(details)
                            .with_source("sync_engine"),
                    ));
                }
            }
        }

        if !succeeded.is_empty() {
            self.inner.invalidate_after_batch(&succeeded, podcast_id);
        }

        let created = succeeded.iter().filter(|o| o.created).count();
        let count = succeeded.len();
        if failures.is_empty() {
            info!(
                podcast_id,
                total,
                created,
                updated = count - created,
                "batch reconciled"
            );
            Ok(count)
        } else {
            warn!(
                podcast_id,
                total,
                succeeded = count,
                failed = failures.len(),
                first_error = %failures[0],
                "batch reconciled with failures"
            );
            Err(PartialSyncError::new(count, failures).into())
        }
    }

    pub async fn get_by_guid(&self, guid: &str) -> Result<Episode> {
        if guid.trim().is_empty() {
            return Err(Error::validation_with_context(
                "guid must not be empty",
                ErrorContext::new().with_field_path("guid"),
            ));
        }
        let cache_key = key::episode_by_guid(guid);
        if let Some(ep) = self.inner.cache.get_entity(&cache_key) {
            debug!(%cache_key, "cache hit");
            return Ok(ep);
        }
        let ep = self.inner.repo.get_by_guid(guid).await?;
        self.inner.cache.set_entity(cache_key, ep.clone());
        Ok(ep)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Episode> {
        if id <= 0 {
            return Err(Error::validation_with_context(
                "episode id must be positive",
                ErrorContext::new()
                    .with_field_path("id")
                    .with_details(id.to_string()),
            ));
        }
        let cache_key = key::episode_by_id(id);
        if let Some(ep) = self.inner.cache.get_entity(&cache_key) {
            debug!(%cache_key, "cache hit");
            return Ok(ep);
        }
        let ep = self.inner.repo.get_by_id(id).await?;
        self.inner.cache.set_entity(cache_key, ep.clone());
        Ok(ep)
    }

    pub async fn list_by_podcast(
        &self,
        podcast_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<EpisodePage> {
        if page == 0 {
            return Err(Error::validation_with_context(
                "page starts at 1",
                ErrorContext::new().with_field_path("page"),
            ));
        }
        let max = self.inner.config.max_page_size;
        if page_size == 0 || page_size > max {
            return Err(Error::validation_with_context(
                format!("page_size must be between 1 and {}", max),
                ErrorContext::new()
                    .with_field_path("page_size")
                    .with_details(page_size.to_string()),
            ));
        }

        let cache_key = key::podcast_episodes(podcast_id, page, page_size);
        let (items, total) = match self.inner.cache.get_list(&cache_key) {
            Some(hit) => {
                debug!(%cache_key, "cache hit");
                hit
            }
            None => {
                let (items, total) = self
                    .inner
                    .repo
                    .list_by_podcast(podcast_id, page, page_size)
                    .await?;
                self.inner.cache.set_list(cache_key, items.clone(), total);
                (items, total)
            }
        };
        Ok(EpisodePage {
            items,
            total,
            page,
            page_size,
        })
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<Episode>> {
        let max = self.inner.config.max_recent_limit;
        if limit == 0 || limit > max {
            return Err(Error::validation_with_context(
                format!("limit must be between 1 and {}", max),
                ErrorContext::new()
                    .with_field_path("limit")
                    .with_details(limit.to_string()),
            ));
        }
        let cache_key = key::recent_episodes(limit);
        if let Some((items, _)) = self.inner.cache.get_list(&cache_key) {
            debug!(%cache_key, "cache hit");
            return Ok(items);
        }
        let items = self.inner.repo.list_recent(limit).await?;
        let total = items.len() as u64;
        self.inner.cache.set_list(cache_key, items.clone(), total);
        Ok(items)
    }

    /// Write local-only playback state for one episode.
    pub async fn update_play_state(&self, id: i64, state: PlayState) -> Result<Episode> {
        let stored = self.inner.repo.set_play_state(id, state).await?;
        self.inner.invalidate_episode(&stored);
        self.inner
            .cache
            .invalidate_pattern(&key::podcast_pattern(stored.podcast_id));
        self.inner.cache.invalidate_pattern(&key::recent_pattern());
        Ok(stored)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let ep = self.inner.repo.get_by_id(id).await?;
        self.inner.repo.delete(id).await?;
        self.inner.invalidate_episode(&ep);
        self.inner
            .cache
            .invalidate_pattern(&key::podcast_pattern(ep.podcast_id));
        self.inner.cache.invalidate_pattern(&key::recent_pattern());
        info!(id, guid = %ep.guid, "episode deleted");
        Ok(())
    }

    /// Stop launching background syncs and wait up to `grace` for running ones.
    ///
    /// Syncs still running after `grace` are cancelled. Returns `true` when every
    /// background sync finished on its own.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.closing.store(true, Ordering::Release);
        self.inner.background.close();
        let in_flight = self.inner.background.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for background syncs");
        }
        match tokio::time::timeout(grace, self.inner.background.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.inner.background.len(),
                    "background syncs still running after grace period, cancelling"
                );
                self.inner.shutdown.cancel();
                self.inner.background.wait().await;
                false
            }
        }
    }

    fn validate_fetch_limit(&self, limit: usize) -> Result<()> {
        let max = self.inner.config.max_fetch_limit;
        if limit == 0 || limit > max {
            return Err(Error::validation_with_context(
                format!("limit must be between 1 and {}", max),
                ErrorContext::new()
                    .with_field_path("limit")
                    .with_details(limit.to_string())
                    .with_source("sync_engine"),
            ));
        }
        Ok(())
    }
}

impl Inner {
    async fn reconcile_one(&self, record: RemoteEpisode, podcast_id: i64) -> Result<Outcome> {
        match self.merge_existing(&record, podcast_id).await {
            Err(e) if e.is_not_found() => {
                match self
                    .repo
                    .create(NewEpisode::from_remote(&record, podcast_id))
                    .await
                {
                    Ok(episode) => Ok(Outcome {
                        episode,
                        created: true,
                        previous_podcast: None,
                    }),
                    // Lost a creation race with another sync of the same guid.
                    Err(Error::Conflict { .. }) => self.merge_existing(&record, podcast_id).await,
                    Err(e) => Err(e),
                }
            }
            merged => merged,
        }
    }

    /// The repository merges atomically; a concurrent play-state write lands
    /// wholly before or after it.
    async fn merge_existing(&self, record: &RemoteEpisode, podcast_id: i64) -> Result<Outcome> {
        let (before, episode) = self
            .repo
            .merge_remote(record, podcast_id, &self.config.policy)
            .await?;
        Ok(Outcome {
            episode,
            created: false,
            previous_podcast: (before.podcast_id != podcast_id).then_some(before.podcast_id),
        })
    }

    fn invalidate_episode(&self, ep: &Episode) {
        self.cache.invalidate(&key::episode_by_guid(&ep.guid));
        self.cache.invalidate(&key::episode_by_id(ep.id));
    }

    fn invalidate_after_batch(&self, succeeded: &[Outcome], podcast_id: i64) {
        for outcome in succeeded {
            self.invalidate_episode(&outcome.episode);
            if let Some(previous) = outcome.previous_podcast {
                self.cache.invalidate_pattern(&key::podcast_pattern(previous));
            }
        }
        self.cache.invalidate_pattern(&key::podcast_pattern(podcast_id));
        self.cache.invalidate_pattern(&key::recent_pattern());
    }
}

/// Keep the last record for each guid, preserving first-seen order.
fn dedupe_by_guid(records: Vec<RemoteEpisode>) -> Vec<RemoteEpisode> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<RemoteEpisode> = Vec::with_capacity(records.len());
    for record in records {
        if record.guid.trim().is_empty() {
            out.push(record);
            continue;
        }
        match slots.get(&record.guid) {
            Some(&i) => out[i] = record,
            None => {
                slots.insert(record.guid.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_last_duplicate_in_first_position() {
        let records = vec![
            RemoteEpisode::new("a", 1).with_title("first"),
            RemoteEpisode::new("b", 1),
            RemoteEpisode::new("a", 1).with_title("second"),
            RemoteEpisode::new("", 1),
        ];
        let out = dedupe_by_guid(records);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].guid, "a");
        assert_eq!(out[0].title, "second");
        assert_eq!(out[1].guid, "b");
        assert_eq!(out[2].guid, "");
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
