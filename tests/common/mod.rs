//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use podcast_sync::storage::{EpisodeRepository, MemoryRepository};
use podcast_sync::sync::ReconcilePolicy;
use podcast_sync::types::{Episode, NewEpisode, PlayState, RemoteEpisode};
use podcast_sync::{Error, ErrorContext, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn remote(guid: &str, title: &str) -> RemoteEpisode {
    RemoteEpisode::new(guid, 75075)
        .with_title(title)
        .with_audio_url(format!("https://cdn.example.com/{}.mp3", guid))
}

pub fn batch(guids: &[&str]) -> Vec<RemoteEpisode> {
    guids.iter().map(|g| remote(g, &format!("title {}", g))).collect()
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Remote catalog fake serving fixed pages per feed.
#[derive(Default)]
pub struct FakeFetcher {
    pages: Mutex<HashMap<i64, Vec<RemoteEpisode>>>,
    fail_with_status: Mutex<Option<u16>>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, feed_id: i64, records: Vec<RemoteEpisode>) -> Self {
        self.pages.lock().unwrap().insert(feed_id, records);
        self
    }

    pub fn failing(self, status: u16) -> Self {
        *self.fail_with_status.lock().unwrap() = Some(status);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl podcast_sync::remote::RemoteFetcher for FakeFetcher {
    async fn fetch_page(&self, feed_id: i64, limit: usize) -> Result<Vec<RemoteEpisode>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.fail_with_status.lock().unwrap() {
            return Err(Error::remote(Some(status), "catalog unavailable", status >= 500));
        }
        let mut page = self
            .pages
            .lock()
            .unwrap()
            .get(&feed_id)
            .cloned()
            .unwrap_or_default();
        page.truncate(limit);
        Ok(page)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Repository wrapper that adds latency, counts concurrent and total calls, and
/// fails or panics on chosen guids.
pub struct InstrumentedRepo {
    pub inner: MemoryRepository,
    delay: Duration,
    fail_guids: HashSet<String>,
    panic_guids: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl InstrumentedRepo {
    pub fn new() -> Self {
        Self {
            inner: MemoryRepository::new(),
            delay: Duration::ZERO,
            fail_guids: HashSet::new(),
            panic_guids: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, guid: &str) -> Self {
        self.fail_guids.insert(guid.to_string());
        self
    }

    pub fn panicking_on(mut self, guid: &str) -> Self {
        self.panic_guids.insert(guid.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        guard
    }

    fn check_guid(&self, guid: &str) -> Result<()> {
        if self.panic_guids.contains(guid) {
            panic!("storage exploded on {}", guid);
        }
        if self.fail_guids.contains(guid) {
            return Err(Error::runtime_with_context(
                "write rejected",
                ErrorContext::new().with_details(guid.to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EpisodeRepository for InstrumentedRepo {
    async fn create(&self, episode: NewEpisode) -> Result<Episode> {
        let _g = self.enter().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_guid(&episode.guid)?;
        self.inner.create(episode).await
    }

    async fn update(&self, episode: &Episode) -> Result<Episode> {
        let _g = self.enter().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_guid(&episode.guid)?;
        self.inner.update(episode).await
    }

    async fn merge_remote(
        &self,
        record: &RemoteEpisode,
        podcast_id: i64,
        policy: &ReconcilePolicy,
    ) -> Result<(Episode, Episode)> {
        let _g = self.enter().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_guid(&record.guid)?;
        self.inner.merge_remote(record, podcast_id, policy).await
    }

    async fn set_play_state(&self, id: i64, state: PlayState) -> Result<Episode> {
        let _g = self.enter().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_play_state(id, state).await
    }

    async fn get_by_guid(&self, guid: &str) -> Result<Episode> {
        let _g = self.enter().await;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_guid(guid).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Episode> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_id(id).await
    }

    async fn list_by_podcast(
        &self,
        podcast_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Episode>, u64)> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_by_podcast(podcast_id, page, page_size).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Episode>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_recent(limit).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }
}
