use super::EpisodeRepository;
use crate::sync::ReconcilePolicy;
use crate::types::{Episode, NewEpisode, PlayState, RemoteEpisode};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    next_id: i64,
    rows: HashMap<i64, Episode>,
    /// Unique index on guid.
    by_guid: HashMap<String, i64>,
    /// Non-unique index on podcast id.
    by_podcast: HashMap<i64, BTreeSet<i64>>,
}

/// In-memory episode table with a unique guid index and a podcast index.
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_id: 1,
                ..Tables::default()
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored row, ordered by id.
    pub fn snapshot(&self) -> Vec<Episode> {
        let mut rows: Vec<Episode> = self.read().rows.values().cloned().collect();
        rows.sort_by_key(|e| e.id);
        rows
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    /// Store `row` over its id, moving it between podcast indexes if needed.
    fn replace(&mut self, old_podcast: i64, row: Episode) {
        if old_podcast != row.podcast_id {
            if let Some(ids) = self.by_podcast.get_mut(&old_podcast) {
                ids.remove(&row.id);
            }
            self.by_podcast.entry(row.podcast_id).or_default().insert(row.id);
        }
        self.rows.insert(row.id, row);
    }
}

fn newest_first(rows: &mut [Episode]) {
    rows.sort_by_key(|e| (Reverse(e.published_at), Reverse(e.id)));
}

#[async_trait]
impl EpisodeRepository for MemoryRepository {
    async fn create(&self, episode: NewEpisode) -> Result<Episode> {
        let mut t = self.write();
        if t.by_guid.contains_key(&episode.guid) {
            return Err(Error::conflict(format!(
                "episode guid already exists: {}",
                episode.guid
            )));
        }
        let id = t.next_id;
        t.next_id += 1;
        let row = episode.into_episode(id, Utc::now());
        t.by_guid.insert(row.guid.clone(), id);
        t.by_podcast.entry(row.podcast_id).or_default().insert(id);
        t.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn update(&self, episode: &Episode) -> Result<Episode> {
        let mut t = self.write();
        let Some(current) = t.rows.get(&episode.id) else {
            return Err(Error::not_found("episode", episode.id));
        };
        if current.guid != episode.guid {
            return Err(Error::validation(format!(
                "guid of episode {} is immutable",
                episode.id
            )));
        }
        let old_podcast = current.podcast_id;
        t.replace(old_podcast, episode.clone());
        Ok(episode.clone())
    }

    async fn merge_remote(
        &self,
        record: &RemoteEpisode,
        podcast_id: i64,
        policy: &ReconcilePolicy,
    ) -> Result<(Episode, Episode)> {
        let mut t = self.write();
        let Some(current) = t.by_guid.get(&record.guid).and_then(|id| t.rows.get(id)) else {
            return Err(Error::not_found("episode", &record.guid));
        };
        let previous = current.clone();
        let merged = policy.apply(&previous, record, podcast_id);
        t.replace(previous.podcast_id, merged.clone());
        Ok((previous, merged))
    }

    async fn set_play_state(&self, id: i64, state: PlayState) -> Result<Episode> {
        let mut t = self.write();
        let Some(row) = t.rows.get_mut(&id) else {
            return Err(Error::not_found("episode", id));
        };
        row.played = state.played;
        row.play_position_secs = state.position_secs;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn get_by_guid(&self, guid: &str) -> Result<Episode> {
        let t = self.read();
        t.by_guid
            .get(guid)
            .and_then(|id| t.rows.get(id))
            .cloned()
            .ok_or_else(|| Error::not_found("episode", guid))
    }

    async fn get_by_id(&self, id: i64) -> Result<Episode> {
        self.read()
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("episode", id))
    }

    async fn list_by_podcast(
        &self,
        podcast_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Episode>, u64)> {
        let t = self.read();
        let mut rows: Vec<Episode> = t
            .by_podcast
            .get(&podcast_id)
            .map(|ids| ids.iter().filter_map(|id| t.rows.get(id)).cloned().collect())
            .unwrap_or_default();
        drop(t);
        let total = rows.len() as u64;
        newest_first(&mut rows);
        let skip = (page.max(1) as usize - 1).saturating_mul(page_size as usize);
        let items = rows.into_iter().skip(skip).take(page_size as usize).collect();
        Ok((items, total))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Episode>> {
        let mut rows: Vec<Episode> = self.read().rows.values().cloned().collect();
        newest_first(&mut rows);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut t = self.write();
        let Some(row) = t.rows.remove(&id) else {
            return Err(Error::not_found("episode", id));
        };
        t.by_guid.remove(&row.guid);
        if let Some(ids) = t.by_podcast.get_mut(&row.podcast_id) {
            ids.remove(&id);
        }
        Ok(())
    }
}
