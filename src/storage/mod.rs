//! 存储模块：本地节目单集仓库接口及其内存实现。
//!
//! # Storage Module
//!
//! [`EpisodeRepository`] is the durable-storage seam consumed by the sync engine.
//! Any backend works as long as it honors the contract below; [`MemoryRepository`]
//! is the reference implementation used by tests and single-process deployments.
//!
//! ## Contract
//!
//! - `id` is assigned by the repository on `create` and never changes.
//! - `guid` is unique across all episodes; creating a duplicate fails with
//!   [`Error::Conflict`](crate::Error::Conflict).
//! - `get_by_*`, `update` and `delete` fail with
//!   [`Error::NotFound`](crate::Error::NotFound) when the row is absent, so callers
//!   can tell "absent" apart from other failures.
//! - Listings are ordered newest first (`published_at` desc, then `id` desc) and
//!   pages are 1-based.
//! - `merge_remote` and `set_play_state` read and write the row in one step, so
//!   a sync and a play-state write racing on the same episode never lose each
//!   other's fields.

mod memory;

pub use memory::MemoryRepository;

use crate::sync::ReconcilePolicy;
use crate::types::{Episode, NewEpisode, PlayState, RemoteEpisode};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EpisodeRepository: Send + Sync {
    async fn create(&self, episode: NewEpisode) -> Result<Episode>;

    /// Persist `episode` over the row with the same `id`. Returns the stored row.
    async fn update(&self, episode: &Episode) -> Result<Episode>;

    /// Merge `record` into the row with the same guid using `policy`, atomically.
    ///
    /// Returns the row as it was before the merge and the stored result. Fails
    /// with [`Error::NotFound`](crate::Error::NotFound) when no row has the guid.
    async fn merge_remote(
        &self,
        record: &RemoteEpisode,
        podcast_id: i64,
        policy: &ReconcilePolicy,
    ) -> Result<(Episode, Episode)>;

    /// Overwrite only the local play-state fields of one row, atomically.
    async fn set_play_state(&self, id: i64, state: PlayState) -> Result<Episode>;

    async fn get_by_guid(&self, guid: &str) -> Result<Episode>;

    async fn get_by_id(&self, id: i64) -> Result<Episode>;

    /// One page of a podcast's episodes plus the podcast's total episode count.
    async fn list_by_podcast(
        &self,
        podcast_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Episode>, u64)>;

    async fn list_recent(&self, limit: u32) -> Result<Vec<Episode>>;

    async fn delete(&self, id: i64) -> Result<()>;
}
