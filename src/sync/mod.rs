//! 同步模块：拉取远端节目单集、按 guid 协调到本地存储，并提供读穿缓存的查询。
//!
//! # Sync Module
//!
//! The [`SyncEngine`] is the owner of every write that reaches storage and of every
//! invalidation that follows it.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`SyncEngine`] | Fetch, background reconciliation, read-through reads, direct writes |
//! | [`SyncConfig`] | Concurrency bound, background timeout and input limits |
//! | [`ReconcilePolicy`] | Which local-only fields survive a sync |
//! | [`EpisodePage`] | One page of a podcast listing with its total count |
//!
//! ## Consistency
//!
//! Reads are served from the cache until its TTL expires or a write invalidates
//! the key. After a batch completes, the entity keys of every written episode
//! and the list patterns of the affected podcast and the recent feed are dropped.
//! Not-found results are never cached.
//!
//! ## Background work
//!
//! [`SyncEngine::fetch_and_sync`] returns the fetched records right away and
//! reconciles them on a detached task. That task is not tied to the caller; it
//! ends when the batch finishes, when `background_timeout` elapses, or when
//! [`SyncEngine::shutdown`] runs out of grace.

mod engine;
mod reconcile;

pub use engine::{EpisodePage, SyncConfig, SyncEngine};
pub use reconcile::{ProtectedField, ReconcilePolicy};
