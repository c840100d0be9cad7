//! 类型系统模块：定义节目单集（episode）的本地实体与远端记录类型。
//!
//! # Types Module
//!
//! Core data types shared by the cache, storage, and sync layers.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Episode`] | Locally persisted episode with local-only play state |
//! | [`NewEpisode`] | Insert payload; storage assigns id and timestamps |
//! | [`RemoteEpisode`] | Episode record as delivered by the remote catalog |
//! | [`PlayState`] | Local-only playback fields written by direct endpoints |
//!
//! ## Identity
//!
//! An episode has two identities: the numeric local `id` assigned by storage, and
//! the `guid` natural key shared with the remote catalog. Reconciliation matches
//! on `guid`; the local `id` never changes once assigned.

pub mod episode;

pub use episode::{Episode, NewEpisode, PlayState, RemoteEpisode};
