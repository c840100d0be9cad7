//! # podcast-sync
//!
//! 播客节目单集同步与缓存核心：远端拉取、按 guid 协调、读穿缓存与按客户端限流。
//!
//! Sync-and-caching core for a podcast catalog mirror. It keeps a local episode
//! store consistent with a third-party catalog while shielding both sides from
//! load.
//!
//! ## Overview
//!
//! - **Sync**: fetch a page of remote episodes, return it immediately, reconcile
//!   it into local storage on a detached task with bounded concurrency
//! - **Entity cache**: TTL read-through cache with pattern invalidation after writes
//! - **Response cache**: whole-response cache for `GET` with client bypass
//! - **Rate limiting**: per-client token buckets with a single idle-eviction janitor
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use podcast_sync::{ServiceConfig, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> podcast_sync::Result<()> {
//!     let config = ServiceConfig::load(None)?;
//!     podcast_sync::logging::init(&config.log_filter);
//!     let service = SyncService::from_config(config)?;
//!
//!     let fetched = service.engine().fetch_and_sync(920666, 1, 50).await?;
//!     println!("fetched {} episodes", fetched.len());
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Episode, remote record and play-state types |
//! | [`cache`] | Key generation, TTL entity cache, byte cache backends |
//! | [`remote`] | Remote catalog fetcher trait and HTTP client |
//! | [`storage`] | Episode repository trait and in-memory implementation |
//! | [`sync`] | Sync engine and reconciliation policy |
//! | [`resilience`] | Token buckets, per-client limiter, retry policy |
//! | [`http`] | Request/response types, response cache and rate-limit middleware |
//! | [`config`] | Layered service configuration |
//! | [`service`] | Assembly of the long-lived components |

pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod remote;
pub mod resilience;
pub mod service;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::ServiceConfig;
pub use service::SyncService;
pub use sync::{SyncConfig, SyncEngine};
pub use types::{Episode, NewEpisode, PlayState, RemoteEpisode};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, PartialSyncError};
