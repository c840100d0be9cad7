//! 远端目录模块：从第三方播客目录拉取节目单集分页。
//!
//! # Remote Catalog Module
//!
//! [`RemoteFetcher`] is the seam between the sync engine and the third-party
//! catalog. Implementations return one page of [`RemoteEpisode`] records for a
//! remote feed, or an [`Error::Remote`](crate::Error::Remote) whose `retryable`
//! flag separates "temporarily unavailable" from "permanent / not found".
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RemoteFetcher`] | Capability trait consumed by [`SyncEngine`](crate::sync::SyncEngine) |
//! | [`HttpRemoteFetcher`] | reqwest-based client for the catalog's JSON API |
//! | [`RemoteConfig`] | Base URL, credentials, timeout and retry settings |

mod http;

pub use http::{HttpRemoteFetcher, RemoteConfig};

use crate::types::RemoteEpisode;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch at most `limit` episodes of the remote feed `feed_id`.
    async fn fetch_page(&self, feed_id: i64, limit: usize) -> Result<Vec<RemoteEpisode>>;
}
