//! Field-level merge of a remote record into an existing local episode.

use crate::types::{Episode, RemoteEpisode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Local-only fields a sync may be told to leave alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedField {
    Played,
    PlayPosition,
    CreatedAt,
}

impl ProtectedField {
    pub const ALL: [ProtectedField; 3] = [
        ProtectedField::Played,
        ProtectedField::PlayPosition,
        ProtectedField::CreatedAt,
    ];
}

/// Which local fields survive reconciliation.
///
/// Remote data wins for every content field. `id` and `guid` are never
/// overwritten regardless of this policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    pub protected: BTreeSet<ProtectedField>,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            protected: ProtectedField::ALL.into_iter().collect(),
        }
    }
}

impl ReconcilePolicy {
    pub fn new(protected: impl IntoIterator<Item = ProtectedField>) -> Self {
        Self {
            protected: protected.into_iter().collect(),
        }
    }

    /// Nothing is protected; a sync resets play state.
    pub fn remote_wins() -> Self {
        Self {
            protected: BTreeSet::new(),
        }
    }

    pub fn protects(&self, field: ProtectedField) -> bool {
        self.protected.contains(&field)
    }

    /// Merge `remote` into `existing` and return the row to persist.
    pub fn apply(&self, existing: &Episode, remote: &RemoteEpisode, podcast_id: i64) -> Episode {
        let now = Utc::now();
        Episode {
            id: existing.id,
            guid: existing.guid.clone(),
            podcast_id,
            feed_id: remote.feed_id,
            title: remote.title.clone(),
            description: remote.description.clone(),
            audio_url: remote.audio_url.clone(),
            image_url: remote.image_url.clone(),
            duration_secs: remote.duration_secs,
            published_at: remote.published_at,
            played: if self.protects(ProtectedField::Played) {
                existing.played
            } else {
                false
            },
            play_position_secs: if self.protects(ProtectedField::PlayPosition) {
                existing.play_position_secs
            } else {
                0
            },
            created_at: if self.protects(ProtectedField::CreatedAt) {
                existing.created_at
            } else {
                now
            },
            updated_at: now,
        }
    }
}
