//! Episode entity and remote record types.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A locally persisted episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    /// Local identifier, assigned by storage.
    pub id: i64,
    /// Natural key shared with the remote catalog.
    pub guid: String,
    /// Local id of the parent podcast.
    pub podcast_id: i64,
    /// Remote id of the parent feed.
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    /// Media locator (enclosure URL).
    pub audio_url: String,
    pub image_url: Option<String>,
    pub duration_secs: Option<u32>,
    pub published_at: Option<DateTime<Utc>>,
    pub played: bool,
    pub play_position_secs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    pub fn play_state(&self) -> PlayState {
        PlayState {
            played: self.played,
            position_secs: self.play_position_secs,
        }
    }
}

/// Insert payload for a new episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEpisode {
    pub guid: String,
    pub podcast_id: i64,
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    pub audio_url: String,
    pub image_url: Option<String>,
    pub duration_secs: Option<u32>,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewEpisode {
    pub fn from_remote(remote: &RemoteEpisode, podcast_id: i64) -> Self {
        Self {
            guid: remote.guid.clone(),
            podcast_id,
            feed_id: remote.feed_id,
            title: remote.title.clone(),
            description: remote.description.clone(),
            audio_url: remote.audio_url.clone(),
            image_url: remote.image_url.clone(),
            duration_secs: remote.duration_secs,
            published_at: remote.published_at,
        }
    }

    /// Materialize the row storage would write for this payload.
    pub fn into_episode(self, id: i64, now: DateTime<Utc>) -> Episode {
        Episode {
            id,
            guid: self.guid,
            podcast_id: self.podcast_id,
            feed_id: self.feed_id,
            title: self.title,
            description: self.description,
            audio_url: self.audio_url,
            image_url: self.image_url,
            duration_secs: self.duration_secs,
            published_at: self.published_at,
            played: false,
            play_position_secs: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An episode record from the remote catalog.
///
/// Field names follow the catalog's JSON (`enclosureUrl`, `feedId`, `datePublished`
/// as unix seconds). Missing optional fields default to empty values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEpisode {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "enclosureUrl", default)]
    pub audio_url: String,
    #[serde(rename = "image", default, deserialize_with = "empty_as_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub feed_id: i64,
    #[serde(rename = "duration", default)]
    pub duration_secs: Option<u32>,
    #[serde(
        rename = "datePublished",
        default,
        with = "unix_seconds"
    )]
    pub published_at: Option<DateTime<Utc>>,
}

impl RemoteEpisode {
    pub fn new(guid: impl Into<String>, feed_id: i64) -> Self {
        Self {
            guid: guid.into(),
            title: String::new(),
            description: String::new(),
            audio_url: String::new(),
            image_url: None,
            feed_id,
            duration_secs: None,
            published_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_audio_url(mut self, url: impl Into<String>) -> Self {
        self.audio_url = url.into();
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}

/// Local-only playback state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayState {
    pub played: bool,
    pub position_secs: u32,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

mod unix_seconds {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(at) => serializer.serialize_some(&at.timestamp()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<i64> = Option::deserialize(deserializer)?;
        Ok(secs
            .filter(|s| *s > 0)
            .and_then(|s| Utc.timestamp_opt(s, 0).single()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_episode_from_catalog_json() {
        let raw = serde_json::json!({
            "id": 16795090,
            "guid": "ep-guid-1",
            "title": "Episode One",
            "enclosureUrl": "https://cdn.example.com/1.mp3",
            "image": "",
            "feedId": 75075,
            "duration": 1800,
            "datePublished": 1700000000
        });
        let ep: RemoteEpisode = serde_json::from_value(raw).unwrap();
        assert_eq!(ep.guid, "ep-guid-1");
        assert_eq!(ep.audio_url, "https://cdn.example.com/1.mp3");
        assert_eq!(ep.image_url, None);
        assert_eq!(ep.feed_id, 75075);
        assert_eq!(ep.duration_secs, Some(1800));
        assert_eq!(ep.published_at.map(|d| d.timestamp()), Some(1700000000));
        assert!(ep.description.is_empty());
    }

    #[test]
    fn test_new_episode_starts_unplayed() {
        let remote = RemoteEpisode::new("g", 9).with_title("t");
        let now = Utc::now();
        let ep = NewEpisode::from_remote(&remote, 4).into_episode(12, now);
        assert_eq!(ep.id, 12);
        assert_eq!(ep.podcast_id, 4);
        assert_eq!(ep.feed_id, 9);
        assert!(!ep.played);
        assert_eq!(ep.play_position_secs, 0);
        assert_eq!(ep.created_at, now);
    }
}
