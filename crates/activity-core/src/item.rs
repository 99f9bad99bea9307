use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::MediaIdentity;
use crate::metadata::{VideoMetadata, VideoMetadataResponse, VideoType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Movie,
    Episode,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Episode => write!(f, "episode"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnrichError {
    #[error("Unable to find episode {season}x{episode} in show {show_id}")]
    EpisodeNotFound { show_id: u64, season: u32, episode: u32 },
    #[error("Metadata describes a {found:?} video, item is a {expected}")]
    KindMismatch { expected: ItemKind, found: VideoType },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemKeys {
    /// External video id taken from the watch path.
    pub source_id: u64,
    /// Id of the item itself in the metadata API (episode id for episodes).
    pub metadata_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowItem {
    pub id: Option<u64>,
    pub title: String,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonItem {
    pub id: Option<u64>,
    pub number: u32,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub show: ShowItem,
}

/// The watched item as published downstream: local identity plus whatever
/// the metadata API added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub kind: ItemKind,
    pub keys: ItemKeys,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub number: Option<u32>,
    pub duration_ms: Option<u64>,
    pub season: Option<SeasonItem>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub identity: MediaIdentity,
}

impl Item {
    /// Only movie and episode identities describe something playable.
    pub fn from_identity(source_id: u64, identity: MediaIdentity) -> Option<Self> {
        let keys = ItemKeys {
            source_id,
            metadata_id: None,
        };
        let item = match &identity {
            MediaIdentity::Movie(movie) => Self {
                kind: ItemKind::Movie,
                keys,
                title: Some(movie.title.clone()),
                year: None,
                number: None,
                duration_ms: None,
                season: None,
                fetched_at: None,
                identity,
            },
            MediaIdentity::Episode(episode) => Self {
                kind: ItemKind::Episode,
                keys,
                title: None,
                year: None,
                number: Some(episode.number),
                duration_ms: None,
                season: Some(SeasonItem {
                    id: None,
                    number: episode.season.number,
                    title: None,
                    year: None,
                    show: ShowItem {
                        id: None,
                        title: episode.season.show.title.clone(),
                        year: None,
                    },
                }),
                fetched_at: None,
                identity,
            },
            MediaIdentity::Season(_) | MediaIdentity::Show(_) => return None,
        };
        Some(item)
    }

    pub fn source_id(&self) -> u64 {
        self.keys.source_id
    }

    pub fn matches(&self, source_id: u64, identity: &MediaIdentity) -> bool {
        self.keys.source_id == source_id && &self.identity == identity
    }

    /// Keep the longest duration seen.
    pub fn observe_duration(&mut self, duration_ms: u64) {
        if self.duration_ms.is_none_or(|d| duration_ms > d) {
            self.duration_ms = Some(duration_ms);
        }
    }

    /// Merge metadata into the item. On error the item is left untouched.
    pub fn enrich(&mut self, response: &VideoMetadataResponse, fetched_at: DateTime<Utc>) -> Result<(), EnrichError> {
        let video = &response.video;
        match (self.kind, video.kind) {
            (ItemKind::Movie, VideoType::Movie) => {
                self.enrich_movie(video);
            }
            (ItemKind::Episode, VideoType::Show) => self.enrich_episode(video)?,
            (expected, found) => return Err(EnrichError::KindMismatch { expected, found }),
        }
        self.fetched_at = Some(fetched_at);
        Ok(())
    }

    fn enrich_movie(&mut self, movie: &VideoMetadata) {
        self.keys.metadata_id = Some(movie.id);
        self.title = Some(movie.title.clone());
        self.year = movie.year;
        if let Some(ms) = movie.runtime.and_then(runtime_ms) {
            self.duration_ms = Some(ms);
        }
    }

    fn enrich_episode(&mut self, show: &VideoMetadata) -> Result<(), EnrichError> {
        let (season_number, episode_number) = match (&self.season, self.number) {
            (Some(season), Some(number)) => (season.number, number),
            _ => {
                return Err(EnrichError::KindMismatch {
                    expected: self.kind,
                    found: show.kind,
                })
            }
        };
        let (season, episode) =
            show.find_episode(season_number, episode_number)
                .ok_or(EnrichError::EpisodeNotFound {
                    show_id: show.id,
                    season: season_number,
                    episode: episode_number,
                })?;

        self.keys.metadata_id = Some(episode.id);
        self.title = episode.title.clone();
        self.number = Some(episode.seq);
        if let Some(ms) = episode.runtime.and_then(runtime_ms) {
            self.duration_ms = Some(ms);
        }
        self.season = Some(SeasonItem {
            id: Some(season.id),
            number: season.seq,
            title: season.title.clone(),
            year: season.year,
            show: ShowItem {
                id: Some(show.id),
                title: show.title.clone(),
                year: show.show_year(),
            },
        });
        Ok(())
    }
}

/// Metadata runtimes are in seconds. Values too large to express in
/// milliseconds are ignored.
fn runtime_ms(runtime: u64) -> Option<u64> {
    runtime.checked_mul(1000)
}
