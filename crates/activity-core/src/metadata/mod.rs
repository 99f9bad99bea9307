mod http;

pub use http::HttpMetadataClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::BridgeError;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Request failed with status {status} for video {id}")]
    RequestFailed { id: u64, status: u16 },
    #[error("Network error fetching metadata for video {id}: {reason}")]
    Network { id: u64, reason: String },
    #[error("Timeout fetching metadata for video {id}")]
    Timeout { id: u64 },
    #[error("Invalid metadata for video {id}: {message}")]
    Decode { id: u64, message: String },
    #[error("Page configuration unavailable: {0}")]
    Bridge(#[from] BridgeError),
    #[error("Invalid metadata URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl MetadataError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Query flags sent with every metadata request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataOptions {
    pub image_format: String,
    pub can_watch_branching_titles: bool,
    pub fetch_list_annotations: bool,
    pub is_watchlist_enabled: bool,
    pub is_shortform_enabled: bool,
    pub materialize: bool,
    pub with_size: bool,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            image_format: "webp".into(),
            can_watch_branching_titles: false,
            fetch_list_annotations: false,
            is_watchlist_enabled: false,
            is_shortform_enabled: false,
            materialize: true,
            with_size: true,
        }
    }
}

impl MetadataOptions {
    pub(crate) fn query_pairs(&self) -> [(&'static str, String); 7] {
        [
            ("imageFormat", self.image_format.clone()),
            ("canWatchBranchingTitles", self.can_watch_branching_titles.to_string()),
            ("fetchListAnnotations", self.fetch_list_annotations.to_string()),
            ("isWatchlistEnabled", self.is_watchlist_enabled.to_string()),
            ("isShortformEnabled", self.is_shortform_enabled.to_string()),
            ("materialize", self.materialize.to_string()),
            ("withSize", self.with_size.to_string()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Movie,
    Show,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub id: u64,
    pub seq: u32,
    #[serde(default)]
    pub title: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub runtime: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonMetadata {
    pub id: u64,
    pub seq: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub episodes: Vec<EpisodeMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(rename = "type")]
    pub kind: VideoType,
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    /// Seconds. Only present for movies.
    #[serde(default)]
    pub runtime: Option<u64>,
    #[serde(default)]
    pub seasons: Vec<SeasonMetadata>,
}

impl VideoMetadata {
    pub fn find_episode(&self, season: u32, episode: u32) -> Option<(&SeasonMetadata, &EpisodeMetadata)> {
        let season = self.seasons.iter().find(|s| s.seq == season)?;
        let episode = season.episodes.iter().find(|e| e.seq == episode)?;
        Some((season, episode))
    }

    /// Show year, taken from the first season when it is season one.
    pub fn show_year(&self) -> Option<i32> {
        self.seasons
            .first()
            .filter(|s| s.seq == 1)
            .and_then(|s| s.year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadataResponse {
    pub video: VideoMetadata,
}

/// Fetches authoritative metadata for an external video id.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn get(&self, id: u64, options: &MetadataOptions) -> Result<VideoMetadataResponse, MetadataError>;
}
