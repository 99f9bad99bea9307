use std::time::Duration;

use serde::{Deserialize, Serialize};

/// CSS selectors used to locate the player regions under the mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSelectors {
    pub container: String,
    pub player: String,
    pub controls: String,
    pub info: String,
    pub video: String,
    pub title: String,
    pub subtitle: String,
}

impl Default for PlayerSelectors {
    fn default() -> Self {
        Self {
            container: ".sizing-wrapper .AkiraPlayer".into(),
            player: ".nfp:not(.preplay)".into(),
            controls: ".controls".into(),
            info: ".video-title".into(),
            video: ".VideoContainer div video".into(),
            title: "h4".into(),
            subtitle: "div span".into(),
        }
    }
}

/// Configuration for an activity service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Selector for the single-page application's root container.
    pub mount_selector: String,
    /// Number of re-attempts when the mount point has not rendered yet (default: 10).
    pub mount_retries: u32,
    /// Fixed delay between mount point attempts (default: 500ms).
    pub mount_retry_interval: Duration,
    /// Path prefix of player pages; `{prefix}/{id}` carries the external video id.
    pub watch_path_prefix: String,
    pub selectors: PlayerSelectors,
    /// Quiet period before title/subtitle text is turned into an identity (default: 5s).
    pub media_debounce: Duration,
    /// Time a non-advancing playback position is tolerated before it counts as a pause (default: 5s).
    pub stall_limit: Duration,
    /// Hold applied to native pause events before they are trusted (default: 8s).
    pub pause_grace: Duration,
    /// Minimum spacing between emitted progress events. Zero emits every advancing sample.
    pub progress_interval: Duration,
    /// Playback samples kept per session for stall detection.
    pub sample_limit: usize,
    /// Maximum number of activity events retained (ring buffer capacity).
    pub event_limit: usize,
    /// Timeout for requests sent across the page bridge (default: 10s).
    pub bridge_timeout: Duration,
    /// HTTP request timeout for metadata fetches.
    pub request_timeout: Duration,
    pub metadata_base_url: String,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            mount_selector: "#appMountPoint".into(),
            mount_retries: 10,
            mount_retry_interval: Duration::from_millis(500),
            watch_path_prefix: "/watch".into(),
            selectors: PlayerSelectors::default(),
            media_debounce: Duration::from_secs(5),
            stall_limit: Duration::from_secs(5),
            pause_grace: Duration::from_secs(8),
            progress_interval: Duration::ZERO,
            sample_limit: 32,
            event_limit: 200,
            bridge_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            metadata_base_url: "https://www.netflix.com/api/shakti".into(),
        }
    }
}

impl ActivityConfig {
    pub fn with_mount_selector(mut self, selector: impl Into<String>) -> Self {
        self.mount_selector = selector.into();
        self
    }

    pub fn with_mount_retries(mut self, retries: u32, interval_ms: u64) -> Self {
        self.mount_retries = retries;
        self.mount_retry_interval = Duration::from_millis(interval_ms);
        self
    }

    pub fn with_watch_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.watch_path_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_selectors(mut self, selectors: PlayerSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_media_debounce(mut self, ms: u64) -> Self {
        self.media_debounce = Duration::from_millis(ms);
        self
    }

    pub fn with_stall_limit(mut self, ms: u64) -> Self {
        self.stall_limit = Duration::from_millis(ms);
        self
    }

    pub fn with_pause_grace(mut self, ms: u64) -> Self {
        self.pause_grace = Duration::from_millis(ms);
        self
    }

    pub fn with_progress_interval(mut self, ms: u64) -> Self {
        self.progress_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit.max(2);
        self
    }

    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = limit.max(1);
        self
    }

    pub fn with_bridge_timeout(mut self, ms: u64) -> Self {
        self.bridge_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_metadata_base_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}
