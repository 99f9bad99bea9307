//! Recorded page scenarios.
//!
//! A scenario is a list of host events with delays, replayed in order:
//!
//! ```toml
//! name = "Arrival, first minute"
//!
//! [[step]]
//! op = "navigate"
//! path = "/watch/80014749"
//!
//! [[step]]
//! op = "append"
//! parent = "body"
//! element = { tag = "div", id = "appMountPoint" }
//!
//! [[step]]
//! after_ms = 1000
//! op = "media"
//! selector = "video"
//! event = "timeupdate"
//! current_time = 1.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use activity_core::{ActivityConfig, HostEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub step: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Delay before this step, relative to the previous one.
    #[serde(default)]
    pub after_ms: u64,

    #[serde(flatten)]
    pub event: HostEvent,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read scenario {}: {}", path.display(), e))?;
        let scenario: Scenario = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse scenario {}: {}", path.display(), e))?;
        if scenario.step.is_empty() {
            return Err(format!("Scenario {} has no steps", path.display()));
        }
        Ok(scenario)
    }

    /// Total scripted time, before any speed-up.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.step.iter().map(|s| s.after_ms).sum())
    }
}

/// Divide a duration by the replay speed factor. Factors that are not
/// positive, or that would stretch the duration past what `Duration` holds,
/// leave it unchanged.
pub fn scaled(duration: Duration, speed: f64) -> Duration {
    if speed <= 0.0 || !speed.is_finite() {
        return duration;
    }
    Duration::try_from_secs_f64(duration.as_secs_f64() / speed).unwrap_or(duration)
}

/// Compress every timing of the service by `speed` so that a sped-up replay
/// keeps the same ordering of host events and timer expiries.
pub fn scale_config(config: ActivityConfig, speed: f64) -> ActivityConfig {
    let mut c = config;
    c.mount_retry_interval = scaled(c.mount_retry_interval, speed);
    c.media_debounce = scaled(c.media_debounce, speed);
    c.stall_limit = scaled(c.stall_limit, speed);
    c.pause_grace = scaled(c.pause_grace, speed);
    c.progress_interval = scaled(c.progress_interval, speed);
    c
}
