//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [logging]
//! format = "json"
//!
//! [defaults]
//! stall_limit_ms = 5000
//! pause_grace_ms = 8000
//! progress_interval_ms = 10000
//!
//! [metadata]
//! base_url = "https://www.netflix.com/api/shakti"
//! build_identifier = "v4f8c2a1b"
//!
//! [[webhook]]
//! url = "https://hooks.example.com/scrobble"
//! events = ["started", "paused", "ended"]
//! secret = "shared-key"
//! ```

use std::path::Path;

use serde::Deserialize;

use activity_core::dom::Selector;
use activity_core::{ActivityConfig, PlayerSelectors, WebhookConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub webhook: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Overrides for [`ActivityConfig`]; durations in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub mount_selector: Option<String>,
    pub mount_retries: Option<u32>,
    pub mount_retry_interval_ms: Option<u64>,
    pub watch_path_prefix: Option<String>,
    pub media_debounce_ms: Option<u64>,
    pub stall_limit_ms: Option<u64>,
    pub pause_grace_ms: Option<u64>,
    pub progress_interval_ms: Option<u64>,
    pub sample_limit: Option<usize>,
    pub event_limit: Option<usize>,
    pub bridge_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub selectors: Option<PlayerSelectors>,
}

impl DefaultsConfig {
    pub fn to_activity_config(&self) -> ActivityConfig {
        let mut c = ActivityConfig::default();
        if let Some(v) = &self.mount_selector {
            c = c.with_mount_selector(v.clone());
        }
        if let Some(retries) = self.mount_retries {
            let interval = self
                .mount_retry_interval_ms
                .unwrap_or(c.mount_retry_interval.as_millis() as u64);
            c = c.with_mount_retries(retries, interval);
        } else if let Some(interval) = self.mount_retry_interval_ms {
            let retries = c.mount_retries;
            c = c.with_mount_retries(retries, interval);
        }
        if let Some(v) = &self.watch_path_prefix {
            c = c.with_watch_path_prefix(v.clone());
        }
        if let Some(v) = self.media_debounce_ms {
            c = c.with_media_debounce(v);
        }
        if let Some(v) = self.stall_limit_ms {
            c = c.with_stall_limit(v);
        }
        if let Some(v) = self.pause_grace_ms {
            c = c.with_pause_grace(v);
        }
        if let Some(v) = self.progress_interval_ms {
            c = c.with_progress_interval(v);
        }
        if let Some(v) = self.sample_limit {
            c = c.with_sample_limit(v);
        }
        if let Some(v) = self.event_limit {
            c = c.with_event_limit(v);
        }
        if let Some(v) = self.bridge_timeout_ms {
            c = c.with_bridge_timeout(v);
        }
        if let Some(v) = self.request_timeout_ms {
            c = c.with_request_timeout(v);
        }
        if let Some(v) = &self.selectors {
            c = c.with_selectors(v.clone());
        }
        c
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataConfig {
    pub base_url: Option<String>,
    /// Page build identifier. Without it metadata requests are not made.
    pub build_identifier: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// The service configuration: defaults overrides plus the metadata base URL.
    pub fn activity_config(&self) -> ActivityConfig {
        let config = self.defaults.to_activity_config();
        match &self.metadata.base_url {
            Some(url) => config.with_metadata_base_url(url.clone()),
            None => config,
        }
    }

    fn validate(&self) -> Result<(), String> {
        for (i, wh) in self.webhook.iter().enumerate() {
            url::Url::parse(&wh.url)
                .map_err(|e| format!("Invalid webhook URL at index {}: {} ({})", i, wh.url, e))?;
        }

        if let Some(base) = &self.metadata.base_url {
            let parsed =
                url::Url::parse(base).map_err(|e| format!("Invalid metadata base URL: {} ({})", base, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!("Metadata base URL must use http or https: {}", base));
            }
        }

        if self.metadata.build_identifier.as_deref() == Some("") {
            return Err("Metadata build_identifier must not be empty".into());
        }

        let config = self.defaults.to_activity_config();
        let s = &config.selectors;
        for selector in [
            &config.mount_selector,
            &s.container,
            &s.player,
            &s.controls,
            &s.info,
            &s.video,
            &s.title,
            &s.subtitle,
        ] {
            Selector::parse(selector).map_err(|e| format!("Invalid selector {:?}: {}", selector, e))?;
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid logging format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}
