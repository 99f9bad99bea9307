use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::{MetadataClient, MetadataError, MetadataOptions, VideoMetadataResponse};
use crate::bridge::ConfigurationSource;

/// Metadata client for the page's private API. The build identifier comes
/// from the page configuration and is part of every request path.
///
/// Embedded next to a page, the configuration is read through the shim:
///
/// ```no_run
/// use std::time::Duration;
///
/// use activity_core::{HttpMetadataClient, MetadataClient, MetadataOptions, ShimBridge};
/// use tokio::sync::mpsc;
///
/// # async fn embed() -> Result<(), Box<dyn std::error::Error>> {
/// let (transport, mut to_page) = mpsc::channel(16);
/// let bridge = ShimBridge::new(transport, Duration::from_secs(10));
/// // Forward `to_page` into the page and hand every reply to `bridge.deliver`.
/// # tokio::spawn(async move { while to_page.recv().await.is_some() {} });
/// bridge.inject().await?;
///
/// let metadata = HttpMetadataClient::new("https://www.netflix.com/api/shakti", Duration::from_secs(10), bridge.clone());
/// let _arrival = metadata.get(80014749, &MetadataOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpMetadataClient {
    client: Client,
    base_url: String,
    configuration: Arc<dyn ConfigurationSource>,
}

impl HttpMetadataClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, configuration: Arc<dyn ConfigurationSource>) -> Self {
        Self::with_client(Self::build_client(timeout), base_url, configuration)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        configuration: Arc<dyn ConfigurationSource>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            configuration,
        }
    }

    pub fn from_config(config: &crate::config::ActivityConfig, configuration: Arc<dyn ConfigurationSource>) -> Self {
        Self::new(config.metadata_base_url.clone(), config.request_timeout, configuration)
    }

    pub fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client")
    }

    pub fn metadata_url(&self, build_identifier: &str, id: u64, options: &MetadataOptions) -> Result<Url, MetadataError> {
        let mut url = Url::parse(&format!("{}/{}/metadata", self.base_url, build_identifier))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("movieid", &id.to_string());
            for (key, value) in options.query_pairs() {
                query.append_pair(key, &value);
            }
            query.append_pair("_", &chrono::Utc::now().timestamp_millis().to_string());
        }
        Ok(url)
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn get(&self, id: u64, options: &MetadataOptions) -> Result<VideoMetadataResponse, MetadataError> {
        let configuration = self.configuration.configuration(false).await?;
        let url = self.metadata_url(&configuration.server_defs.build_identifier, id, options)?;
        debug!(id, url = %url, "Fetching metadata");

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(id, "Metadata fetch timed out");
                    MetadataError::Timeout { id }
                } else {
                    warn!(id, error = %e, "Metadata fetch network error");
                    MetadataError::Network {
                        id,
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(id, status = status.as_u16(), "Metadata fetch returned error status");
            return Err(MetadataError::RequestFailed {
                id,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| MetadataError::Network {
            id,
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| MetadataError::Decode {
            id,
            message: e.to_string(),
        })
    }
}
