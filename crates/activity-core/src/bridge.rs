use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, trace};

/// Kind of the unsolicited event the page shim sends once it is injected.
pub const CONFIGURATION_EVENT: &str = "configuration";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Request timeout")]
    RequestTimeout,
    #[error("Inject timeout")]
    InjectTimeout,
    #[error("Bridge transport closed")]
    Disconnected,
    #[error("Invalid {kind} payload: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A message from the extension side to the page shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: u64,
    pub kind: String,
    #[serde(default)]
    pub args: Value,
}

/// A message from the page shim. Replies carry the request id; broadcast events do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    #[serde(default)]
    pub id: Option<u64>,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDefs {
    #[serde(rename = "BUILD_IDENTIFIER")]
    pub build_identifier: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Page-context configuration exposed by the shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub server_defs: ServerDefs,
    #[serde(default)]
    pub user_info: Value,
}

impl Configuration {
    pub fn new(build_identifier: impl Into<String>) -> Self {
        Self {
            server_defs: ServerDefs {
                build_identifier: build_identifier.into(),
                extra: serde_json::Map::new(),
            },
            user_info: Value::Null,
        }
    }
}

/// Anything able to hand out the page configuration.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn configuration(&self, refresh: bool) -> Result<Configuration, BridgeError>;
}

/// A fixed configuration, for callers that already know the build identifier.
#[derive(Debug, Clone)]
pub struct StaticConfiguration(pub Configuration);

#[async_trait]
impl ConfigurationSource for StaticConfiguration {
    async fn configuration(&self, _refresh: bool) -> Result<Configuration, BridgeError> {
        Ok(self.0.clone())
    }
}

/// Request/response channel to the script running in the page's own context.
///
/// Requests go out over an mpsc transport; the host feeds every message coming
/// back from the page into [`ShimBridge::deliver`].
pub struct ShimBridge {
    transport: mpsc::Sender<BridgeRequest>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    configuration: watch::Sender<Option<Configuration>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ShimBridge {
    pub fn new(transport: mpsc::Sender<BridgeRequest>, timeout: Duration) -> Arc<Self> {
        let (configuration, _) = watch::channel(None);
        Arc::new(Self {
            transport,
            pending: Mutex::new(HashMap::new()),
            configuration,
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    /// Ask the host to inject the shim and wait for its configuration event.
    pub async fn inject(&self) -> Result<Configuration, BridgeError> {
        let mut rx = self.configuration.subscribe();
        let request = BridgeRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind: "inject".into(),
            args: Value::Null,
        };
        self.transport
            .send(request)
            .await
            .map_err(|_| BridgeError::Disconnected)?;

        let result = match tokio::time::timeout(self.timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(config)) => config.clone().ok_or(BridgeError::Disconnected),
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => Err(BridgeError::InjectTimeout),
        };
        result
    }

    /// Send a correlated request and wait for the matching reply.
    pub async fn request(&self, kind: &str, args: Value) -> Result<Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!(id, kind, "Bridge request");
        let request = BridgeRequest {
            id,
            kind: kind.to_string(),
            args,
        };
        if self.transport.send(request).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(BridgeError::Disconnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(BridgeError::RequestTimeout)
            }
        }
    }

    /// Route a message from the page. Returns whether it was consumed.
    pub async fn deliver(&self, response: BridgeResponse) -> Result<bool, BridgeError> {
        if let Some(id) = response.id {
            let Some(tx) = self.pending.lock().await.remove(&id) else {
                debug!(id, kind = %response.kind, "Dropping reply for unknown request");
                return Ok(false);
            };
            return Ok(tx.send(response.payload).is_ok());
        }

        if response.kind == CONFIGURATION_EVENT {
            let config = decode_configuration(response.payload)?;
            debug!(build = %config.server_defs.build_identifier, "Received page configuration");
            self.configuration.send_replace(Some(config));
            return Ok(true);
        }

        trace!(kind = %response.kind, "Ignoring unsolicited bridge event");
        Ok(false)
    }

    /// Cached page configuration, requested from the page on first use or when `refresh` is set.
    pub async fn configuration(&self, refresh: bool) -> Result<Configuration, BridgeError> {
        if !refresh {
            if let Some(config) = self.configuration.borrow().clone() {
                return Ok(config);
            }
        }
        let payload = self.request(CONFIGURATION_EVENT, Value::Null).await?;
        let config = decode_configuration(payload)?;
        self.configuration.send_replace(Some(config.clone()));
        Ok(config)
    }
}

fn decode_configuration(payload: Value) -> Result<Configuration, BridgeError> {
    serde_json::from_value(payload).map_err(|source| BridgeError::Decode {
        kind: CONFIGURATION_EVENT.into(),
        source,
    })
}

#[async_trait]
impl ConfigurationSource for ShimBridge {
    async fn configuration(&self, refresh: bool) -> Result<Configuration, BridgeError> {
        ShimBridge::configuration(self, refresh).await
    }
}
