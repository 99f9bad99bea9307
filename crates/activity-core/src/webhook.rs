//! Webhook delivery of activity events.
//!
//! The service pushes every published [`ActivityEvent`] (and fatal failures)
//! through an mpsc channel. The [`WebhookDispatcher`] reads from that channel
//! and POSTs a JSON envelope to each configured endpoint that accepts it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::monitor::ActivityEvent;

pub const SIGNATURE_HEADER: &str = "X-Activity-Signature-256";

/// Configuration for a single webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Notification types to deliver (`started`, `progress`, `error`, ...). Empty means all.
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,

    /// Base delay between attempts, doubled on each retry.
    #[serde(default = "default_webhook_backoff_ms")]
    pub backoff_ms: u64,

    /// Optional HMAC-SHA256 signing secret for the signature header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_webhook_retries() -> u32 {
    2
}

fn default_webhook_backoff_ms() -> u64 {
    500
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Vec::new(),
            timeout_ms: default_webhook_timeout_ms(),
            max_retries: default_webhook_retries(),
            backoff_ms: default_webhook_backoff_ms(),
            secret: None,
        }
    }

    pub fn accepts(&self, notification_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == notification_type)
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    Activity {
        service_id: String,
        event: ActivityEvent,
    },
    Failure {
        service_id: String,
        message: String,
        at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn notification_type(&self) -> &str {
        match self {
            Self::Activity { event, .. } => event.kind.as_str(),
            Self::Failure { .. } => "error",
        }
    }
}

/// The JSON envelope POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub version: u8,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub service_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<u64>,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn from_notification(notification: &Notification) -> Self {
        match notification {
            Notification::Activity { service_id, event } => Self {
                version: 1,
                id: Uuid::new_v4().to_string(),
                timestamp: event.timestamp,
                notification_type: notification.notification_type().to_string(),
                service_id: service_id.clone(),
                session_key: Some(event.session_key),
                data: serde_json::json!({
                    "event_id": event.id,
                    "state": event.state,
                    "item": event.item,
                    "time_ms": event.time_ms,
                }),
            },
            Notification::Failure {
                service_id,
                message,
                at,
            } => Self {
                version: 1,
                id: Uuid::new_v4().to_string(),
                timestamp: *at,
                notification_type: "error".to_string(),
                service_id: service_id.clone(),
                session_key: None,
                data: serde_json::json!({ "message": message }),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

/// Background task delivering notifications to every configured endpoint.
pub struct WebhookDispatcher {
    rx: mpsc::UnboundedReceiver<Notification>,
    webhooks: Vec<WebhookConfig>,
    client: Client,
}

impl WebhookDispatcher {
    pub fn new(rx: mpsc::UnboundedReceiver<Notification>, webhooks: Vec<WebhookConfig>, client: Client) -> Self {
        Self {
            rx,
            webhooks,
            client,
        }
    }

    /// Run until all senders are dropped.
    pub async fn run(mut self) {
        debug!(webhook_count = self.webhooks.len(), "Webhook dispatcher started");

        while let Some(notification) = self.rx.recv().await {
            let payload = WebhookPayload::from_notification(&notification);
            let notification_type = notification.notification_type();
            let body = match serde_json::to_vec(&payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize webhook payload");
                    continue;
                }
            };

            let deliveries = self
                .webhooks
                .iter()
                .filter(|wh| wh.accepts(notification_type))
                .map(|wh| {
                    let client = &self.client;
                    let body = &body;
                    async move {
                        let result = deliver(client, wh, body).await;
                        (wh, result)
                    }
                });

            for (wh, result) in join_all(deliveries).await {
                match result {
                    Ok(()) => debug!(url = %wh.url, notification_type, "Webhook delivered"),
                    Err(e) => warn!(url = %wh.url, notification_type, error = %e, "Webhook delivery failed"),
                }
            }
        }

        debug!("Webhook dispatcher shutting down");
    }
}

pub fn notification_channel() -> (mpsc::UnboundedSender<Notification>, mpsc::UnboundedReceiver<Notification>) {
    mpsc::unbounded_channel()
}

async fn deliver(client: &Client, webhook: &WebhookConfig, body: &[u8]) -> Result<(), DeliveryError> {
    let url = webhook.url.as_str();
    let mut last_error = None;

    for attempt in 0..=webhook.max_retries {
        if attempt > 0 {
            let backoff = Duration::from_millis(webhook.backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1)));
            tokio::time::sleep(backoff).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("activity-monitor/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(webhook.timeout_ms))
            .body(body.to_vec());

        if let Some(secret) = webhook.secret.as_deref() {
            req = req.header(SIGNATURE_HEADER, format!("sha256={}", sign_payload(body, secret)));
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let err = DeliveryError::Status {
                    url: url.to_string(),
                    status,
                };
                if (400..500).contains(&status) && status != 429 {
                    return Err(err);
                }
                last_error = Some(err);
            }
            Err(e) => {
                last_error = Some(DeliveryError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(last_error.unwrap_or(DeliveryError::Request {
        url: url.to_string(),
        reason: "no attempts made".into(),
    }))
}

pub fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
