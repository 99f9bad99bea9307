#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod dom;
pub mod error;
pub mod host;
pub mod identity;
pub mod item;
pub mod metadata;
pub mod monitor;
pub mod observer;
pub mod pipeline;
pub mod service;
pub mod timer;
pub mod webhook;

pub use bridge::{BridgeError, Configuration, ConfigurationSource, ShimBridge, StaticConfiguration};
pub use config::{ActivityConfig, PlayerSelectors};
pub use error::ActivityError;
pub use host::{ElementSpec, HostEvent};
pub use identity::MediaIdentity;
pub use item::{Item, ItemKind};
pub use metadata::{HttpMetadataClient, MetadataClient, MetadataError, MetadataOptions, VideoMetadataResponse};
pub use monitor::{
    ActivityEvent, ActivityEventKind, EventBus, EventRing, PlayerMonitor, SessionState, Subscription,
};
pub use pipeline::Pipeline;
pub use service::ActivityService;
pub use webhook::{
    notification_channel, Notification, WebhookConfig, WebhookDispatcher, WebhookPayload,
};
