use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::ActivityConfig;
use crate::error::ActivityError;
use crate::host::HostEvent;
use crate::metadata::{MetadataClient, MetadataError, MetadataOptions, VideoMetadataResponse};
use crate::monitor::{ActivityEvent, EventBus, FetchRequest, MonitorOutput, Subscription, SubscriptionId};
use crate::pipeline::Pipeline;
use crate::webhook::Notification;

struct FetchOutcome {
    session_key: u64,
    result: Result<VideoMetadataResponse, MetadataError>,
    fetched_at: DateTime<Utc>,
}

/// Async driver for one page's [`Pipeline`].
///
/// Owns the pipeline on a single task: host events, timer expiries and
/// metadata results are handled one at a time. Metadata requests run on
/// spawned tasks and report back over a channel.
pub struct ActivityService {
    service_id: String,
    config: ActivityConfig,
    metadata: Arc<dyn MetadataClient>,
    options: MetadataOptions,
    bus: EventBus<ActivityEvent>,
    notification_tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl ActivityService {
    pub fn new(service_id: impl Into<String>, config: ActivityConfig, metadata: Arc<dyn MetadataClient>) -> Self {
        Self {
            service_id: service_id.into(),
            config,
            metadata,
            options: MetadataOptions::default(),
            bus: EventBus::new(),
            notification_tx: None,
        }
    }

    /// Forward every published event (and fatal failures) to a webhook dispatcher.
    pub fn with_notifications(mut self, tx: mpsc::UnboundedSender<Notification>) -> Self {
        self.notification_tx = Some(tx);
        self
    }

    pub fn with_metadata_options(mut self, options: MetadataOptions) -> Self {
        self.options = options;
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn subscribe(&mut self) -> Subscription<ActivityEvent> {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Process host events until the channel closes.
    ///
    /// Returns an error only when the mount point never appears; everything
    /// else is logged and skipped.
    pub async fn run(mut self, mut host_rx: mpsc::Receiver<HostEvent>) -> Result<(), ActivityError> {
        let mut pipeline = Pipeline::new(&self.config)?;
        let (fetch_tx, mut fetch_rx) = mpsc::unbounded_channel::<FetchOutcome>();

        info!(service_id = %self.service_id, "Activity service started");
        let started = pipeline.start(Instant::now());
        self.handle(started, &fetch_tx)?;

        loop {
            let deadline = pipeline.next_deadline();
            tokio::select! {
                event = host_rx.recv() => match event {
                    Some(event) => {
                        let output = pipeline.apply(event, Instant::now());
                        self.handle(output, &fetch_tx)?;
                    }
                    None => {
                        debug!(service_id = %self.service_id, "Host channel closed");
                        let output = pipeline.shutdown();
                        self.publish(output, &fetch_tx);
                        info!(service_id = %self.service_id, "Activity service stopped");
                        return Ok(());
                    }
                },
                Some(outcome) = fetch_rx.recv() => {
                    pipeline.metadata_fetched(outcome.session_key, outcome.result, outcome.fetched_at);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let output = pipeline.poll(Instant::now());
                    self.handle(output, &fetch_tx)?;
                }
            }
        }
    }

    fn handle(
        &mut self,
        output: Result<MonitorOutput, ActivityError>,
        fetch_tx: &mpsc::UnboundedSender<FetchOutcome>,
    ) -> Result<(), ActivityError> {
        match output {
            Ok(output) => {
                self.publish(output, fetch_tx);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!(service_id = %self.service_id, error = %e, "Activity service failed");
                self.notify(Notification::Failure {
                    service_id: self.service_id.clone(),
                    message: e.to_string(),
                    at: Utc::now(),
                });
                Err(e)
            }
            Err(e) => {
                warn!(service_id = %self.service_id, error = %e, "Skipping host event");
                Ok(())
            }
        }
    }

    fn publish(&mut self, output: MonitorOutput, fetch_tx: &mpsc::UnboundedSender<FetchOutcome>) {
        for request in output.fetches {
            self.spawn_fetch(request, fetch_tx.clone());
        }
        for event in output.events {
            let delivered = self.bus.publish(&event);
            trace!(kind = %event.kind, session_key = event.session_key, delivered, "Published activity event");
            self.notify(Notification::Activity {
                service_id: self.service_id.clone(),
                event,
            });
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.notification_tx {
            if tx.send(notification).is_err() {
                trace!("Notification channel closed");
            }
        }
    }

    fn spawn_fetch(&self, request: FetchRequest, tx: mpsc::UnboundedSender<FetchOutcome>) {
        let client = Arc::clone(&self.metadata);
        let options = self.options.clone();
        debug!(session_key = request.session_key, external_id = request.external_id, "Fetching metadata");
        tokio::spawn(async move {
            let result = client.get(request.external_id, &options).await;
            let outcome = FetchOutcome {
                session_key: request.session_key,
                result,
                fetched_at: Utc::now(),
            };
            if tx.send(outcome).is_err() {
                trace!(session_key = request.session_key, "Service gone, dropping metadata");
            }
        });
    }
}
