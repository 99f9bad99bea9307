use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::ActivityConfig;
use crate::dom::{Document, Selector};
use crate::error::ActivityError;
use crate::host::{self, HostEvent};
use crate::metadata::{MetadataError, VideoMetadataResponse};
use crate::monitor::{MonitorOutput, PlayerMonitor};
use crate::observer::{ApplicationObserver, NavigationEvent, PlayerEvent, PlayerObserver};
use crate::timer::{self, Timer};

/// The observer stack for one page, driven synchronously.
///
/// Host events mutate the [`Document`]; the resulting mutation batch flows
/// through the application and player observers into the [`PlayerMonitor`].
/// All time is explicit: timers fire only from [`Pipeline::poll`].
#[derive(Debug)]
pub struct Pipeline {
    document: Document,
    mount_selector: Selector,
    mount_retries: u32,
    mount_retry_interval: Duration,
    mount_attempts: u32,
    mount_timer: Timer,
    application: ApplicationObserver,
    player: PlayerObserver,
    monitor: PlayerMonitor,
}

impl Pipeline {
    pub fn new(config: &ActivityConfig) -> Result<Self, ActivityError> {
        Self::with_document(config, Document::new())
    }

    pub fn with_document(config: &ActivityConfig, document: Document) -> Result<Self, ActivityError> {
        Ok(Self {
            document,
            mount_selector: Selector::parse(&config.mount_selector)?,
            mount_retries: config.mount_retries,
            mount_retry_interval: config.mount_retry_interval,
            mount_attempts: 0,
            mount_timer: Timer::new(),
            application: ApplicationObserver::new(),
            player: PlayerObserver::new(config.selectors.clone(), config.media_debounce),
            monitor: PlayerMonitor::new(config),
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn monitor(&self) -> &PlayerMonitor {
        &self.monitor
    }

    pub fn player(&self) -> &PlayerObserver {
        &self.player
    }

    pub fn is_bound(&self) -> bool {
        self.application.mount().is_some()
    }

    /// First attempt to bind the mount point. A miss arms the retry timer.
    pub fn start(&mut self, now: Instant) -> Result<MonitorOutput, ActivityError> {
        let mut out = MonitorOutput::default();
        self.try_bind(now, &mut out)?;
        Ok(out)
    }

    pub fn apply(&mut self, event: HostEvent, now: Instant) -> Result<MonitorOutput, ActivityError> {
        trace!(op = event.op(), "Applying host event");
        let mut out = MonitorOutput::default();
        match event {
            HostEvent::Append { parent, element } => {
                let parent = host::find(&self.document, &parent)?;
                let node = element.build(&mut self.document);
                self.document.append_child(parent, node);
            }
            HostEvent::Remove { selector } => {
                let node = host::find(&self.document, &selector)?;
                self.document.remove(node);
            }
            HostEvent::SetText { selector, text } => {
                let node = host::find(&self.document, &selector)?;
                self.document.set_text(node, text);
            }
            HostEvent::Navigate { path } => {
                debug!(path, "Location changed");
                self.document.set_location(path);
            }
            HostEvent::Recheck => {
                if self.is_bound() {
                    self.navigated(now, &mut out)?;
                }
            }
            HostEvent::Media {
                selector,
                event,
                current_time,
                duration,
                ready_state,
            } => {
                let node = host::find(&self.document, &selector)?;
                let media = self
                    .document
                    .media_mut(node)
                    .ok_or_else(|| ActivityError::NotMediaElement { selector })?;
                if let Some(t) = current_time {
                    media.current_time = t;
                }
                if let Some(d) = duration {
                    media.duration = d;
                }
                if let Some(r) = ready_state {
                    media.ready_state = r;
                }
                if !self.document.dispatch(node, event).is_empty() {
                    if let Some(player_event) = self.player.handle_media(&self.document, node, event) {
                        self.feed(vec![player_event], now, &mut out)?;
                    }
                }
            }
        }
        self.flush(now, &mut out)?;
        Ok(out)
    }

    /// Fire due timers: mount retries, the media debounce, and monitor timers.
    pub fn poll(&mut self, now: Instant) -> Result<MonitorOutput, ActivityError> {
        let mut out = MonitorOutput::default();
        if self.mount_timer.fire(now) {
            self.try_bind(now, &mut out)?;
        }
        let events = self.player.poll(&mut self.document, now);
        self.feed(events, now, &mut out)?;
        out.extend(self.monitor.poll(now));
        Ok(out)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([
            self.mount_timer.deadline(),
            self.player.next_deadline(),
            self.monitor.next_deadline(),
        ])
    }

    pub fn metadata_fetched(
        &mut self,
        session_key: u64,
        result: Result<VideoMetadataResponse, MetadataError>,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        self.monitor.metadata_fetched(session_key, result, fetched_at)
    }

    /// Unbind the player and close any open session.
    pub fn shutdown(&mut self) -> MonitorOutput {
        self.mount_timer.cancel();
        self.player.stop(&mut self.document);
        self.monitor.shutdown()
    }

    fn try_bind(&mut self, now: Instant, out: &mut MonitorOutput) -> Result<(), ActivityError> {
        if self.is_bound() {
            return Ok(());
        }
        self.mount_attempts += 1;
        let Some(mount) = ApplicationObserver::locate_mount(&self.document, &self.mount_selector) else {
            if self.mount_attempts > self.mount_retries {
                return Err(ActivityError::MountPointNotFound {
                    selector: self.mount_selector.as_str().to_string(),
                    attempts: self.mount_attempts,
                });
            }
            debug!(
                selector = self.mount_selector.as_str(),
                attempt = self.mount_attempts,
                "Mount point not rendered yet"
            );
            self.mount_timer.schedule(now, self.mount_retry_interval);
            return Ok(());
        };

        self.application.bind(mount);
        // Anything recorded before binding is covered by the initial scan.
        self.document.take_records();
        self.navigated(now, out)?;
        Ok(())
    }

    /// Drain the pending mutation batch into the observers.
    fn flush(&mut self, now: Instant, out: &mut MonitorOutput) -> Result<(), ActivityError> {
        let records = self.document.take_records();
        if records.is_empty() || !self.is_bound() {
            return Ok(());
        }
        if self.application.handles(&self.document, &records) {
            self.navigated(now, out)?;
        }
        let events = self.player.handle_mutations(&mut self.document, &records, now);
        self.feed(events, now, out)
    }

    /// Compare the location with the last seen path. Returns whether it changed.
    fn navigated(&mut self, now: Instant, out: &mut MonitorOutput) -> Result<bool, ActivityError> {
        let navigations = self.application.on_navigated(&self.document);
        if navigations.is_empty() {
            return Ok(false);
        }
        for navigation in navigations {
            match &navigation {
                NavigationEvent::From(_) => {
                    // The monitor closes the session itself; the player's Closed is stale.
                    let dropped = self.player.stop(&mut self.document);
                    trace!(path = navigation.path(), ?dropped, "Player unbound");
                    out.extend(self.monitor.handle_navigation(&navigation, now));
                }
                NavigationEvent::To(path) => {
                    out.extend(self.monitor.handle_navigation(&navigation, now));
                    let Some(mount) = self.application.mount() else {
                        continue;
                    };
                    if self.monitor.parse_watch_path(path).is_some() {
                        let events = self.player.start(&mut self.document, mount, now)?;
                        self.feed(events, now, out)?;
                    }
                }
            }
        }
        Ok(true)
    }

    fn feed(&mut self, events: Vec<PlayerEvent>, now: Instant, out: &mut MonitorOutput) -> Result<(), ActivityError> {
        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            let duration = self.player.duration_ms(&self.document);
            out.extend(self.monitor.handle_player(&event, duration, now));
            if matches!(event, PlayerEvent::MediaChanged { .. }) && self.navigated(now, out)? {
                let stale: Vec<_> = events.by_ref().collect();
                if !stale.is_empty() {
                    warn!(count = stale.len(), "Dropping player events from before navigation");
                }
                break;
            }
        }
        Ok(())
    }
}
