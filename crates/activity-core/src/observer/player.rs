use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::video::{VideoElementObserver, VideoEvent};
use crate::config::PlayerSelectors;
use crate::dom::{
    Document, DocumentObserver, MediaEventKind, MutationRecord, NodeId, ObservationEvent, ObservationId,
    ObserveOptions, SelectorError,
};
use crate::identity::{self, MediaIdentity};
use crate::timer::Timer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    MediaChanged {
        previous: Option<MediaIdentity>,
        current: Option<MediaIdentity>,
    },
    Opened,
    Closed,
    Loading,
    Loaded,
    Started,
    Paused,
    Stopped,
    Progress(u64),
    Seeked(u64),
}

impl From<VideoEvent> for PlayerEvent {
    fn from(event: VideoEvent) -> Self {
        match event {
            VideoEvent::Loading => Self::Loading,
            VideoEvent::Loaded => Self::Loaded,
            VideoEvent::Started => Self::Started,
            VideoEvent::Paused => Self::Paused,
            VideoEvent::Stopped => Self::Stopped,
            VideoEvent::Progress(t) => Self::Progress(t),
            VideoEvent::Seeked(t) => Self::Seeked(t),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Regions {
    video: ObservationId,
    title: ObservationId,
    subtitle: ObservationId,
}

/// Watches the player region under the mount point and reconciles its
/// title/subtitle text and `<video>` element into one media identity.
#[derive(Debug)]
pub struct PlayerObserver {
    selectors: PlayerSelectors,
    debounce_window: Duration,
    observer: DocumentObserver,
    regions: Option<Regions>,
    debounce: Timer,
    current_media: Option<MediaIdentity>,
    current_video: Option<NodeId>,
    video: VideoElementObserver,
}

impl PlayerObserver {
    pub fn new(selectors: PlayerSelectors, debounce_window: Duration) -> Self {
        Self {
            selectors,
            debounce_window,
            observer: DocumentObserver::new(),
            regions: None,
            debounce: Timer::new(),
            current_media: None,
            current_video: None,
            video: VideoElementObserver::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.regions.is_some()
    }

    pub fn current_media(&self) -> Option<&MediaIdentity> {
        self.current_media.as_ref()
    }

    pub fn current_video(&self) -> Option<NodeId> {
        self.current_video
    }

    /// Create the observation chain under `mount` and report what is already rendered.
    pub fn start(&mut self, doc: &mut Document, mount: NodeId, now: Instant) -> Result<Vec<PlayerEvent>, SelectorError> {
        if self.is_started() {
            return Ok(Vec::new());
        }

        let s = &self.selectors;
        let mut observer = DocumentObserver::new();
        let container = observer.observe(mount, &s.container, ObserveOptions::default())?;
        let player = observer.observe(container, &s.player, ObserveOptions::default())?;
        let controls = observer.observe(player, &s.controls, ObserveOptions::default())?;
        let info = observer.observe(controls, &s.info, ObserveOptions::default())?;
        let video = observer.observe(player, &s.video, ObserveOptions::default())?;
        let title = observer.observe(info, &s.title, ObserveOptions::text())?;
        let subtitle = observer.observe(info, &s.subtitle, ObserveOptions::text())?;

        debug!(%mount, "Observing player");
        self.observer = observer;
        self.regions = Some(Regions {
            video,
            title,
            subtitle,
        });
        Ok(self.refresh(doc, now))
    }

    /// Tear down every observation, the pending media check, and the video binding.
    pub fn stop(&mut self, doc: &mut Document) -> Vec<PlayerEvent> {
        if self.regions.take().is_none() {
            return Vec::new();
        }
        debug!("Stopped observing player");
        self.observer.disconnect_all();
        self.debounce.cancel();
        self.current_media = None;
        self.current_video = None;
        if self.video.stop(doc, None) {
            vec![PlayerEvent::Closed]
        } else {
            Vec::new()
        }
    }

    pub fn handle_mutations(&mut self, doc: &mut Document, records: &[MutationRecord], now: Instant) -> Vec<PlayerEvent> {
        let changes = self.observer.process(doc, records);
        self.apply_changes(doc, changes, now)
    }

    pub fn handle_media(&mut self, doc: &Document, node: NodeId, kind: MediaEventKind) -> Option<PlayerEvent> {
        self.video.handle(doc, node, kind).map(PlayerEvent::from)
    }

    /// Run the media check once the debounce window has elapsed.
    pub fn poll(&mut self, doc: &mut Document, now: Instant) -> Vec<PlayerEvent> {
        if !self.debounce.fire(now) {
            return Vec::new();
        }
        self.media_changed(doc)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    pub fn duration_ms(&self, doc: &Document) -> Option<u64> {
        self.video.duration_ms(doc)
    }

    fn refresh(&mut self, doc: &mut Document, now: Instant) -> Vec<PlayerEvent> {
        let changes = self.observer.refresh(doc);
        self.apply_changes(doc, changes, now)
    }

    fn apply_changes(&mut self, doc: &mut Document, changes: Vec<ObservationEvent>, now: Instant) -> Vec<PlayerEvent> {
        let Some(regions) = self.regions else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for change in changes {
            match change {
                ObservationEvent::Added { observation, node } if observation == regions.video => {
                    events.extend(self.on_video_added(doc, node, now));
                }
                ObservationEvent::Removed { observation, node } if observation == regions.video => {
                    events.extend(self.on_video_removed(doc, node));
                }
                ObservationEvent::Mutation { observation, .. }
                    if observation == regions.title || observation == regions.subtitle =>
                {
                    self.schedule_media_check(now);
                }
                other => trace!(?other, "Player region changed"),
            }
        }
        events
    }

    fn schedule_media_check(&mut self, now: Instant) {
        self.debounce.schedule(now, self.debounce_window);
    }

    fn on_video_added(&mut self, doc: &mut Document, node: NodeId, now: Instant) -> Vec<PlayerEvent> {
        trace!(%node, "Video added");
        let mut events = Vec::new();
        if let Some(existing) = self.current_video.filter(|v| *v != node) {
            trace!(%existing, "Video already being observed, closing it");
            events.extend(self.on_video_removed(doc, existing));
        }
        self.current_video = Some(node);
        self.schedule_media_check(now);
        events
    }

    fn on_video_removed(&mut self, doc: &mut Document, node: NodeId) -> Vec<PlayerEvent> {
        trace!(%node, "Video removed");
        if self.current_video == Some(node) {
            self.current_video = None;
        }
        if !self.video.stop(doc, Some(node)) {
            trace!(%node, "Ignoring removal of unobserved video");
            return Vec::new();
        }
        self.current_media = None;
        vec![PlayerEvent::Closed]
    }

    fn media_changed(&mut self, doc: &mut Document) -> Vec<PlayerEvent> {
        let Some(regions) = self.regions else {
            return Vec::new();
        };

        let title = self.observer.first(regions.title).map(|n| doc.text_content(n));
        let subtitles: Vec<String> = self
            .observer
            .all(regions.subtitle)
            .iter()
            .map(|n| doc.text_content(*n))
            .collect();
        let current = identity::parse(title.as_deref(), &subtitles);
        trace!(?current, "Media detected");

        if current == self.current_media {
            return Vec::new();
        }

        let Some(video) = self.current_video else {
            if current.is_some() {
                debug!("Deferring media change, no video available");
                return Vec::new();
            }
            let previous = self.current_media.take();
            return vec![PlayerEvent::MediaChanged { previous, current }];
        };

        let previous = std::mem::replace(&mut self.current_media, current.clone());
        debug!(?previous, ?current, "Media changed");
        let mut events = vec![PlayerEvent::MediaChanged {
            previous,
            current: current.clone(),
        }];

        if current.is_none() {
            events.extend(self.on_video_removed(doc, video));
            return events;
        }

        events.push(PlayerEvent::Opened);
        events.extend(self.video.start(doc, video).into_iter().map(PlayerEvent::from));
        events
    }
}
