use std::time::Duration;

use activity_core::dom::MediaEventKind;
use activity_core::monitor::FetchRequest;
use activity_core::{
    ActivityConfig, ActivityEvent, ActivityEventKind, ElementSpec, HostEvent, MediaIdentity, Pipeline, SessionState,
    VideoMetadataResponse,
};
use chrono::Utc;
use serde_json::json;
use tokio::time::Instant;

/// Drives a [`Pipeline`] on a virtual clock and collects everything it emits.
struct Page {
    pipeline: Pipeline,
    now: Instant,
    events: Vec<ActivityEvent>,
    fetches: Vec<FetchRequest>,
}

impl Page {
    fn new(path: &str) -> Self {
        let t0 = Instant::now();
        let mut page = Self {
            pipeline: Pipeline::new(&ActivityConfig::default()).unwrap(),
            now: t0,
            events: Vec::new(),
            fetches: Vec::new(),
        };
        page.apply(HostEvent::navigate(path));
        page.apply(HostEvent::append("body", ElementSpec::new("div").with_id("appMountPoint")));
        let out = page.pipeline.start(t0).unwrap();
        page.events.extend(out.events);
        page.fetches.extend(out.fetches);
        page
    }

    fn apply(&mut self, event: HostEvent) {
        let out = self.pipeline.apply(event, self.now).unwrap();
        self.events.extend(out.events);
        self.fetches.extend(out.fetches);
    }

    /// Move the clock forward, firing every deadline on the way.
    fn advance(&mut self, by: Duration) {
        let target = self.now + by;
        while let Some(deadline) = self.pipeline.next_deadline().filter(|d| *d <= target) {
            self.now = deadline.max(self.now);
            let out = self.pipeline.poll(self.now).unwrap();
            self.events.extend(out.events);
            self.fetches.extend(out.fetches);
        }
        self.now = target;
    }

    fn media(&mut self, event: MediaEventKind, current_time: Option<f64>, duration: Option<f64>, ready_state: Option<u8>) {
        self.apply(HostEvent::Media {
            selector: "video".into(),
            event,
            current_time,
            duration,
            ready_state,
        });
    }

    fn play(&mut self, from_secs: u32, to_secs: u32) {
        for t in from_secs..=to_secs {
            self.advance(Duration::from_secs(1));
            self.apply(HostEvent::time_update("video", f64::from(t)));
        }
    }

    fn kinds(&self) -> Vec<ActivityEventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }

    fn count(&self, kind: ActivityEventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    fn drain(&mut self) -> Vec<ActivityEventKind> {
        let kinds = self.kinds();
        self.events.clear();
        kinds
    }
}

fn player_tree(title: &str, subtitle: Option<&str>) -> ElementSpec {
    let mut info = ElementSpec::new("div")
        .with_class("video-title")
        .with_child(ElementSpec::new("h4").with_text(title));
    if let Some(subtitle) = subtitle {
        info = info.with_child(ElementSpec::new("div").with_child(ElementSpec::new("span").with_text(subtitle)));
    }
    let video = ElementSpec::new("div")
        .with_class("VideoContainer")
        .with_child(ElementSpec::new("div").with_child(ElementSpec::new("video")));
    let player = ElementSpec::new("div")
        .with_class("nfp")
        .with_child(video)
        .with_child(ElementSpec::new("div").with_class("controls").with_child(info));
    ElementSpec::new("div")
        .with_class("sizing-wrapper")
        .with_child(ElementSpec::new("div").with_class("AkiraPlayer").with_child(player))
}

fn breaking_bad_metadata() -> VideoMetadataResponse {
    serde_json::from_value(json!({
        "video": {
            "type": "show",
            "id": 70143836,
            "title": "Breaking Bad",
            "seasons": [{
                "id": 70157088,
                "seq": 1,
                "year": 2008,
                "episodes": [{ "id": 70196252, "seq": 1, "title": "Pilot", "runtime": 3480 }]
            }]
        }
    }))
    .unwrap()
}

#[test]
fn episode_session_end_to_end() {
    let mut page = Page::new("/watch/70136120");
    page.apply(HostEvent::append("#appMountPoint", player_tree("Breaking Bad", Some("S1:E1"))));
    assert!(page.events.is_empty(), "identity is debounced");

    page.advance(Duration::from_secs(5));
    page.media(MediaEventKind::LoadedMetadata, None, Some(2820.0), Some(4));
    assert_eq!(page.fetches.len(), 1);
    assert_eq!(page.fetches[0].external_id, 70136120);

    page.play(1, 5);
    let key = page.pipeline.monitor().session().unwrap().key;
    assert!(page
        .pipeline
        .metadata_fetched(key, Ok(breaking_bad_metadata()), Utc::now()));

    page.media(MediaEventKind::Ended, None, None, None);

    assert_eq!(
        page.kinds(),
        vec![
            ActivityEventKind::Created,
            ActivityEventKind::Opened,
            ActivityEventKind::Loaded,
            ActivityEventKind::Started,
            ActivityEventKind::Progress,
            ActivityEventKind::Progress,
            ActivityEventKind::Progress,
            ActivityEventKind::Progress,
            ActivityEventKind::Progress,
            ActivityEventKind::Stopped,
            ActivityEventKind::Ended,
        ]
    );

    let created = &page.events[0];
    let item = created.item.as_ref().unwrap();
    assert_eq!(item.identity, MediaIdentity::episode("Breaking Bad", 1, 1));
    assert_eq!(item.source_id(), 70136120);

    let progress: Vec<u64> = page
        .events
        .iter()
        .filter(|e| e.kind == ActivityEventKind::Progress)
        .filter_map(|e| e.time_ms)
        .collect();
    assert_eq!(progress, vec![1_000, 2_000, 3_000, 4_000, 5_000]);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));

    let ended = page.events.last().unwrap();
    assert_eq!(ended.state, SessionState::Ended);
    let ended_item = ended.item.as_ref().unwrap();
    assert_eq!(ended_item.title.as_deref(), Some("Pilot"));
    assert_eq!(ended_item.keys.metadata_id, Some(70196252));
    assert_eq!(ended_item.season.as_ref().and_then(|s| s.show.year), Some(2008));

    page.advance(Duration::from_secs(30));
    page.apply(HostEvent::remove(".VideoContainer"));
    assert_eq!(page.count(ActivityEventKind::Ended), 1);
    assert_eq!(page.count(ActivityEventKind::Created), 1);
    assert_eq!(page.events.last().map(|e| e.kind), Some(ActivityEventKind::Closed));
}

#[test]
fn navigation_between_videos_rebinds_player() {
    let mut page = Page::new("/watch/111");
    page.apply(HostEvent::append("#appMountPoint", player_tree("Dark", Some("S1:E1"))));
    page.advance(Duration::from_secs(5));
    page.media(MediaEventKind::LoadedMetadata, None, Some(3000.0), Some(4));
    page.play(1, 2);
    let first_key = page.pipeline.monitor().session().unwrap().key;
    page.drain();

    page.apply(HostEvent::navigate("/watch/222"));
    page.apply(HostEvent::set_text("span", "S1:E2"));
    page.apply(HostEvent::append(".AkiraPlayer", ElementSpec::new("div").with_class("overlay")));

    let kinds = page.drain();
    assert_eq!(kinds, vec![ActivityEventKind::Closed, ActivityEventKind::Ended]);
    assert_eq!(page.pipeline.monitor().external_id(), Some(222));
    let video = activity_core::host::find(page.pipeline.document(), "video").unwrap();
    assert_eq!(page.pipeline.document().listener_count(video), 0);

    page.advance(Duration::from_secs(5));
    assert_eq!(
        page.kinds(),
        vec![ActivityEventKind::Created, ActivityEventKind::Opened, ActivityEventKind::Loaded]
    );
    assert_eq!(page.pipeline.document().listener_count(video), 7);
    let session = page.pipeline.monitor().session().unwrap();
    assert_ne!(session.key, first_key);
    assert_eq!(session.item.source_id(), 222);
    assert_eq!(session.item.identity, MediaIdentity::episode("Dark", 1, 2));
}

#[test]
fn navigation_detected_on_media_change_drops_stale_open() {
    let mut page = Page::new("/watch/111");
    page.apply(HostEvent::append("#appMountPoint", player_tree("Arrival", None)));
    page.advance(Duration::from_secs(5));
    page.play(1, 1);
    page.drain();

    // Only text changes: the application observer does not see the route change yet.
    page.apply(HostEvent::navigate("/watch/222"));
    page.apply(HostEvent::set_text("h4", "Dune"));
    assert!(page.events.is_empty());

    page.advance(Duration::from_secs(5));
    assert_eq!(page.drain(), vec![ActivityEventKind::Closed, ActivityEventKind::Ended]);
    assert!(page.pipeline.monitor().session().is_none());

    page.advance(Duration::from_secs(5));
    assert_eq!(page.drain(), vec![ActivityEventKind::Created, ActivityEventKind::Opened]);
    let session = page.pipeline.monitor().session().unwrap();
    assert_eq!(session.item.source_id(), 222);
    assert_eq!(session.item.identity, MediaIdentity::movie("Dune"));
}

#[test]
fn paused_video_is_reported_after_grace_window() {
    let mut page = Page::new("/watch/80014749");
    page.apply(HostEvent::append("#appMountPoint", player_tree("Arrival", None)));
    page.advance(Duration::from_secs(5));
    page.media(MediaEventKind::LoadedMetadata, None, Some(6960.0), Some(4));
    page.play(1, 3);
    page.drain();

    page.media(MediaEventKind::Pause, None, None, None);
    page.advance(Duration::from_secs(7));
    assert!(page.events.is_empty());
    page.advance(Duration::from_secs(1));
    assert_eq!(page.drain(), vec![ActivityEventKind::Paused]);
    assert_eq!(page.pipeline.monitor().state(), SessionState::Paused);

    page.media(MediaEventKind::Playing, None, None, None);
    assert_eq!(page.drain(), vec![ActivityEventKind::Started]);
}

#[test]
fn frozen_playhead_becomes_single_pause() {
    let mut page = Page::new("/watch/80014749");
    page.apply(HostEvent::append("#appMountPoint", player_tree("Arrival", None)));
    page.advance(Duration::from_secs(5));
    page.media(MediaEventKind::LoadedMetadata, None, Some(6960.0), Some(4));
    page.play(1, 3);
    page.drain();

    for _ in 0..10 {
        page.advance(Duration::from_secs(1));
        page.apply(HostEvent::time_update("video", 3.0));
    }
    assert_eq!(page.drain(), vec![ActivityEventKind::Paused]);

    page.advance(Duration::from_secs(1));
    page.apply(HostEvent::time_update("video", 4.0));
    assert_eq!(page.drain(), vec![ActivityEventKind::Started, ActivityEventKind::Progress]);
}

#[test]
fn seek_is_reported_with_new_position() {
    let mut page = Page::new("/watch/80014749");
    page.apply(HostEvent::append("#appMountPoint", player_tree("Arrival", None)));
    page.advance(Duration::from_secs(5));
    page.media(MediaEventKind::LoadedMetadata, None, Some(6960.0), Some(4));
    page.play(1, 2);
    page.drain();

    page.media(MediaEventKind::Seeked, Some(600.0), None, None);
    page.advance(Duration::from_secs(1));
    page.apply(HostEvent::time_update("video", 601.0));
    let events: Vec<_> = page.events.iter().map(|e| (e.kind, e.time_ms)).collect();
    assert_eq!(
        events,
        vec![
            (ActivityEventKind::Seeked, Some(600_000)),
            (ActivityEventKind::Progress, Some(601_000)),
        ]
    );
}

#[test]
fn unparseable_subtitle_opens_nothing() {
    let mut page = Page::new("/watch/1");
    page.apply(HostEvent::append("#appMountPoint", player_tree("Arrival", Some("Trailer"))));
    page.advance(Duration::from_secs(10));
    page.media(MediaEventKind::LoadedMetadata, None, Some(120.0), Some(4));
    page.play(1, 2);
    assert!(page.events.is_empty());
    assert_eq!(page.pipeline.monitor().state(), SessionState::Idle);
}
