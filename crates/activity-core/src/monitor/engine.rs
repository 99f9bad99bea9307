use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::event::{ActivityEvent, ActivityEventKind, EventRing};
use super::session::{FetchState, PlaybackSample, Session, SessionState};
use crate::config::ActivityConfig;
use crate::identity::MediaIdentity;
use crate::item::Item;
use crate::metadata::{MetadataError, VideoMetadataResponse};
use crate::observer::{NavigationEvent, PlayerEvent};

/// Ask the service to fetch metadata for the session's external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub session_key: u64,
    pub external_id: u64,
}

#[derive(Debug, Default)]
pub struct MonitorOutput {
    pub events: Vec<ActivityEvent>,
    pub fetches: Vec<FetchRequest>,
}

impl MonitorOutput {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.fetches.is_empty()
    }

    pub fn extend(&mut self, other: MonitorOutput) {
        self.events.extend(other.events);
        self.fetches.extend(other.fetches);
    }

    fn emit(&mut self, session: &Session, kind: ActivityEventKind) {
        self.events.push(event(session, kind));
    }
}

fn event(session: &Session, kind: ActivityEventKind) -> ActivityEvent {
    let event = ActivityEvent::new(kind, session.key, session.state());
    if kind.carries_item() {
        event.with_item(session.item.clone())
    } else {
        event
    }
}

/// Session state machine fed by navigation and player events.
///
/// Stateless about time: every input carries the current instant, and timer
/// expiries are delivered through [`PlayerMonitor::poll`].
#[derive(Debug)]
pub struct PlayerMonitor {
    watch_path_prefix: String,
    stall_limit: Duration,
    pause_grace: Duration,
    progress_interval: Duration,
    sample_limit: usize,
    external_id: Option<u64>,
    media: Option<MediaIdentity>,
    session: Option<Session>,
    next_session_key: u64,
    events: EventRing,
}

impl PlayerMonitor {
    pub fn new(config: &ActivityConfig) -> Self {
        Self {
            watch_path_prefix: config.watch_path_prefix.clone(),
            stall_limit: config.stall_limit,
            pause_grace: config.pause_grace,
            progress_interval: config.progress_interval,
            sample_limit: config.sample_limit,
            external_id: None,
            media: None,
            session: None,
            next_session_key: 0,
            events: EventRing::new(config.event_limit),
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, Session::state)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn external_id(&self) -> Option<u64> {
        self.external_id
    }

    pub fn media(&self) -> Option<&MediaIdentity> {
        self.media.as_ref()
    }

    pub fn events(&self) -> &EventRing {
        &self.events
    }

    /// `{prefix}/{digits}` → the external video id.
    pub fn parse_watch_path(&self, path: &str) -> Option<u64> {
        let id = path
            .strip_prefix(self.watch_path_prefix.as_str())?
            .strip_prefix('/')?;
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        id.parse().ok()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(Session::next_deadline)
    }

    pub fn handle_navigation(&mut self, navigation: &NavigationEvent, now: Instant) -> MonitorOutput {
        let mut out = MonitorOutput::default();
        match navigation {
            NavigationEvent::From(path) => {
                if let Some(mut session) = self.session.take() {
                    info!(
                        session_key = session.key,
                        path,
                        age_ms = session.age(now).as_millis() as u64,
                        "Navigated away, closing session"
                    );
                    close_session(&mut session, &mut out);
                }
                self.external_id = None;
                self.media = None;
            }
            NavigationEvent::To(path) => {
                self.external_id = self.parse_watch_path(path);
                debug!(path, external_id = ?self.external_id, "Navigated");
            }
        }
        self.record(&out);
        out
    }

    /// `duration_ms` is the bound video's current duration, if known.
    pub fn handle_player(&mut self, player: &PlayerEvent, duration_ms: Option<u64>, now: Instant) -> MonitorOutput {
        let mut out = MonitorOutput::default();
        match player {
            PlayerEvent::MediaChanged { current, .. } => {
                debug!(media = ?current, "Media changed");
                self.media = current.clone();
            }
            PlayerEvent::Opened => self.open(now, &mut out),
            PlayerEvent::Closed => {
                if let Some(mut session) = self.session.take() {
                    info!(session_key = session.key, "Player closed");
                    close_session(&mut session, &mut out);
                }
            }
            PlayerEvent::Loading => trace!("Video loading"),
            PlayerEvent::Loaded => {
                if let Some(s) = self.live_session() {
                    if !s.loaded {
                        s.loaded = true;
                        out.emit(s, ActivityEventKind::Loaded);
                    }
                }
            }
            PlayerEvent::Started => {
                if let Some(s) = self.live_session() {
                    s.cancel_timers();
                    let from = s.state();
                    if s.transition(SessionState::Playing) && from != SessionState::Stalled {
                        out.emit(s, ActivityEventKind::Started);
                    }
                }
            }
            PlayerEvent::Paused => {
                let grace = self.pause_grace;
                if let Some(s) = self.live_session() {
                    let pausable = matches!(
                        s.state(),
                        SessionState::Loading | SessionState::Playing | SessionState::Stalled
                    );
                    if pausable && !s.pause_timer.is_pending() {
                        debug!(session_key = s.key, grace_ms = grace.as_millis() as u64, "Holding pause");
                        s.pause_timer.schedule(now, grace);
                    }
                }
            }
            PlayerEvent::Stopped => {
                if let Some(s) = self.live_session() {
                    out.emit(s, ActivityEventKind::Stopped);
                    end_session(s, &mut out);
                }
            }
            PlayerEvent::Progress(time_ms) => self.progress(*time_ms, now, &mut out),
            PlayerEvent::Seeked(time_ms) => {
                if let Some(s) = self.live_session() {
                    s.clear_stall();
                    if s.state() == SessionState::Stalled {
                        s.transition(SessionState::Playing);
                    }
                    s.samples.reset(PlaybackSample {
                        time_ms: *time_ms,
                        at: now,
                    });
                    out.events.push(event(s, ActivityEventKind::Seeked).with_time(*time_ms));
                }
            }
        }
        self.dispatch_pending_fetch(duration_ms, &mut out);
        self.record(&out);
        out
    }

    /// Timer expiries: stall promotion and confirmed pauses.
    pub fn poll(&mut self, now: Instant) -> MonitorOutput {
        let mut out = MonitorOutput::default();
        if let Some(s) = self.live_session() {
            if s.stall_timer.fire(now) && s.state() == SessionState::Stalled {
                debug!(session_key = s.key, "Stall limit reached");
                promote_pause(s, &mut out);
            }
            if s.pause_timer.fire(now) {
                debug!(session_key = s.key, "Pause confirmed");
                promote_pause(s, &mut out);
            }
        }
        self.record(&out);
        out
    }

    /// Apply a metadata result. Results for a session that is no longer
    /// current are discarded. Returns whether the item was enriched.
    pub fn metadata_fetched(
        &mut self,
        session_key: u64,
        result: Result<VideoMetadataResponse, MetadataError>,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        let Some(s) = self.session.as_mut().filter(|s| s.key == session_key) else {
            debug!(session_key, "Discarding metadata for stale session");
            return false;
        };
        match result {
            Ok(response) => match s.item.enrich(&response, fetched_at) {
                Ok(()) => {
                    debug!(session_key, metadata_id = ?s.item.keys.metadata_id, "Item enriched");
                    s.fetch = FetchState::Done;
                    true
                }
                Err(e) => {
                    warn!(session_key, error = %e, "Unable to apply metadata");
                    s.fetch = FetchState::Failed;
                    false
                }
            },
            Err(e) => {
                warn!(session_key, error = %e, "Unable to fetch metadata");
                s.fetch = FetchState::Failed;
                false
            }
        }
    }

    /// Close any open session, e.g. when the service stops.
    pub fn shutdown(&mut self) -> MonitorOutput {
        let mut out = MonitorOutput::default();
        if let Some(mut session) = self.session.take() {
            close_session(&mut session, &mut out);
        }
        self.record(&out);
        out
    }

    fn live_session(&mut self) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| !s.is_ended())
    }

    fn open(&mut self, now: Instant, out: &mut MonitorOutput) {
        let (Some(external_id), Some(identity)) = (self.external_id, self.media.clone()) else {
            info!(
                external_id = ?self.external_id,
                media = ?self.media,
                "Unable to open session, video id or media unknown"
            );
            return;
        };

        if let Some(s) = self.live_session() {
            if s.item.matches(external_id, &identity) {
                trace!(session_key = s.key, "Session already open");
                return;
            }
            if s.item.source_id() == external_id {
                if let Some(item) = Item::from_identity(external_id, identity) {
                    info!(session_key = s.key, item = %item.identity, "Session item replaced");
                    s.item = item;
                    s.fetch = FetchState::NotRequested;
                    out.emit(s, ActivityEventKind::Created);
                }
                return;
            }
        }

        if let Some(mut previous) = self.session.take() {
            info!(
                session_key = previous.key,
                age_ms = previous.age(now).as_millis() as u64,
                "Replacing previous session"
            );
            if previous.is_ended() {
                // Stopped sessions still owe their Closed.
                close_session(&mut previous, out);
            } else {
                end_session(&mut previous, out);
            }
        }

        let Some(item) = Item::from_identity(external_id, identity) else {
            warn!(external_id, "Media is not a movie or episode, not opening a session");
            return;
        };

        self.next_session_key += 1;
        let session = Session::new(self.next_session_key, item, self.sample_limit, now);
        info!(
            session_key = session.key,
            external_id,
            item = %session.item.identity,
            "Session created"
        );
        out.emit(&session, ActivityEventKind::Created);
        out.emit(&session, ActivityEventKind::Opened);
        self.session = Some(session);
    }

    fn progress(&mut self, time_ms: u64, now: Instant, out: &mut MonitorOutput) {
        let stall_limit = self.stall_limit;
        let progress_interval = self.progress_interval;
        let Some(s) = self.live_session() else {
            return;
        };

        let previous = s.samples.last().map(|p| p.time_ms);
        s.samples.push(PlaybackSample { time_ms, at: now });

        if previous.is_some_and(|p| time_ms <= p) {
            match s.state() {
                SessionState::Playing => {
                    debug!(session_key = s.key, time_ms, "Playback stalled");
                    s.transition(SessionState::Stalled);
                    s.stalled_at = Some(now);
                    s.stall_timer.schedule(now, stall_limit);
                }
                SessionState::Stalled => {
                    let expired = s
                        .stalled_at
                        .is_some_and(|since| now.duration_since(since) > stall_limit);
                    if expired {
                        promote_pause(s, out);
                    }
                }
                _ => {}
            }
            return;
        }

        s.cancel_timers();
        let from = s.state();
        if s.transition(SessionState::Playing) && matches!(from, SessionState::Loading | SessionState::Paused) {
            out.emit(s, ActivityEventKind::Started);
        }

        let due = progress_interval.is_zero()
            || s
                .last_progress_at
                .is_none_or(|at| now.duration_since(at) >= progress_interval);
        if due {
            s.last_progress_at = Some(now);
            out.events.push(event(s, ActivityEventKind::Progress).with_time(time_ms));
        }
    }

    fn dispatch_pending_fetch(&mut self, duration_ms: Option<u64>, out: &mut MonitorOutput) {
        let Some(s) = self.live_session() else {
            return;
        };
        if !matches!(s.fetch, FetchState::NotRequested | FetchState::Deferred) {
            return;
        }
        match duration_ms.filter(|d| *d > 0) {
            Some(duration) => {
                s.item.observe_duration(duration);
                s.fetch = FetchState::Dispatched;
                debug!(session_key = s.key, external_id = s.item.source_id(), "Requesting metadata");
                out.fetches.push(FetchRequest {
                    session_key: s.key,
                    external_id: s.item.source_id(),
                });
            }
            None if s.fetch == FetchState::NotRequested => {
                debug!(session_key = s.key, "Deferring metadata fetch, video duration unknown");
                s.fetch = FetchState::Deferred;
            }
            None => {}
        }
    }

    fn record(&mut self, out: &MonitorOutput) {
        for event in &out.events {
            self.events.push(event.clone());
        }
    }
}

fn promote_pause(s: &mut Session, out: &mut MonitorOutput) {
    s.cancel_timers();
    if s.transition(SessionState::Paused) {
        info!(session_key = s.key, "Playback paused");
        out.emit(s, ActivityEventKind::Paused);
    }
}

fn end_session(s: &mut Session, out: &mut MonitorOutput) {
    if s.is_ended() {
        return;
    }
    s.cancel_timers();
    s.transition(SessionState::Ended);
    info!(session_key = s.key, "Session ended");
    out.emit(s, ActivityEventKind::Ended);
}

fn close_session(s: &mut Session, out: &mut MonitorOutput) {
    out.emit(s, ActivityEventKind::Closed);
    end_session(s, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DURATION: Option<u64> = Some(2_820_000);

    fn monitor() -> PlayerMonitor {
        PlayerMonitor::new(&ActivityConfig::default())
    }

    fn kinds(out: &MonitorOutput) -> Vec<ActivityEventKind> {
        out.events.iter().map(|e| e.kind).collect()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Navigate to `/watch/{id}`, commit `identity` and open a playing session.
    fn playing(monitor: &mut PlayerMonitor, id: u64, identity: MediaIdentity, t0: Instant) {
        monitor.handle_navigation(&NavigationEvent::To(format!("/watch/{id}")), t0);
        monitor.handle_player(
            &PlayerEvent::MediaChanged {
                previous: None,
                current: Some(identity),
            },
            None,
            t0,
        );
        monitor.handle_player(&PlayerEvent::Opened, DURATION, t0);
        monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0);
    }

    #[test]
    fn parses_watch_paths() {
        let monitor = monitor();
        assert_eq!(monitor.parse_watch_path("/watch/70136120"), Some(70136120));
        assert_eq!(monitor.parse_watch_path("/watch/"), None);
        assert_eq!(monitor.parse_watch_path("/watch/12a"), None);
        assert_eq!(monitor.parse_watch_path("/watch/1/extra"), None);
        assert_eq!(monitor.parse_watch_path("/browse"), None);
        assert_eq!(monitor.parse_watch_path("/watching/1"), None);
    }

    #[test]
    fn open_requires_id_and_media() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        let out = monitor.handle_player(&PlayerEvent::Opened, DURATION, t0);
        assert!(out.is_empty());
        assert_eq!(monitor.state(), SessionState::Idle);
    }

    #[test]
    fn open_emits_created_then_opened_and_requests_metadata() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        monitor.handle_navigation(&NavigationEvent::To("/watch/80014749".into()), t0);
        monitor.handle_player(
            &PlayerEvent::MediaChanged {
                previous: None,
                current: Some(MediaIdentity::movie("Arrival")),
            },
            None,
            t0,
        );
        let out = monitor.handle_player(&PlayerEvent::Opened, DURATION, t0);
        assert_eq!(kinds(&out), vec![ActivityEventKind::Created, ActivityEventKind::Opened]);
        assert_eq!(out.fetches.len(), 1);
        assert_eq!(out.fetches[0].external_id, 80014749);
        assert_eq!(monitor.state(), SessionState::Loading);

        let again = monitor.handle_player(&PlayerEvent::Opened, DURATION, t0);
        assert!(again.is_empty());
    }

    #[test]
    fn fetch_is_deferred_until_duration_is_known() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        monitor.handle_navigation(&NavigationEvent::To("/watch/1".into()), t0);
        monitor.handle_player(
            &PlayerEvent::MediaChanged {
                previous: None,
                current: Some(MediaIdentity::movie("Arrival")),
            },
            None,
            t0,
        );
        let out = monitor.handle_player(&PlayerEvent::Opened, None, t0);
        assert!(out.fetches.is_empty());
        assert_eq!(monitor.session().unwrap().fetch_state(), FetchState::Deferred);

        let out = monitor.handle_player(&PlayerEvent::Loaded, Some(0), t0);
        assert!(out.fetches.is_empty());
        let out = monitor.handle_player(&PlayerEvent::Progress(500), Some(6_960_000), t0);
        assert_eq!(out.fetches.len(), 1);
        assert_eq!(monitor.session().unwrap().item.duration_ms, Some(6_960_000));
        let out = monitor.handle_player(&PlayerEvent::Progress(900), Some(6_960_000), t0);
        assert!(out.fetches.is_empty());
    }

    #[test]
    fn loaded_is_emitted_once() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);
        let first = monitor.handle_player(&PlayerEvent::Loaded, DURATION, t0);
        let second = monitor.handle_player(&PlayerEvent::Loaded, DURATION, t0);
        assert_eq!(kinds(&first), vec![ActivityEventKind::Loaded]);
        assert!(second.events.is_empty());
    }

    #[test]
    fn first_advancing_sample_starts_playback() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        monitor.handle_navigation(&NavigationEvent::To("/watch/1".into()), t0);
        monitor.handle_player(
            &PlayerEvent::MediaChanged {
                previous: None,
                current: Some(MediaIdentity::movie("Arrival")),
            },
            None,
            t0,
        );
        monitor.handle_player(&PlayerEvent::Opened, DURATION, t0);
        let out = monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0);
        assert_eq!(kinds(&out), vec![ActivityEventKind::Started, ActivityEventKind::Progress]);
        assert_eq!(out.events[1].time_ms, Some(1_000));
        assert_eq!(monitor.state(), SessionState::Playing);
    }

    #[test]
    fn stalled_progress_becomes_pause_once() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);

        let out = monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0 + secs(1));
        assert!(out.events.is_empty());
        assert_eq!(monitor.state(), SessionState::Stalled);

        let out = monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0 + secs(4));
        assert!(out.events.is_empty());

        let out = monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0 + secs(7));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Paused]);
        let out = monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0 + secs(9));
        assert!(out.events.is_empty());
        assert_eq!(monitor.state(), SessionState::Paused);

        let out = monitor.handle_player(&PlayerEvent::Progress(2_000), DURATION, t0 + secs(10));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Started, ActivityEventKind::Progress]);
        assert_eq!(monitor.state(), SessionState::Playing);
    }

    #[test]
    fn stall_timer_promotes_without_samples() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);
        monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0 + secs(1));
        assert_eq!(monitor.next_deadline(), Some(t0 + secs(6)));

        assert!(monitor.poll(t0 + secs(5)).events.is_empty());
        let out = monitor.poll(t0 + secs(6));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Paused]);
        assert_eq!(monitor.next_deadline(), None);
    }

    #[test]
    fn stall_recovers_silently() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);
        monitor.handle_player(&PlayerEvent::Progress(1_000), DURATION, t0 + secs(1));
        let out = monitor.handle_player(&PlayerEvent::Progress(1_500), DURATION, t0 + secs(2));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Progress]);
        assert_eq!(monitor.state(), SessionState::Playing);
        assert!(monitor.poll(t0 + secs(10)).events.is_empty());
    }

    #[test]
    fn native_pause_is_held_for_grace_window() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);

        let out = monitor.handle_player(&PlayerEvent::Paused, DURATION, t0 + secs(1));
        assert!(out.events.is_empty());
        assert_eq!(monitor.state(), SessionState::Playing);
        assert!(monitor.poll(t0 + secs(8)).events.is_empty());

        let out = monitor.poll(t0 + secs(9));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Paused]);
        assert_eq!(monitor.state(), SessionState::Paused);
    }

    #[test]
    fn playback_inside_grace_window_cancels_pause() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);

        monitor.handle_player(&PlayerEvent::Paused, DURATION, t0 + secs(1));
        monitor.handle_player(&PlayerEvent::Progress(3_000), DURATION, t0 + secs(3));
        assert!(monitor.poll(t0 + secs(20)).events.is_empty());
        assert_eq!(monitor.state(), SessionState::Playing);

        monitor.handle_player(&PlayerEvent::Paused, DURATION, t0 + secs(21));
        let out = monitor.handle_player(&PlayerEvent::Started, DURATION, t0 + secs(22));
        assert!(out.events.is_empty());
        assert!(monitor.poll(t0 + secs(40)).events.is_empty());
    }

    #[test]
    fn seek_restarts_sample_window() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);
        monitor.handle_player(&PlayerEvent::Progress(60_000), DURATION, t0 + secs(1));

        let out = monitor.handle_player(&PlayerEvent::Seeked(10_000), DURATION, t0 + secs(2));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Seeked]);
        assert_eq!(out.events[0].time_ms, Some(10_000));

        let out = monitor.handle_player(&PlayerEvent::Progress(10_500), DURATION, t0 + secs(3));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Progress]);
        assert_eq!(monitor.state(), SessionState::Playing);
    }

    #[test]
    fn stop_then_close_ends_once() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);

        let out = monitor.handle_player(&PlayerEvent::Stopped, DURATION, t0 + secs(1));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Stopped, ActivityEventKind::Ended]);
        assert!(monitor
            .handle_player(&PlayerEvent::Progress(9_000), DURATION, t0 + secs(2))
            .events
            .is_empty());

        let out = monitor.handle_player(&PlayerEvent::Closed, DURATION, t0 + secs(3));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Closed]);
        assert!(monitor.session().is_none());
    }

    #[test]
    fn navigating_away_closes_session() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 111, MediaIdentity::movie("Arrival"), t0);

        let out = monitor.handle_navigation(&NavigationEvent::From("/watch/111".into()), t0);
        assert_eq!(kinds(&out), vec![ActivityEventKind::Closed, ActivityEventKind::Ended]);
        assert_eq!(monitor.external_id(), None);
        assert_eq!(monitor.media(), None);
        assert_eq!(monitor.state(), SessionState::Idle);
    }

    #[test]
    fn different_video_forces_previous_session_to_end() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 111, MediaIdentity::movie("Arrival"), t0);
        let first_key = monitor.session().unwrap().key;

        monitor.handle_navigation(&NavigationEvent::To("/watch/222".into()), t0);
        monitor.handle_player(
            &PlayerEvent::MediaChanged {
                previous: None,
                current: Some(MediaIdentity::movie("Dune")),
            },
            None,
            t0,
        );
        let out = monitor.handle_player(&PlayerEvent::Opened, DURATION, t0);
        assert_eq!(
            kinds(&out),
            vec![ActivityEventKind::Ended, ActivityEventKind::Created, ActivityEventKind::Opened]
        );
        assert_eq!(out.events[0].session_key, first_key);
        assert_ne!(out.events[1].session_key, first_key);
    }

    #[test]
    fn stopped_session_is_closed_when_replaced() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 111, MediaIdentity::movie("Arrival"), t0);
        let first_key = monitor.session().unwrap().key;
        monitor.handle_player(&PlayerEvent::Stopped, DURATION, t0 + secs(1));

        monitor.handle_navigation(&NavigationEvent::To("/watch/222".into()), t0 + secs(2));
        monitor.handle_player(
            &PlayerEvent::MediaChanged {
                previous: None,
                current: Some(MediaIdentity::movie("Dune")),
            },
            None,
            t0 + secs(2),
        );
        let out = monitor.handle_player(&PlayerEvent::Opened, DURATION, t0 + secs(2));
        assert_eq!(
            kinds(&out),
            vec![ActivityEventKind::Closed, ActivityEventKind::Created, ActivityEventKind::Opened]
        );
        assert_eq!(out.events[0].session_key, first_key);
        assert_eq!(out.events[0].item.as_ref().unwrap().title.as_deref(), Some("Arrival"));
        assert_ne!(out.events[1].session_key, first_key);
    }

    #[test]
    fn same_video_new_identity_replaces_item() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::episode("Dark", 1, 1), t0);
        let key = monitor.session().unwrap().key;

        monitor.handle_player(
            &PlayerEvent::MediaChanged {
                previous: None,
                current: Some(MediaIdentity::episode("Dark", 1, 2)),
            },
            None,
            t0,
        );
        let out = monitor.handle_player(&PlayerEvent::Opened, DURATION, t0);
        assert_eq!(kinds(&out), vec![ActivityEventKind::Created]);
        assert_eq!(out.events[0].session_key, key);
        assert_eq!(out.fetches.len(), 1);
        assert_eq!(monitor.session().unwrap().item.number, Some(2));
    }

    #[test]
    fn metadata_enriches_current_session_only() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 80014749, MediaIdentity::movie("Arrival"), t0);
        let key = monitor.session().unwrap().key;
        let response: VideoMetadataResponse = serde_json::from_value(json!({
            "video": { "type": "movie", "id": 80014749, "title": "Arrival", "year": 2016, "runtime": 6960 }
        }))
        .unwrap();

        assert!(!monitor.metadata_fetched(key + 1, Ok(response.clone()), Utc::now()));
        assert!(monitor.metadata_fetched(key, Ok(response), Utc::now()));
        let session = monitor.session().unwrap();
        assert_eq!(session.item.year, Some(2016));
        assert_eq!(session.fetch_state(), FetchState::Done);
    }

    #[test]
    fn metadata_failure_keeps_local_item() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);
        let key = monitor.session().unwrap().key;
        let before = monitor.session().unwrap().item.clone();

        let err = MetadataError::RequestFailed { id: 1, status: 500 };
        assert!(!monitor.metadata_fetched(key, Err(err), Utc::now()));
        assert_eq!(monitor.session().unwrap().item, before);
        assert_eq!(monitor.session().unwrap().fetch_state(), FetchState::Failed);
    }

    #[test]
    fn progress_interval_throttles_emission() {
        let config = ActivityConfig::default().with_progress_interval(5_000);
        let mut monitor = PlayerMonitor::new(&config);
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);

        let out = monitor.handle_player(&PlayerEvent::Progress(2_000), DURATION, t0 + secs(1));
        assert!(out.events.is_empty());
        let out = monitor.handle_player(&PlayerEvent::Progress(6_000), DURATION, t0 + secs(5));
        assert_eq!(kinds(&out), vec![ActivityEventKind::Progress]);
    }

    #[test]
    fn events_are_recorded_in_ring() {
        let mut monitor = monitor();
        let t0 = Instant::now();
        playing(&mut monitor, 1, MediaIdentity::movie("Arrival"), t0);
        let kinds: Vec<_> = monitor
            .events()
            .list_chronological()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ActivityEventKind::Created,
                ActivityEventKind::Opened,
                ActivityEventKind::Started,
                ActivityEventKind::Progress,
            ]
        );
        assert!(monitor.shutdown().events.len() == 2);
    }
}
