use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::item::Item;
use crate::timer::{self, Timer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Playing,
    Paused,
    Stalled,
    Ended,
}

impl SessionState {
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, Loading)
                | (Loading, Playing | Paused | Ended)
                | (Playing, Paused | Stalled | Ended)
                | (Paused, Playing | Ended)
                | (Stalled, Playing | Paused | Ended)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Stalled => write!(f, "stalled"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSample {
    pub time_ms: u64,
    pub at: Instant,
}

/// Most recent playback positions, oldest evicted first.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<PlaybackSample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: PlaybackSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Start over from a single sample, e.g. after a seek.
    pub fn reset(&mut self, sample: PlaybackSample) {
        self.samples.clear();
        self.samples.push_back(sample);
    }

    pub fn last(&self) -> Option<&PlaybackSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    NotRequested,
    /// Waiting for the video duration before requesting metadata.
    Deferred,
    Dispatched,
    Done,
    Failed,
}

/// One viewing of one item, from open to end.
#[derive(Debug)]
pub struct Session {
    pub key: u64,
    pub item: Item,
    pub created_at: Instant,
    state: SessionState,
    pub(crate) samples: SampleWindow,
    pub(crate) stalled_at: Option<Instant>,
    pub(crate) stall_timer: Timer,
    pub(crate) pause_timer: Timer,
    pub(crate) loaded: bool,
    pub(crate) fetch: FetchState,
    pub(crate) last_progress_at: Option<Instant>,
}

impl Session {
    pub fn new(key: u64, item: Item, sample_limit: usize, now: Instant) -> Self {
        Self {
            key,
            item,
            created_at: now,
            state: SessionState::Loading,
            samples: SampleWindow::new(sample_limit),
            stalled_at: None,
            stall_timer: Timer::new(),
            pause_timer: Timer::new(),
            loaded: false,
            fetch: FetchState::NotRequested,
            last_progress_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Time since the session was created.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn is_ended(&self) -> bool {
        self.state == SessionState::Ended
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetch
    }

    pub fn samples(&self) -> &SampleWindow {
        &self.samples
    }

    /// Move to `target`. Returns `false` for self-transitions and for moves
    /// the transition table rejects.
    pub fn transition(&mut self, target: SessionState) -> bool {
        if self.state == target {
            return false;
        }
        if !self.state.can_transition_to(target) {
            warn!(session_key = self.key, from = %self.state, to = %target, "Rejected session transition");
            return false;
        }
        debug!(session_key = self.key, from = %self.state, to = %target, "Session transition");
        self.state = target;
        true
    }

    pub(crate) fn clear_stall(&mut self) {
        self.stalled_at = None;
        self.stall_timer.cancel();
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.clear_stall();
        self.pause_timer.cancel();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([self.stall_timer.deadline(), self.pause_timer.deadline()])
    }
}
