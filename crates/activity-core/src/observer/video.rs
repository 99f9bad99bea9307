use tracing::{debug, trace};

use crate::dom::{Document, ListenerId, MediaEventKind, NodeId};

/// Telemetry derived from the bound `<video>` element's native events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEvent {
    Loading,
    Loaded,
    Started,
    Paused,
    Stopped,
    Progress(u64),
    Seeked(u64),
}

/// Binds to at most one `<video>` element and translates its events.
#[derive(Debug, Default)]
pub struct VideoElementObserver {
    node: Option<NodeId>,
    listeners: Vec<ListenerId>,
    loaded: bool,
}

impl VideoElementObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Bind to `node`, unbinding any other element first. Binding the element
    /// already observed is a no-op.
    pub fn start(&mut self, doc: &mut Document, node: NodeId) -> Vec<VideoEvent> {
        if self.node == Some(node) {
            trace!(%node, "Already observing video");
            return Vec::new();
        }
        if self.node.is_some() {
            self.stop(doc, None);
        }

        debug!(%node, "Observing video");
        self.node = Some(node);
        self.loaded = false;
        self.listeners = MediaEventKind::ALL
            .iter()
            .map(|kind| doc.add_event_listener(node, *kind))
            .collect();

        let mut events = vec![VideoEvent::Loading];
        if doc.media(node).is_some_and(|m| m.ready_state >= 2) {
            events.extend(self.load());
        }
        events
    }

    /// Unbind. With `Some(node)`, only when that node is the one bound.
    pub fn stop(&mut self, doc: &mut Document, node: Option<NodeId>) -> bool {
        let Some(current) = self.node else {
            return false;
        };
        if node.is_some_and(|n| n != current) {
            return false;
        }

        for listener in self.listeners.drain(..) {
            doc.remove_event_listener(current, listener);
        }
        self.node = None;
        self.loaded = false;
        debug!(node = %current, "Stopped observing video");
        true
    }

    /// Translate a native event fired on `node`.
    pub fn handle(&mut self, doc: &Document, node: NodeId, kind: MediaEventKind) -> Option<VideoEvent> {
        if self.node != Some(node) {
            return None;
        }
        match kind {
            MediaEventKind::LoadStart => Some(VideoEvent::Loading),
            MediaEventKind::LoadedMetadata => self.load(),
            MediaEventKind::Playing => Some(VideoEvent::Started),
            MediaEventKind::Pause => Some(VideoEvent::Paused),
            MediaEventKind::Ended => Some(VideoEvent::Stopped),
            MediaEventKind::Seeked => self.time_ms(doc).map(VideoEvent::Seeked),
            MediaEventKind::TimeUpdate => match self.load() {
                Some(loaded) => Some(loaded),
                None => self.time_ms(doc).map(VideoEvent::Progress),
            },
        }
    }

    /// Duration of the bound element. Unknown until metadata has loaded.
    pub fn duration_ms(&self, doc: &Document) -> Option<u64> {
        self.node
            .and_then(|node| doc.media(node))
            .and_then(|m| seconds_to_ms(m.duration))
    }

    /// Playback position. Zero is reported by the page before playback starts
    /// and is treated as unknown.
    pub fn time_ms(&self, doc: &Document) -> Option<u64> {
        self.node
            .and_then(|node| doc.media(node))
            .and_then(|m| seconds_to_ms(m.current_time))
    }

    fn load(&mut self) -> Option<VideoEvent> {
        if self.loaded {
            return None;
        }
        self.loaded = true;
        Some(VideoEvent::Loaded)
    }
}

fn seconds_to_ms(seconds: f64) -> Option<u64> {
    (seconds.is_finite() && seconds > 0.0).then(|| (seconds * 1000.0).round() as u64)
}
