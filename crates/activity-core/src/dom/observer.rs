use tracing::trace;

use super::document::{Document, MutationRecord, NodeId};
use super::selector::{Selector, SelectorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationId(usize);

/// What an observation matches under: a fixed node, or every node another
/// observation currently matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveRoot {
    Node(NodeId),
    Observation(ObservationId),
}

impl From<NodeId> for ObserveRoot {
    fn from(node: NodeId) -> Self {
        Self::Node(node)
    }
}

impl From<ObservationId> for ObserveRoot {
    fn from(id: ObservationId) -> Self {
        Self::Observation(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Report text changes of matched nodes as [`ObservationEvent::Mutation`].
    pub text: bool,
}

impl ObserveOptions {
    pub fn text() -> Self {
        Self { text: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationEvent {
    Added {
        observation: ObservationId,
        node: NodeId,
    },
    Removed {
        observation: ObservationId,
        node: NodeId,
    },
    Mutation {
        observation: ObservationId,
        nodes: Vec<NodeId>,
    },
}

impl ObservationEvent {
    pub fn observation(&self) -> ObservationId {
        match self {
            Self::Added { observation, .. }
            | Self::Removed { observation, .. }
            | Self::Mutation { observation, .. } => *observation,
        }
    }
}

#[derive(Debug)]
struct Observation {
    root: ObserveRoot,
    selector: Selector,
    options: ObserveOptions,
    matched: Vec<NodeId>,
    text: Vec<String>,
    active: bool,
}

/// Reactive selector matching over a [`Document`].
///
/// Every observation keeps its own match set. [`DocumentObserver::refresh`]
/// re-evaluates them in creation order, so a chained observation always sees
/// its parent's up-to-date matches within the same pass.
#[derive(Debug, Default)]
pub struct DocumentObserver {
    observations: Vec<Observation>,
}

impl DocumentObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        root: impl Into<ObserveRoot>,
        selector: &str,
        options: ObserveOptions,
    ) -> Result<ObservationId, SelectorError> {
        let selector = Selector::parse(selector)?;
        let id = ObservationId(self.observations.len());
        trace!(?id, selector = %selector, "Observing");
        self.observations.push(Observation {
            root: root.into(),
            selector,
            options,
            matched: Vec::new(),
            text: Vec::new(),
            active: true,
        });
        Ok(id)
    }

    /// Refresh only when the batch carries at least one record.
    pub fn process(&mut self, doc: &Document, records: &[MutationRecord]) -> Vec<ObservationEvent> {
        if records.is_empty() {
            return Vec::new();
        }
        self.refresh(doc)
    }

    pub fn refresh(&mut self, doc: &Document) -> Vec<ObservationEvent> {
        let mut events = Vec::new();

        for idx in 0..self.observations.len() {
            if !self.observations[idx].active {
                continue;
            }
            let roots = match self.observations[idx].root {
                ObserveRoot::Node(node) if doc.is_connected(node) => vec![node],
                ObserveRoot::Node(_) => Vec::new(),
                ObserveRoot::Observation(parent) => self
                    .observations
                    .get(parent.0)
                    .filter(|p| p.active)
                    .map(|p| p.matched.clone())
                    .unwrap_or_default(),
            };

            let observation = &mut self.observations[idx];
            let id = ObservationId(idx);
            let mut matched: Vec<NodeId> = Vec::new();
            for root in roots {
                for node in doc.query_selector_all(root, &observation.selector) {
                    if !matched.contains(&node) {
                        matched.push(node);
                    }
                }
            }

            for node in observation.matched.iter().filter(|n| !matched.contains(n)) {
                events.push(ObservationEvent::Removed {
                    observation: id,
                    node: *node,
                });
            }
            for node in matched.iter().filter(|n| !observation.matched.contains(n)) {
                events.push(ObservationEvent::Added {
                    observation: id,
                    node: *node,
                });
            }

            if observation.options.text {
                let text: Vec<String> = matched.iter().map(|n| doc.text_content(*n)).collect();
                if text != observation.text {
                    events.push(ObservationEvent::Mutation {
                        observation: id,
                        nodes: matched.clone(),
                    });
                    observation.text = text;
                }
            }
            observation.matched = matched;
        }

        events
    }

    pub fn first(&self, id: ObservationId) -> Option<NodeId> {
        self.all(id).first().copied()
    }

    pub fn all(&self, id: ObservationId) -> &[NodeId] {
        self.observations
            .get(id.0)
            .filter(|o| o.active)
            .map_or(&[], |o| o.matched.as_slice())
    }

    pub fn disconnect(&mut self, id: ObservationId) -> bool {
        let Some(observation) = self.observations.get_mut(id.0) else {
            return false;
        };
        let was_active = observation.active;
        observation.active = false;
        observation.matched.clear();
        observation.text.clear();
        was_active
    }

    pub fn disconnect_all(&mut self) {
        self.observations.clear();
    }

    pub fn active_count(&self) -> usize {
        self.observations.iter().filter(|o| o.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(doc: &mut Document, parent: NodeId, tag: &str, class: &str) -> NodeId {
        let node = doc.create_element(tag);
        if !class.is_empty() {
            doc.add_class(node, class);
        }
        doc.append_child(parent, node);
        node
    }

    #[test]
    fn reports_existing_matches_on_first_refresh() {
        let mut doc = Document::new();
        let body = doc.body();
        let panel = child(&mut doc, body, "div", "panel");
        let mut observer = DocumentObserver::new();
        let id = observer.observe(body, ".panel", ObserveOptions::default()).unwrap();

        let events = observer.refresh(&doc);
        assert_eq!(events, vec![ObservationEvent::Added { observation: id, node: panel }]);
        assert!(observer.refresh(&doc).is_empty());
    }

    #[test]
    fn chained_observation_follows_parent_matches() {
        let mut doc = Document::new();
        let body = doc.body();
        let mut observer = DocumentObserver::new();
        let players = observer.observe(body, ".player", ObserveOptions::default()).unwrap();
        let videos = observer.observe(players, "video", ObserveOptions::default()).unwrap();
        assert!(observer.refresh(&doc).is_empty());

        let player = child(&mut doc, body, "div", "player");
        let video = child(&mut doc, player, "video", "");
        let events = observer.refresh(&doc);
        assert_eq!(
            events,
            vec![
                ObservationEvent::Added { observation: players, node: player },
                ObservationEvent::Added { observation: videos, node: video },
            ]
        );

        doc.remove(player);
        let events = observer.refresh(&doc);
        assert_eq!(
            events,
            vec![
                ObservationEvent::Removed { observation: players, node: player },
                ObservationEvent::Removed { observation: videos, node: video },
            ]
        );
    }

    #[test]
    fn text_mode_reports_snapshot_changes() {
        let mut doc = Document::new();
        let body = doc.body();
        let mut observer = DocumentObserver::new();
        let titles = observer.observe(body, "h4", ObserveOptions::text()).unwrap();

        let h4 = child(&mut doc, body, "h4", "");
        doc.set_text(h4, "Arrival");
        let events = observer.refresh(&doc);
        assert!(events.contains(&ObservationEvent::Mutation { observation: titles, nodes: vec![h4] }));

        doc.set_text(h4, "Arrival");
        assert!(observer.refresh(&doc).is_empty());

        doc.set_text(h4, "Dune");
        assert_eq!(
            observer.refresh(&doc),
            vec![ObservationEvent::Mutation { observation: titles, nodes: vec![h4] }]
        );
    }

    #[test]
    fn overlapping_observations_fire_independently() {
        let mut doc = Document::new();
        let body = doc.body();
        let mut observer = DocumentObserver::new();
        let a = observer.observe(body, "span", ObserveOptions::default()).unwrap();
        let b = observer.observe(body, "div span", ObserveOptions::default()).unwrap();
        let div = child(&mut doc, body, "div", "");
        let span = child(&mut doc, div, "span", "");

        let events = observer.refresh(&doc);
        assert_eq!(events.iter().filter(|e| e.observation() == a).count(), 1);
        assert_eq!(events.iter().filter(|e| e.observation() == b).count(), 1);
        assert_eq!(observer.all(a), &[span]);
    }

    #[test]
    fn missing_root_matches_nothing() {
        let mut doc = Document::new();
        let detached = doc.create_element("div");
        child(&mut doc, detached, "video", "");
        let mut observer = DocumentObserver::new();
        let id = observer.observe(detached, "video", ObserveOptions::default()).unwrap();
        assert!(observer.refresh(&doc).is_empty());
        assert_eq!(observer.first(id), None);
    }

    #[test]
    fn disconnect_stops_reporting() {
        let mut doc = Document::new();
        let body = doc.body();
        let mut observer = DocumentObserver::new();
        let id = observer.observe(body, "video", ObserveOptions::default()).unwrap();
        assert!(observer.disconnect(id));
        assert!(!observer.disconnect(id));
        child(&mut doc, body, "video", "");
        assert!(observer.refresh(&doc).is_empty());
        assert_eq!(observer.active_count(), 0);
        assert!(observer.observe(body, "video[", ObserveOptions::default()).is_err());
    }

    #[test]
    fn process_ignores_empty_batches() {
        let mut doc = Document::new();
        let body = doc.body();
        child(&mut doc, body, "video", "");
        let mut observer = DocumentObserver::new();
        observer.observe(body, "video", ObserveOptions::default()).unwrap();
        assert!(observer.process(&doc, &[]).is_empty());
        let records = doc.take_records();
        assert_eq!(observer.process(&doc, &records).len(), 1);
    }
}
