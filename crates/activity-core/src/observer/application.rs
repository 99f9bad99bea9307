use tracing::{debug, trace};

use crate::dom::{Document, MutationRecord, NodeId, Selector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    From(String),
    To(String),
}

impl NavigationEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::From(path) | Self::To(path) => path,
        }
    }
}

/// Tracks the single-page application's mount point and route.
#[derive(Debug, Default)]
pub struct ApplicationObserver {
    mount: Option<NodeId>,
    current_path: Option<String>,
}

impl ApplicationObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// One lookup attempt for the mount point; retries are the caller's concern.
    pub fn locate_mount(doc: &Document, selector: &Selector) -> Option<NodeId> {
        doc.query_document(selector).into_iter().next()
    }

    pub fn bind(&mut self, mount: NodeId) {
        debug!(%mount, "Observing application mount point");
        self.mount = Some(mount);
    }

    pub fn mount(&self) -> Option<NodeId> {
        self.mount
    }

    pub fn current_path(&self) -> Option<&str> {
        self.current_path.as_deref()
    }

    /// Whether the batch inserted anything inside the mount subtree.
    pub fn handles(&self, doc: &Document, records: &[MutationRecord]) -> bool {
        let Some(mount) = self.mount else {
            return false;
        };
        records
            .iter()
            .any(|r| !r.added().is_empty() && doc.contains(mount, r.target()))
    }

    /// Compare the document location with the last seen path.
    pub fn on_navigated(&mut self, doc: &Document) -> Vec<NavigationEvent> {
        let path = doc.location();
        if self.current_path.as_deref() == Some(path) {
            trace!(path, "Path unchanged");
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(previous) = self.current_path.take() {
            debug!(path = %previous, "Navigating away");
            events.push(NavigationEvent::From(previous));
        }
        debug!(path, "Navigated");
        self.current_path = Some(path.to_string());
        events.push(NavigationEvent::To(path.to_string()));
        events
    }
}
