use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::selector::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Native media element events the observers listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaEventKind {
    LoadStart,
    LoadedMetadata,
    Playing,
    Pause,
    Ended,
    Seeked,
    TimeUpdate,
}

impl MediaEventKind {
    pub const ALL: [MediaEventKind; 7] = [
        Self::LoadStart,
        Self::LoadedMetadata,
        Self::Playing,
        Self::Pause,
        Self::Ended,
        Self::Seeked,
        Self::TimeUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadStart => "loadstart",
            Self::LoadedMetadata => "loadedmetadata",
            Self::Playing => "playing",
            Self::Pause => "pause",
            Self::Ended => "ended",
            Self::Seeked => "seeked",
            Self::TimeUpdate => "timeupdate",
        }
    }
}

impl fmt::Display for MediaEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback properties of a `<video>` element, in seconds like the platform exposes them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaProperties {
    pub current_time: f64,
    pub duration: f64,
    pub ready_state: u8,
}

/// A batched structural or text change, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    CharacterData {
        target: NodeId,
    },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            Self::ChildList { target, .. } | Self::CharacterData { target } => *target,
        }
    }

    pub fn added(&self) -> &[NodeId] {
        match self {
            Self::ChildList { added, .. } => added,
            Self::CharacterData { .. } => &[],
        }
    }

    pub fn removed(&self) -> &[NodeId] {
        match self {
            Self::ChildList { removed, .. } => removed,
            Self::CharacterData { .. } => &[],
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    media: Option<MediaProperties>,
}

/// Arena-backed document tree standing in for the host page.
///
/// Nodes are never freed; removal only detaches them, so a `NodeId` stays valid
/// for the document's lifetime. Structural and text changes made to connected
/// nodes are queued as [`MutationRecord`]s until [`Document::take_records`].
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    body: NodeId,
    location: String,
    records: Vec<MutationRecord>,
    listeners: HashMap<NodeId, Vec<(ListenerId, MediaEventKind)>>,
    next_listener: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let body = Node {
            tag: "body".into(),
            id: None,
            classes: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            media: None,
        };
        Self {
            nodes: vec![body],
            body: NodeId(0),
            location: "/".into(),
            records: Vec::new(),
            listeners: HashMap::new(),
            next_listener: 0,
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Current route path (`location.pathname`).
    pub fn location(&self) -> &str {
        &self.location
    }

    /// History navigation. Like `pushState`, this does not produce mutation records.
    pub fn set_location(&mut self, path: impl Into<String>) {
        self.location = path.into();
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let tag = tag.to_ascii_lowercase();
        let media = (tag == "video").then(MediaProperties::default);
        self.nodes.push(Node {
            tag,
            id: None,
            classes: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            media,
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn set_element_id(&mut self, node: NodeId, id: impl Into<String>) {
        self.nodes[node.0].id = Some(id.into());
    }

    pub fn add_class(&mut self, node: NodeId, class: impl Into<String>) {
        let class = class.into();
        let classes = &mut self.nodes[node.0].classes;
        if !classes.contains(&class) {
            classes.push(class);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if self.nodes[child.0].parent.is_some() {
            self.remove(child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        if self.is_connected(parent) {
            self.records.push(MutationRecord::ChildList {
                target: parent,
                added: vec![child],
                removed: Vec::new(),
            });
        }
    }

    /// Detach `node` from its parent. Returns `false` if it had no parent.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let Some(parent) = self.nodes[node.0].parent else {
            return false;
        };
        let connected = self.is_connected(parent);
        self.nodes[parent.0].children.retain(|c| *c != node);
        self.nodes[node.0].parent = None;
        if connected {
            self.records.push(MutationRecord::ChildList {
                target: parent,
                added: Vec::new(),
                removed: vec![node],
            });
        }
        true
    }

    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) {
        let text = text.into();
        if self.nodes[node.0].text == text {
            return;
        }
        self.nodes[node.0].text = text;
        if self.is_connected(node) {
            self.records.push(MutationRecord::CharacterData { target: node });
        }
    }

    pub fn tag(&self, node: NodeId) -> &str {
        &self.nodes[node.0].tag
    }

    pub fn element_id(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].id.as_deref()
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.nodes[node.0].classes.iter().any(|c| c == class)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// Concatenated text of the node and its descendants.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = self.nodes[node.0].text.clone();
        for child in self.descendants(node) {
            out.push_str(&self.nodes[child.0].text);
        }
        out
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.body, node)
    }

    /// Inclusive ancestry check.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.nodes[n.0].parent;
        }
        false
    }

    /// Descendants of `root` in document order, excluding `root`.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[root.0].children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.nodes[node.0].children.iter().rev().copied());
        }
        out
    }

    /// `root.querySelectorAll(selector)`: descendants of `root` matching the selector.
    /// Ancestors above `root` still take part in combinator matching.
    pub fn query_selector_all(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|n| selector.matches(self, *n))
            .collect()
    }

    pub fn query_selector(&self, root: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|n| selector.matches(self, *n))
    }

    /// Document-wide lookup, including `<body>` itself.
    pub fn query_document(&self, selector: &Selector) -> Vec<NodeId> {
        let mut out = Vec::new();
        if selector.matches(self, self.body) {
            out.push(self.body);
        }
        out.extend(self.query_selector_all(self.body, selector));
        out
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn has_pending_records(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn media(&self, node: NodeId) -> Option<&MediaProperties> {
        self.nodes[node.0].media.as_ref()
    }

    pub fn media_mut(&mut self, node: NodeId) -> Option<&mut MediaProperties> {
        self.nodes[node.0].media.as_mut()
    }

    pub fn add_event_listener(&mut self, node: NodeId, kind: MediaEventKind) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.entry(node).or_default().push((id, kind));
        id
    }

    pub fn remove_event_listener(&mut self, node: NodeId, listener: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(&node) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != listener);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.listeners.remove(&node);
        }
        removed
    }

    pub fn listener_count(&self, node: NodeId) -> usize {
        self.listeners.get(&node).map_or(0, Vec::len)
    }

    /// Fire a native event, returning the listeners registered for it in registration order.
    pub fn dispatch(&self, node: NodeId, kind: MediaEventKind) -> Vec<ListenerId> {
        self.listeners
            .get(&node)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, k)| *k == kind)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(doc: &mut Document, parent: NodeId, tag: &str, class: &str) -> NodeId {
        let node = doc.create_element(tag);
        if !class.is_empty() {
            doc.add_class(node, class);
        }
        doc.append_child(parent, node);
        node
    }

    #[test]
    fn append_records_only_connected_parents() {
        let mut doc = Document::new();
        let detached = doc.create_element("div");
        let child = doc.create_element("span");
        doc.append_child(detached, child);
        assert!(!doc.has_pending_records());

        doc.append_child(doc.body(), detached);
        let records = doc.take_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target(), doc.body());
        assert_eq!(records[0].added(), &[detached]);
        assert!(doc.is_connected(child));
    }

    #[test]
    fn remove_detaches_subtree() {
        let mut doc = Document::new();
        let body = doc.body();
        let outer = element(&mut doc, body, "div", "outer");
        let inner = element(&mut doc, outer, "video", "");
        doc.take_records();

        assert!(doc.remove(outer));
        assert!(!doc.is_connected(inner));
        assert!(!doc.remove(outer));
        let records = doc.take_records();
        assert_eq!(records[0].removed(), &[outer]);
    }

    #[test]
    fn set_text_skips_unchanged_values() {
        let mut doc = Document::new();
        let body = doc.body();
        let title = element(&mut doc, body, "h4", "");
        doc.take_records();

        doc.set_text(title, "Arrival");
        doc.set_text(title, "Arrival");
        assert_eq!(doc.take_records(), vec![MutationRecord::CharacterData { target: title }]);
    }

    #[test]
    fn text_content_concatenates_descendants() {
        let mut doc = Document::new();
        let body = doc.body();
        let div = element(&mut doc, body, "div", "");
        let a = element(&mut doc, div, "span", "");
        let b = element(&mut doc, div, "span", "");
        doc.set_text(a, "S1:");
        doc.set_text(b, "E1");
        assert_eq!(doc.text_content(div), "S1:E1");
    }

    #[test]
    fn listener_table_tracks_registrations() {
        let mut doc = Document::new();
        let video = doc.create_element("video");
        let first = doc.add_event_listener(video, MediaEventKind::Playing);
        let second = doc.add_event_listener(video, MediaEventKind::Pause);
        assert_eq!(doc.listener_count(video), 2);
        assert_eq!(doc.dispatch(video, MediaEventKind::Playing), vec![first]);

        assert!(doc.remove_event_listener(video, first));
        assert!(!doc.remove_event_listener(video, first));
        assert!(doc.dispatch(video, MediaEventKind::Playing).is_empty());
        assert!(doc.remove_event_listener(video, second));
        assert_eq!(doc.listener_count(video), 0);
    }

    #[test]
    fn only_video_elements_carry_media_properties() {
        let mut doc = Document::new();
        let video = doc.create_element("VIDEO");
        let div = doc.create_element("div");
        assert_eq!(doc.tag(video), "video");
        assert!(doc.media(video).is_some());
        assert!(doc.media(div).is_none());
    }
}
