//! Operations a host page (or a recording of one) applies to the [`Document`].

use serde::{Deserialize, Serialize};

use crate::dom::{Document, MediaEventKind, NodeId, Selector};
use crate::error::ActivityError;

/// Declarative element subtree, built detached and attached in one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            class: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Space-separated class list.
    pub fn with_class(mut self, classes: &str) -> Self {
        self.class.extend(classes.split_whitespace().map(str::to_string));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Create the subtree in `doc` without attaching it.
    pub fn build(&self, doc: &mut Document) -> NodeId {
        let node = doc.create_element(&self.tag);
        if let Some(id) = &self.id {
            doc.set_element_id(node, id.clone());
        }
        for class in &self.class {
            doc.add_class(node, class.clone());
        }
        if let Some(text) = &self.text {
            doc.set_text(node, text.clone());
        }
        for child in &self.children {
            let child = child.build(doc);
            doc.append_child(node, child);
        }
        node
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostEvent {
    /// Attach `element` under the first match of `parent`.
    Append { parent: String, element: ElementSpec },
    Remove { selector: String },
    SetText { selector: String, text: String },
    /// Change the location without touching the tree, like `history.pushState`.
    Navigate { path: String },
    /// Ask the application observer to compare the location again.
    Recheck,
    /// Update the media element's properties, then fire `event` on it.
    Media {
        selector: String,
        event: MediaEventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ready_state: Option<u8>,
    },
}

impl HostEvent {
    pub fn append(parent: impl Into<String>, element: ElementSpec) -> Self {
        Self::Append {
            parent: parent.into(),
            element,
        }
    }

    pub fn remove(selector: impl Into<String>) -> Self {
        Self::Remove {
            selector: selector.into(),
        }
    }

    pub fn set_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self::SetText {
            selector: selector.into(),
            text: text.into(),
        }
    }

    pub fn navigate(path: impl Into<String>) -> Self {
        Self::Navigate { path: path.into() }
    }

    /// A media event with no property changes.
    pub fn media(selector: impl Into<String>, event: MediaEventKind) -> Self {
        Self::Media {
            selector: selector.into(),
            event,
            current_time: None,
            duration: None,
            ready_state: None,
        }
    }

    /// `timeupdate` at `seconds`.
    pub fn time_update(selector: impl Into<String>, seconds: f64) -> Self {
        Self::Media {
            selector: selector.into(),
            event: MediaEventKind::TimeUpdate,
            current_time: Some(seconds),
            duration: None,
            ready_state: None,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Self::Append { .. } => "append",
            Self::Remove { .. } => "remove",
            Self::SetText { .. } => "set_text",
            Self::Navigate { .. } => "navigate",
            Self::Recheck => "recheck",
            Self::Media { .. } => "media",
        }
    }
}

/// First element (body included) matching `selector`.
pub fn find(doc: &Document, selector: &str) -> Result<NodeId, ActivityError> {
    let parsed = Selector::parse(selector)?;
    doc.query_document(&parsed)
        .into_iter()
        .next()
        .ok_or_else(|| ActivityError::NodeNotFound {
            selector: selector.to_string(),
        })
}
