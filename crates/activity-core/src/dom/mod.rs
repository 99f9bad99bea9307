pub mod document;
pub mod observer;
pub mod selector;

pub use document::{
    Document, ListenerId, MediaEventKind, MediaProperties, MutationRecord, NodeId,
};
pub use observer::{DocumentObserver, ObservationEvent, ObservationId, ObserveOptions, ObserveRoot};
pub use selector::{Selector, SelectorError};
