use thiserror::Error;

use crate::bridge::BridgeError;
use crate::dom::SelectorError;

/// Failures surfaced by the activity pipeline and service.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Unable to find application mount point {selector:?} after {attempts} attempts")]
    MountPointNotFound { selector: String, attempts: u32 },
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error("No element matches {selector:?}")]
    NodeNotFound { selector: String },
    #[error("Element {selector:?} is not a media element")]
    NotMediaElement { selector: String },
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ActivityError {
    /// Whether the error ends the service instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MountPointNotFound { .. })
    }
}
