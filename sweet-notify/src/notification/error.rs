//! Notification pipeline errors.

use thiserror::Error;

/// Failure of one notification invocation.
///
/// None of these escape `Notifier::notify`; they are logged there and
/// returned from `Notifier::dispatch` for callers that want to inspect them.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notifiee not found: {0}")]
    NotifieeNotFound(String),

    /// The acting user or the community could not be found.
    #[error("Payload build failed: {entity_type} {id} not found")]
    SourceNotFound { entity_type: &'static str, id: String },

    /// A lookup while building the payload hit a storage error.
    #[error("Payload build failed: {0}")]
    Lookup(#[source] crate::Error),

    #[error("Unknown notification cause '{cause}' for subject type {subject_type}")]
    UnknownCause { subject_type: String, cause: String },

    #[error("Delivery failed on {channel}: {reason}")]
    Delivery {
        channel: &'static str,
        reason: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[source] crate::Error),
}

impl NotifyError {
    pub fn delivery(channel: &'static str, reason: impl Into<String>) -> Self {
        Self::Delivery {
            channel,
            reason: reason.into(),
        }
    }

    /// Whether the invocation was abandoned before anything was written.
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Self::NotifieeNotFound(_) | Self::SourceNotFound { .. } | Self::Lookup(_)
        )
    }
}
