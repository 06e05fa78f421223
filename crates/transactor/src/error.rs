use thiserror::Error;

use tollgate_core::ResolutionError;
use tollgate_state::StateError;

use crate::queue::QueueError;

/// Errors that abort an authorization or report request.
///
/// Denials are not errors; they come back as an unauthorized decision.
#[derive(Debug, Error)]
pub enum TransactorError {
    /// The request referred to entities that could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// An error occurred in the state store.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The report queue rejected a job.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// A stored entity could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The transactor was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for TransactorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl TransactorError {
    /// The resolution error behind this failure, if that is what it was.
    #[must_use]
    pub fn as_resolution(&self) -> Option<&ResolutionError> {
        match self {
            Self::Resolution(e) => Some(e),
            _ => None,
        }
    }
}
