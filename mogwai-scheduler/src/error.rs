//! Error types for the scheduler engine

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error types for the scheduler engine and its boundaries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The entry cap would be exceeded; the batch was not applied
    #[error("Entry cap of {max} exceeded")]
    Full {
        /// The configured cap that was hit
        max: usize,
    },

    /// Peer credential lookup failed
    #[error("Identifying peer {peer} failed: {cause}")]
    IdentifyingPeer {
        /// The peer whose lookup failed
        peer: String,
        /// Underlying cause
        cause: String,
    },

    /// Malformed external submission (raised at the service boundary)
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl SchedulerError {
    /// Shorthand for [`SchedulerError::IdentifyingPeer`]
    pub fn identifying_peer(peer: impl Into<String>, cause: impl Into<String>) -> Self {
        SchedulerError::IdentifyingPeer {
            peer: peer.into(),
            cause: cause.into(),
        }
    }
}
