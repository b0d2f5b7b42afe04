//! Error types for qtools
//!
//! Defines all error types used throughout the workspace.

use thiserror::Error;

/// Main error type for qtools operations
#[derive(Error, Debug)]
pub enum Error {
    /// Address URL could not be parsed
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A file named in the configuration does not exist
    #[error("{0} not found")]
    FileNotFound(String),

    /// Requested feature is not available in this build
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Link registered twice as a consumer of the same queue
    #[error("Link {link} is already a consumer of queue '{address}'")]
    DuplicateConsumer { address: String, link: String },

    /// Response correlation id was never sent or already answered
    #[error("Response correlation id '{0}' does not match any pending request")]
    UnknownCorrelation(String),

    /// Link id not known to the container
    #[error("Unknown link: {0}")]
    UnknownLink(String),

    /// Connection id not known to the container
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Delivery id not known to the container
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),

    /// Attempt to send without credit
    #[error("No credit on link {0}")]
    NoCredit(String),

    /// Attempt to use a link that is not open
    #[error("Link {0} is not open")]
    LinkNotOpen(String),

    /// Connection-level failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer violated the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request processing failed in respond mode
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Invalid message format
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidUrl`]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for qtools operations
pub type Result<T> = std::result::Result<T, Error>;
