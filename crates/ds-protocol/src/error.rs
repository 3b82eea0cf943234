//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame is truncated, carries a bad length prefix or header, or its
    /// payload fails structural validation. The stream is desynchronized.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error came from corrupt input rather than local failure
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::MalformedFrame(_))
    }
}
