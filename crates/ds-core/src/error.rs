//! Core error types for devshell

use ds_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Credentials needed for the handshake are not available yet
    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// Connection refused
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Connect attempt timed out
    #[error("Connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Too many concurrent connections
    #[error("Connection limit of {0} reached")]
    LimitReached(u32),

    /// Framing failure on the connection
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Session-level errors
///
/// Every variant is recoverable: the agent answers it with an `ERROR`
/// status message and keeps the connection open. The `Display` text is
/// what the peer sees in the response body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The message names a sub-protocol the agent does not serve
    #[error("unknown protocol type {0}")]
    UnknownProtocol(u16),

    /// The message type is not part of its sub-protocol
    #[error("unknown message type {message_type:?} for protocol {protocol_type}")]
    UnknownMessageType {
        protocol_type: u16,
        message_type: String,
    },

    /// A start was attempted while the session limit is reached
    #[error("shell is already running")]
    AlreadyRunning,

    /// The targeted session is not running
    #[error("session not found")]
    NotFound,

    /// The shell-spawn dependency is not ready; retried on the next request
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The shell could not be spawned for a non-transient reason
    #[error("{0}")]
    SpawnFailed(String),

    /// A request carried invalid properties
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Writing to or controlling the shell failed
    #[error("shell I/O error: {0}")]
    Io(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
