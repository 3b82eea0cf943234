//! ds-core: Core types, errors and configuration for devshell
//!
//! This crate provides the error taxonomy, configuration structures and
//! shared types used by the agent and the CLI.

pub mod config;
pub mod credentials;
pub mod error;
pub mod time;
pub mod types;

pub use credentials::{CredentialSource, FileTokenSource, StaticToken};
pub use error::{ConfigError, ConnectionError, SessionError};
pub use types::{ConnectionId, SessionState};
