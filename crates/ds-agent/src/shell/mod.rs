//! Shell processes backing remote sessions
//!
//! The session state machine does not spawn processes itself; it asks a
//! [`ShellSpawner`] for a [`ShellProcess`] each time a session starts. The
//! spawner checks its dependencies on every request, so a dependency that
//! is missing when the agent starts is picked up as soon as it appears.

mod pty;

use std::io::{self, Read, Write};

use thiserror::Error;

use ds_core::SessionError;
use ds_protocol::TerminalSize;

pub use pty::PtySpawner;

/// Parameters for spawning a shell
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Initial terminal size
    pub size: TerminalSize,
}

/// Errors from spawning a shell
#[derive(Debug, Error)]
pub enum SpawnError {
    /// A dependency of the spawn is missing; a later attempt may succeed
    #[error("{0}")]
    Unavailable(String),

    /// The spawn failed for a reason retrying will not fix
    #[error("{0}")]
    Failed(String),
}

impl From<SpawnError> for SessionError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::Unavailable(reason) => SessionError::DependencyUnavailable(reason),
            SpawnError::Failed(reason) => SessionError::SpawnFailed(reason),
        }
    }
}

/// Control over a running shell process
pub trait ShellControl: Send {
    /// Resize the shell's terminal
    fn resize(&mut self, size: TerminalSize) -> io::Result<()>;

    /// Terminate the process and reap it, returning the exit code if known
    fn kill(&mut self) -> Option<i32>;
}

/// A spawned shell and its I/O handles
pub struct ShellProcess {
    /// Process ID of the shell, if the platform reports one
    pub pid: Option<u32>,
    /// Output of the shell (blocking)
    pub reader: Box<dyn Read + Send>,
    /// Input of the shell
    pub writer: Box<dyn Write + Send>,
    /// Resize/kill handle
    pub control: Box<dyn ShellControl>,
}

/// Spawns shell processes for new sessions
pub trait ShellSpawner: Send + Sync {
    /// Spawn a shell
    fn spawn(&self, request: &SpawnRequest) -> Result<ShellProcess, SpawnError>;

    /// Check whether a spawn would currently find its dependencies
    fn probe(&self) -> Result<(), SpawnError> {
        Ok(())
    }
}
