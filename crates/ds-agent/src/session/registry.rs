//! Per-connection registry of running shell sessions

use std::collections::HashMap;
use std::io::Write;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ds_core::{SessionError, SessionState};
use ds_protocol::{SessionId, TerminalSize};

use crate::shell::ShellControl;

/// A running shell owned by the registry
pub struct ActiveSession {
    /// Session identifier
    pub id: SessionId,
    /// Shell process ID
    pub pid: Option<u32>,
    writer: Box<dyn Write + Send>,
    control: Box<dyn ShellControl>,
    cancel: CancellationToken,
    relay: JoinHandle<()>,
}

impl ActiveSession {
    pub fn new(
        id: SessionId,
        pid: Option<u32>,
        writer: Box<dyn Write + Send>,
        control: Box<dyn ShellControl>,
        cancel: CancellationToken,
        relay: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            pid,
            writer,
            control,
            cancel,
            relay,
        }
    }

    /// Write input to the shell
    pub fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.writer
            .write_all(data)
            .and_then(|_| self.writer.flush())
            .map_err(|e| SessionError::Io(e.to_string()))
    }

    /// Resize the shell's terminal
    pub fn resize(&mut self, size: TerminalSize) -> Result<(), SessionError> {
        self.control
            .resize(size)
            .map_err(|e| SessionError::Io(e.to_string()))
    }

    /// Stop the relay and kill the shell
    ///
    /// The relay token is cancelled before the process is killed so that
    /// output read during teardown is dropped by the relay itself.
    pub fn terminate(mut self) -> Option<i32> {
        self.cancel.cancel();
        let exit_code = self.control.kill();
        // The relay exits on its own once the PTY closes; nothing to join
        drop(self.relay);
        tracing::debug!("Session {} terminated (exit code {:?})", self.id, exit_code);
        exit_code
    }
}

/// Sessions running on one connection, bounded by a limit
pub struct SessionRegistry {
    limit: usize,
    sessions: HashMap<SessionId, ActiveSession>,
    /// Number of sessions that have been stopped on this connection
    finished: u64,
}

impl SessionRegistry {
    /// Create an empty registry allowing `limit` concurrent sessions
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            sessions: HashMap::new(),
            finished: 0,
        }
    }

    /// Whether a new session would exceed the limit
    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.limit
    }

    /// Register a running session
    ///
    /// Fails with `AlreadyRunning` at the limit; the session is handed back
    /// untouched so the caller can tear it down.
    pub fn insert(&mut self, session: ActiveSession) -> Result<(), (SessionError, ActiveSession)> {
        if self.is_full() {
            return Err((SessionError::AlreadyRunning, session));
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Find the session a message targets
    ///
    /// An explicit id must name a running session. Without an id, the only
    /// running session is targeted.
    pub fn resolve(&self, id: Option<&SessionId>) -> Result<SessionId, SessionError> {
        match id {
            Some(id) if self.sessions.contains_key(id) => Ok(id.clone()),
            Some(_) => Err(SessionError::NotFound),
            None => {
                let mut ids = self.sessions.keys();
                match (ids.next(), ids.next()) {
                    (Some(only), None) => Ok(only.clone()),
                    (None, _) => Err(SessionError::NotFound),
                    (Some(_), Some(_)) => Err(SessionError::InvalidRequest(
                        "session_id is required while several sessions run".to_string(),
                    )),
                }
            }
        }
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut ActiveSession> {
        self.sessions.get_mut(id)
    }

    /// Remove a session, counting it as stopped
    pub fn remove(&mut self, id: &SessionId) -> Option<ActiveSession> {
        let session = self.sessions.remove(id)?;
        self.finished += 1;
        Some(session)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session
    pub fn drain(&mut self) -> Vec<ActiveSession> {
        let drained: Vec<_> = self.sessions.drain().map(|(_, s)| s).collect();
        self.finished += drained.len() as u64;
        drained
    }

    /// Aggregate state of the connection's shell slot
    pub fn state(&self) -> SessionState {
        if !self.sessions.is_empty() {
            SessionState::Running
        } else if self.finished > 0 {
            SessionState::Stopped
        } else {
            SessionState::NotStarted
        }
    }
}
