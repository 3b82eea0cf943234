//! Session state machine for one connection
//!
//! [`SessionHandler`] turns each inbound message into at most one response
//! and owns the connection's [`SessionRegistry`]. It never touches the
//! transport: the connection loop writes whatever it returns, in order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ds_core::{ConnectionId, SessionError, SessionState};
use ds_protocol::{
    ControlMessageType, Message, ProtocolType, SessionId, ShellMessageType, Status, TerminalSize,
    PROP_REASON, REASON_EXITED,
};

use super::registry::{ActiveSession, SessionRegistry};
use super::relay::{spawn_output_relay, RelayEvent};
use crate::shell::{ShellSpawner, SpawnRequest};

/// Body of a successful spawn response
pub const SHELL_STARTED: &str = "Shell started";

/// Per-connection session limits and defaults
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Maximum concurrently running shells
    pub max_sessions: usize,
    /// Terminal size when a spawn request carries none
    pub default_size: TerminalSize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 1,
            default_size: TerminalSize::default(),
        }
    }
}

/// Handles the shell and control sub-protocols for one connection
pub struct SessionHandler {
    connection_id: ConnectionId,
    spawner: Arc<dyn ShellSpawner>,
    settings: SessionSettings,
    registry: SessionRegistry,
    relay_tx: mpsc::Sender<RelayEvent>,
}

impl SessionHandler {
    /// Create a handler; relays of spawned shells report on `relay_tx`
    pub fn new(
        connection_id: ConnectionId,
        spawner: Arc<dyn ShellSpawner>,
        settings: SessionSettings,
        relay_tx: mpsc::Sender<RelayEvent>,
    ) -> Self {
        Self {
            connection_id,
            spawner,
            settings,
            registry: SessionRegistry::new(settings.max_sessions),
            relay_tx,
        }
    }

    /// Aggregate session state of this connection
    pub fn state(&self) -> SessionState {
        self.registry.state()
    }

    /// Number of running sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Process one inbound message, returning the response to send
    pub fn handle(&mut self, message: Message) -> Option<Message> {
        tracing::debug!(
            "{}: received {}/{:?}",
            self.connection_id,
            message.protocol_type,
            message.message_type
        );

        match message.protocol() {
            Some(ProtocolType::Shell) => self.handle_shell(message),
            Some(ProtocolType::Control) => self.handle_control(message),
            None => Some(self.reject(
                &message,
                SessionError::UnknownProtocol(message.protocol_type),
            )),
        }
    }

    fn handle_shell(&mut self, message: Message) -> Option<Message> {
        let Some(kind) = ShellMessageType::parse(&message.message_type) else {
            return Some(self.reject(&message, unknown_message_type(&message)));
        };

        match kind {
            ShellMessageType::SpawnShell => Some(match self.spawn_shell(&message) {
                Ok(id) => message
                    .reply(Status::Normal, SHELL_STARTED)
                    .with_session(&id),
                Err(e) => {
                    tracing::warn!("{}: failed to start shell: {}", self.connection_id, e);
                    message.reply(Status::Error, format!("failed to start shell: {}", e))
                }
            }),
            ShellMessageType::StopShell => Some(match self.stop_shell(&message) {
                Ok(id) => message.reply(Status::Normal, "").with_session(&id),
                Err(e) => {
                    tracing::debug!("{}: failed to stop shell: {}", self.connection_id, e);
                    message.reply(Status::Error, format!("failed to stop shell: {}", e))
                }
            }),
            ShellMessageType::Shell => match self.send_input(&message) {
                Ok(()) => None,
                Err(e) => {
                    tracing::debug!("{}: failed to send input: {}", self.connection_id, e);
                    Some(message.reply(Status::Error, format!("failed to send input: {}", e)))
                }
            },
            ShellMessageType::Resize => Some(match self.resize(&message) {
                Ok(id) => message.reply(Status::Normal, "").with_session(&id),
                Err(e) => message.reply(Status::Error, format!("failed to resize shell: {}", e)),
            }),
            ShellMessageType::Ping => Some(pong(&message)),
            ShellMessageType::Pong => {
                tracing::trace!("{}: pong", self.connection_id);
                None
            }
        }
    }

    fn handle_control(&mut self, message: Message) -> Option<Message> {
        match ControlMessageType::parse(&message.message_type) {
            Some(ControlMessageType::Ping) => Some(pong(&message)),
            Some(ControlMessageType::Pong) => {
                tracing::trace!("{}: pong", self.connection_id);
                None
            }
            Some(ControlMessageType::Open) => {
                tracing::warn!("{}: peer sent an open handshake", self.connection_id);
                Some(message.reply(Status::Error, "open is only sent by the agent"))
            }
            None => Some(self.reject(&message, unknown_message_type(&message))),
        }
    }

    fn reject(&self, message: &Message, error: SessionError) -> Message {
        tracing::warn!("{}: rejecting message: {}", self.connection_id, error);
        message.reply(Status::Error, "")
    }

    fn spawn_shell(&mut self, request: &Message) -> Result<SessionId, SessionError> {
        if self.registry.is_full() {
            return Err(SessionError::AlreadyRunning);
        }

        let size = request
            .terminal_size()
            .unwrap_or(self.settings.default_size);
        let process = self.spawner.spawn(&SpawnRequest { size })?;

        let id = SessionId::generate();
        let cancel = CancellationToken::new();
        let relay = spawn_output_relay(
            id.clone(),
            process.reader,
            self.relay_tx.clone(),
            cancel.clone(),
        );
        let session = ActiveSession::new(
            id.clone(),
            process.pid,
            process.writer,
            process.control,
            cancel,
            relay,
        );

        if let Err((e, session)) = self.registry.insert(session) {
            session.terminate();
            return Err(e);
        }

        tracing::info!(
            "{}: started {} (pid {:?}, {}x{})",
            self.connection_id,
            id,
            process.pid,
            size.cols,
            size.rows
        );
        Ok(id)
    }

    fn stop_shell(&mut self, request: &Message) -> Result<SessionId, SessionError> {
        let id = self.registry.resolve(request.session_id().as_ref())?;
        let session = self.registry.remove(&id).ok_or(SessionError::NotFound)?;
        let exit_code = session.terminate();
        tracing::info!(
            "{}: stopped {} (exit code {:?})",
            self.connection_id,
            id,
            exit_code
        );
        Ok(id)
    }

    fn send_input(&mut self, request: &Message) -> Result<(), SessionError> {
        let id = self.registry.resolve(request.session_id().as_ref())?;
        let session = self.registry.get_mut(&id).ok_or(SessionError::NotFound)?;
        session.write(&request.body)
    }

    fn resize(&mut self, request: &Message) -> Result<SessionId, SessionError> {
        let size = request.terminal_size().ok_or_else(|| {
            SessionError::InvalidRequest(
                "terminal_width and terminal_height are required".to_string(),
            )
        })?;
        let id = self.registry.resolve(request.session_id().as_ref())?;
        let session = self.registry.get_mut(&id).ok_or(SessionError::NotFound)?;
        session.resize(size)?;
        Ok(id)
    }

    /// Turn a relay event into an outbound message
    ///
    /// Output is emitted only while its session is still registered, so
    /// chunks queued before a stop never reach the peer.
    pub fn on_relay_event(&mut self, event: RelayEvent) -> Option<Message> {
        match event {
            RelayEvent::Output { session_id, data } => {
                if !self.registry.contains(&session_id) {
                    tracing::trace!(
                        "{}: dropping {} bytes of stopped {}",
                        self.connection_id,
                        data.len(),
                        session_id
                    );
                    return None;
                }
                Some(
                    Message::shell(ShellMessageType::Shell)
                        .with_status(Status::Normal)
                        .with_session(&session_id)
                        .with_body(data),
                )
            }
            RelayEvent::Closed { session_id } => {
                let session = self.registry.remove(&session_id)?;
                let exit_code = session.terminate();
                tracing::info!(
                    "{}: shell of {} exited (exit code {:?})",
                    self.connection_id,
                    session_id,
                    exit_code
                );
                Some(
                    Message::shell(ShellMessageType::StopShell)
                        .with_status(Status::Normal)
                        .with_session(&session_id)
                        .with_property(PROP_REASON, REASON_EXITED),
                )
            }
        }
    }

    /// Terminate every running session
    pub fn shutdown(&mut self) {
        for session in self.registry.drain() {
            tracing::info!("{}: closing {}", self.connection_id, session.id);
            session.terminate();
        }
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn unknown_message_type(message: &Message) -> SessionError {
    SessionError::UnknownMessageType {
        protocol_type: message.protocol_type,
        message_type: message.message_type.clone(),
    }
}

fn pong(ping: &Message) -> Message {
    let kind = match ping.protocol() {
        Some(ProtocolType::Control) => ControlMessageType::Pong.as_str(),
        _ => ShellMessageType::Pong.as_str(),
    };
    Message::new(ping.protocol_type, kind).with_status(Status::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{ShellProcess, SpawnError};
    use ds_protocol::{PROP_SESSION_ID, PROTO_TYPE_CONTROL, PROTO_TYPE_SHELL};

    struct UnavailableSpawner;

    impl ShellSpawner for UnavailableSpawner {
        fn spawn(&self, _request: &SpawnRequest) -> Result<ShellProcess, SpawnError> {
            Err(SpawnError::Unavailable("no pty".to_string()))
        }
    }

    fn handler() -> SessionHandler {
        let (tx, _rx) = mpsc::channel(8);
        SessionHandler::new(
            ConnectionId::generate(),
            Arc::new(UnavailableSpawner),
            SessionSettings::default(),
            tx,
        )
    }

    #[test]
    fn test_unknown_protocol_echoed() {
        let response = handler()
            .handle(Message::new(12345, "spawn_shell"))
            .unwrap();
        assert_eq!(response.protocol_type, 12345);
        assert_eq!(response.message_type, "spawn_shell");
        assert_eq!(response.status(), Some(Status::Error));
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_unknown_message_type_echoed() {
        let mut handler = handler();
        for proto in [PROTO_TYPE_SHELL, PROTO_TYPE_CONTROL] {
            let response = handler.handle(Message::new(proto, "bogusmessage")).unwrap();
            assert_eq!(response.protocol_type, proto);
            assert_eq!(response.message_type, "bogusmessage");
            assert_eq!(response.status(), Some(Status::Error));
        }
    }

    #[test]
    fn test_stop_and_input_without_session() {
        let mut handler = handler();

        let stop = handler
            .handle(Message::shell(ShellMessageType::StopShell))
            .unwrap();
        assert_eq!(stop.status(), Some(Status::Error));
        assert_eq!(&stop.body[..], b"failed to stop shell: session not found");

        let input = handler
            .handle(Message::shell(ShellMessageType::Shell).with_body("ls\n"))
            .unwrap();
        assert_eq!(&input.body[..], b"failed to send input: session not found");
        assert_eq!(handler.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_spawn_dependency_unavailable() {
        let mut handler = handler();
        let response = handler
            .handle(Message::shell(ShellMessageType::SpawnShell))
            .unwrap();
        assert_eq!(response.status(), Some(Status::Error));
        assert_eq!(
            &response.body[..],
            b"failed to start shell: dependency unavailable: no pty"
        );
        assert!(response.property(PROP_SESSION_ID).is_none());
        assert_eq!(handler.session_count(), 0);
    }

    #[test]
    fn test_ping_answered_on_both_protocols() {
        let mut handler = handler();

        let shell = handler.handle(Message::shell(ShellMessageType::Ping)).unwrap();
        assert_eq!(shell.protocol_type, PROTO_TYPE_SHELL);
        assert_eq!(shell.message_type, "pong");

        let control = handler
            .handle(Message::control(ControlMessageType::Ping))
            .unwrap();
        assert_eq!(control.protocol_type, PROTO_TYPE_CONTROL);
        assert_eq!(control.message_type, "pong");
        assert_eq!(control.status(), Some(Status::Normal));

        assert!(handler
            .handle(Message::shell(ShellMessageType::Pong))
            .is_none());
    }

    #[test]
    fn test_output_of_unknown_session_dropped() {
        let mut handler = handler();
        let event = RelayEvent::Output {
            session_id: SessionId::new("gone"),
            data: bytes::Bytes::from_static(b"late"),
        };
        assert!(handler.on_relay_event(event).is_none());
    }
}
