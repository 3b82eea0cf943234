//! Message types for the devshell protocol
//!
//! A [`Message`] is the unit of exchange: a sub-protocol number, an operation
//! name, a string property map and an opaque body. Messages are serialized
//! into frames using the codec defined in `codec.rs`.
//!
//! # Sub-protocols
//!
//! - `PROTO_TYPE_SHELL` (1): remote shell sessions (`spawn_shell`,
//!   `stop_shell`, `shell` data chunks, `resize`, `ping`/`pong`)
//! - `PROTO_TYPE_CONTROL` (0xFFFF): connection control (`open` handshake,
//!   `ping`/`pong`)
//!
//! Any other `protocol_type` is legal on the wire and decodes normally; the
//! receiving agent answers it with an `ERROR` status.
//!
//! # Message Flow
//!
//! 1. Client sends `spawn_shell`, agent answers `NORMAL` with `"Shell started"`
//!    and the new `session_id` property
//! 2. Terminal I/O: `shell` messages flow in both directions
//! 3. Window resize: `resize` with `terminal_width`/`terminal_height`
//! 4. Session end: `stop_shell` from the client, or from the agent when the
//!    shell exits on its own

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Shell sub-protocol identifier
pub const PROTO_TYPE_SHELL: u16 = 1;

/// Connection control sub-protocol identifier
pub const PROTO_TYPE_CONTROL: u16 = 0xFFFF;

/// Start a shell session
pub const MSG_TYPE_SPAWN_SHELL: &str = "spawn_shell";
/// Stop a shell session
pub const MSG_TYPE_STOP_SHELL: &str = "stop_shell";
/// Shell input (client to agent) or output (agent to client)
pub const MSG_TYPE_SHELL_COMMAND: &str = "shell";
/// Resize the session terminal
pub const MSG_TYPE_RESIZE: &str = "resize";
/// Keepalive request
pub const MSG_TYPE_PING: &str = "ping";
/// Keepalive answer
pub const MSG_TYPE_PONG: &str = "pong";
/// Control handshake sent by a dialing agent
pub const MSG_TYPE_OPEN: &str = "open";

/// Response status property
pub const PROP_STATUS: &str = "status";
/// Session the message belongs to
pub const PROP_SESSION_ID: &str = "session_id";
/// Terminal width in columns
pub const PROP_TERMINAL_WIDTH: &str = "terminal_width";
/// Terminal height in rows
pub const PROP_TERMINAL_HEIGHT: &str = "terminal_height";
/// Bearer credential attached to the control handshake
pub const PROP_AUTHORIZATION: &str = "authorization";
/// Device identity attached to the control handshake
pub const PROP_DEVICE_ID: &str = "device_id";
/// Why an unrequested message was sent
pub const PROP_REASON: &str = "reason";

/// `reason` of the `stop_shell` notice sent when a shell exits by itself
pub const REASON_EXITED: &str = "exited";

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// Value of the `status` property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The request succeeded, or the message carries regular data
    Normal,
    /// The request was rejected; the body may carry a diagnostic
    Error,
}

impl Status {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "NORMAL",
            Status::Error => "ERROR",
        }
    }

    /// Parse the wire representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NORMAL" => Some(Status::Normal),
            "ERROR" => Some(Status::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-protocols understood by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProtocolType {
    /// Remote shell sessions
    Shell = PROTO_TYPE_SHELL,
    /// Connection control
    Control = PROTO_TYPE_CONTROL,
}

impl ProtocolType {
    /// Convert to u16
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            PROTO_TYPE_SHELL => Some(Self::Shell),
            PROTO_TYPE_CONTROL => Some(Self::Control),
            _ => None,
        }
    }
}

/// Message types of the shell sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMessageType {
    SpawnShell,
    StopShell,
    Shell,
    Resize,
    Ping,
    Pong,
}

impl ShellMessageType {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpawnShell => MSG_TYPE_SPAWN_SHELL,
            Self::StopShell => MSG_TYPE_STOP_SHELL,
            Self::Shell => MSG_TYPE_SHELL_COMMAND,
            Self::Resize => MSG_TYPE_RESIZE,
            Self::Ping => MSG_TYPE_PING,
            Self::Pong => MSG_TYPE_PONG,
        }
    }

    /// Parse the wire representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            MSG_TYPE_SPAWN_SHELL => Some(Self::SpawnShell),
            MSG_TYPE_STOP_SHELL => Some(Self::StopShell),
            MSG_TYPE_SHELL_COMMAND => Some(Self::Shell),
            MSG_TYPE_RESIZE => Some(Self::Resize),
            MSG_TYPE_PING => Some(Self::Ping),
            MSG_TYPE_PONG => Some(Self::Pong),
            _ => None,
        }
    }
}

/// Message types of the control sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessageType {
    Open,
    Ping,
    Pong,
}

impl ControlMessageType {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => MSG_TYPE_OPEN,
            Self::Ping => MSG_TYPE_PING,
            Self::Pong => MSG_TYPE_PONG,
        }
    }

    /// Parse the wire representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            MSG_TYPE_OPEN => Some(Self::Open),
            MSG_TYPE_PING => Some(Self::Ping),
            MSG_TYPE_PONG => Some(Self::Pong),
            _ => None,
        }
    }
}

/// A protocol message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Sub-protocol identifier
    pub protocol_type: u16,
    /// Operation name within the sub-protocol
    pub message_type: String,
    /// String properties (status, session id, terminal metadata)
    pub properties: BTreeMap<String, String>,
    /// Opaque payload
    pub body: Bytes,
}

impl Message {
    /// Create an empty message
    pub fn new(protocol_type: u16, message_type: impl Into<String>) -> Self {
        Self {
            protocol_type,
            message_type: message_type.into(),
            properties: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create an empty shell sub-protocol message
    pub fn shell(message_type: ShellMessageType) -> Self {
        Self::new(PROTO_TYPE_SHELL, message_type.as_str())
    }

    /// Create an empty control sub-protocol message
    pub fn control(message_type: ControlMessageType) -> Self {
        Self::new(PROTO_TYPE_CONTROL, message_type.as_str())
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the status property
    pub fn with_status(self, status: Status) -> Self {
        self.with_property(PROP_STATUS, status.as_str())
    }

    /// Set the session id property
    pub fn with_session(self, session_id: &SessionId) -> Self {
        self.with_property(PROP_SESSION_ID, session_id.as_str())
    }

    /// Set the terminal size properties
    pub fn with_terminal_size(self, size: TerminalSize) -> Self {
        self.with_property(PROP_TERMINAL_WIDTH, size.cols.to_string())
            .with_property(PROP_TERMINAL_HEIGHT, size.rows.to_string())
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The status property, if present and valid
    pub fn status(&self) -> Option<Status> {
        self.property(PROP_STATUS).and_then(Status::parse)
    }

    /// The session id property, if present
    pub fn session_id(&self) -> Option<SessionId> {
        self.property(PROP_SESSION_ID).map(SessionId::from)
    }

    /// Terminal size from the width/height properties
    ///
    /// Returns None unless both are present and parse as u16.
    pub fn terminal_size(&self) -> Option<TerminalSize> {
        let cols = self.property(PROP_TERMINAL_WIDTH)?.parse().ok()?;
        let rows = self.property(PROP_TERMINAL_HEIGHT)?.parse().ok()?;
        Some(TerminalSize::new(rows, cols))
    }

    /// Whether this is the agent's notice that a shell exited by itself
    ///
    /// The notice shares its type with the `stop_shell` response but is
    /// never an answer to a request.
    pub fn is_exit_notice(&self) -> bool {
        self.protocol() == Some(ProtocolType::Shell)
            && self.message_type == MSG_TYPE_STOP_SHELL
            && self.property(PROP_REASON) == Some(REASON_EXITED)
    }

    /// The recognized sub-protocol of this message
    pub fn protocol(&self) -> Option<ProtocolType> {
        ProtocolType::from_u16(self.protocol_type)
    }

    /// Build a response echoing this message's protocol and message type
    ///
    /// The session id property is carried over when present.
    pub fn reply(&self, status: Status, body: impl Into<Bytes>) -> Message {
        let mut reply = Message::new(self.protocol_type, self.message_type.clone())
            .with_status(status)
            .with_body(body);
        if let Some(session_id) = self.property(PROP_SESSION_ID) {
            reply = reply.with_property(PROP_SESSION_ID, session_id);
        }
        reply
    }
}
