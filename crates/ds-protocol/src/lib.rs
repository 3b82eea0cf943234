//! ds-protocol: Wire protocol for devshell remote shell sessions
//!
//! This crate defines the framed binary protocol spoken between a client
//! (or backend relay) and the device agent. A frame carries one [`Message`]:
//! a sub-protocol identifier, an operation name, a string property map and
//! an opaque body.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod session;

pub use codec::{decode, encode, MessageCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, FRAME_VERSION, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{
    ControlMessageType, Message, ProtocolType, ShellMessageType, Status, TerminalSize,
    MSG_TYPE_OPEN, MSG_TYPE_PING, MSG_TYPE_PONG, MSG_TYPE_RESIZE, MSG_TYPE_SHELL_COMMAND,
    MSG_TYPE_SPAWN_SHELL, MSG_TYPE_STOP_SHELL, PROP_AUTHORIZATION, PROP_DEVICE_ID, PROP_REASON,
    PROP_SESSION_ID, PROP_STATUS, PROP_TERMINAL_HEIGHT, PROP_TERMINAL_WIDTH, PROTO_TYPE_CONTROL,
    PROTO_TYPE_SHELL, REASON_EXITED,
};
pub use session::SessionId;
