//! Serving one transport connection
//!
//! The connection loop is the only writer to the transport. It alternates
//! between inbound frames and relay events, handing each to the
//! [`SessionHandler`] and writing the result before taking the next one.

use std::fmt;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ds_core::ConnectionId;
use ds_protocol::{Message, MessageCodec};

use crate::session::{RelayEvent, SessionHandler, SessionSettings};
use crate::shell::ShellSpawner;

/// Capacity of the relay channel; relays block when it is full
const RELAY_CHANNEL_CAPACITY: usize = 256;

/// Why a connection loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the stream
    PeerClosed,
    /// The agent is shutting down
    Shutdown,
    /// The peer sent a frame that could not be decoded
    Malformed(String),
    /// Reading or writing the transport failed
    Transport(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::Shutdown => write!(f, "agent shutting down"),
            Self::Malformed(e) => write!(f, "malformed frame: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// A connection being served by the agent
pub struct Connection<T> {
    id: ConnectionId,
    framed: Framed<T, MessageCodec>,
    handler: SessionHandler,
    relay_rx: mpsc::Receiver<RelayEvent>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established, framed transport
    pub fn new(
        id: ConnectionId,
        framed: Framed<T, MessageCodec>,
        spawner: Arc<dyn ShellSpawner>,
        settings: SessionSettings,
    ) -> Self {
        let (relay_tx, relay_rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
        Self {
            id,
            framed,
            handler: SessionHandler::new(id, spawner, settings, relay_tx),
            relay_rx,
        }
    }

    /// Wrap a raw byte stream in the message codec
    pub fn from_stream(
        id: ConnectionId,
        stream: T,
        spawner: Arc<dyn ShellSpawner>,
        settings: SessionSettings,
    ) -> Self {
        Self::new(id, Framed::new(stream, MessageCodec::new()), spawner, settings)
    }

    /// Serve the connection until it closes or `cancel` fires
    ///
    /// Every session started on the connection is terminated before this
    /// returns.
    pub async fn run(mut self, cancel: CancellationToken) -> DisconnectReason {
        tracing::debug!("{}: serving", self.id);

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break DisconnectReason::Shutdown,

                inbound = self.framed.next() => match inbound {
                    None => break DisconnectReason::PeerClosed,
                    Some(Err(e)) if e.is_malformed() => {
                        tracing::warn!("{}: closing after malformed frame: {}", self.id, e);
                        break DisconnectReason::Malformed(e.to_string());
                    }
                    Some(Err(e)) => break DisconnectReason::Transport(e.to_string()),
                    Some(Ok(message)) => {
                        if let Some(response) = self.handler.handle(message) {
                            if let Err(e) = self.send(response).await {
                                break e;
                            }
                        }
                    }
                },

                Some(event) = self.relay_rx.recv() => {
                    if let Some(message) = self.handler.on_relay_event(event) {
                        if let Err(e) = self.send(message).await {
                            break e;
                        }
                    }
                }
            }
        };

        let sessions = self.handler.session_count();
        self.handler.shutdown();
        tracing::info!(
            "{}: disconnected ({}), {} session(s) closed",
            self.id,
            reason,
            sessions
        );
        reason
    }

    async fn send(&mut self, message: Message) -> Result<(), DisconnectReason> {
        self.framed
            .send(message)
            .await
            .map_err(|e| DisconnectReason::Transport(e.to_string()))
    }
}
