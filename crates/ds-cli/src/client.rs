//! Client for the remote shell protocol
//!
//! [`ShellClient`] drives one connection to an agent: it starts a shell,
//! sends input, collects output and stops the shell. Output that arrives
//! while the client waits for a response is kept and returned by the next
//! output read.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use ds_protocol::{
    ControlMessageType, Message, MessageCodec, ProtocolError, ProtocolType, SessionId,
    ShellMessageType, Status, TerminalSize,
};

/// How long a request waits for its response by default
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the shell client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not connect to the agent
    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The agent answered with an `ERROR` status
    #[error("{message_type} rejected: {reason}")]
    Rejected {
        message_type: String,
        reason: String,
    },

    /// The response did not match the request
    #[error("Unexpected response: {0}")]
    Unexpected(String),

    /// The connection closed
    #[error("Connection closed by agent")]
    Closed,

    /// No response in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Framing or transport failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Output collected from a shell
#[derive(Debug, Default, Clone)]
pub struct Output {
    /// Raw output bytes, in arrival order
    pub data: Vec<u8>,
    /// The shell exited while output was being collected
    pub closed: bool,
}

impl Output {
    /// Output decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Connection to an agent serving shell sessions
pub struct ShellClient<T = TcpStream> {
    framed: Framed<T, MessageCodec>,
    session_id: Option<SessionId>,
    /// Messages received while waiting for a response
    pending: VecDeque<Message>,
    request_timeout: Duration,
}

impl ShellClient<TcpStream> {
    /// Connect to an agent over TCP
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
            .map_err(|e| ClientError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", address, e);
        }

        tracing::debug!("Connected to {}", address);
        Ok(Self::new(stream))
    }
}

impl<T> ShellClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established byte stream
    pub fn new(io: T) -> Self {
        Self {
            framed: Framed::new(io, MessageCodec::new()),
            session_id: None,
            pending: VecDeque::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set how long requests wait for their response
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Session started by this client, if one is running
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Send a raw message
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.framed.send(message).await?;
        Ok(())
    }

    /// Receive the next message, including any kept back earlier
    ///
    /// Returns `None` once the agent has closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        match self.framed.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Receive the next message if one arrives within `wait`
    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    /// Send a request and wait for the response of the same type
    ///
    /// Shell output and exit notices received meanwhile are kept for
    /// [`recv_output`](Self::recv_output). An exit notice never counts as
    /// the response, even though it is typed `stop_shell`.
    async fn request(&mut self, message: Message) -> Result<Message> {
        let protocol_type = message.protocol_type;
        let message_type = message.message_type.clone();
        self.send(message).await?;

        let deadline = Instant::now() + self.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let next = tokio::time::timeout(remaining, self.framed.next())
                .await
                .map_err(|_| ClientError::Timeout(self.request_timeout))?;

            let response = match next {
                Some(Ok(response)) => response,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Closed),
            };

            if response.is_exit_notice() {
                self.note_exit(&response);
                self.pending.push_back(response);
                continue;
            }

            if response.protocol_type == protocol_type && response.message_type == message_type {
                return match response.status() {
                    Some(Status::Normal) => Ok(response),
                    Some(Status::Error) => Err(ClientError::Rejected {
                        message_type,
                        reason: String::from_utf8_lossy(&response.body).into_owned(),
                    }),
                    None => Err(ClientError::Unexpected(format!(
                        "{} response without status",
                        message_type
                    ))),
                };
            }

            self.pending.push_back(response);
        }
    }

    /// Start a shell of the given size
    pub async fn start_shell(&mut self, size: TerminalSize) -> Result<SessionId> {
        let response = self
            .request(Message::shell(ShellMessageType::SpawnShell).with_terminal_size(size))
            .await?;
        let session_id = response.session_id().ok_or_else(|| {
            ClientError::Unexpected("spawn response without session id".to_string())
        })?;

        tracing::debug!("Started {}", session_id);
        self.session_id = Some(session_id.clone());
        Ok(session_id)
    }

    /// Stop the running shell
    pub async fn stop_shell(&mut self) -> Result<()> {
        let request = self.targeted(Message::shell(ShellMessageType::StopShell));
        let result = self.request(request).await.map(|_| ());
        if result.is_ok() {
            self.session_id = None;
        }
        result
    }

    /// Send input to the running shell
    ///
    /// The agent only answers failed input, so an error shows up on a
    /// later receive.
    pub async fn send_input(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let message = self.targeted(Message::shell(ShellMessageType::Shell).with_body(data));
        self.send(message).await
    }

    /// Resize the running shell's terminal
    pub async fn resize(&mut self, size: TerminalSize) -> Result<()> {
        let request = self.targeted(
            Message::shell(ShellMessageType::Resize).with_terminal_size(size),
        );
        self.request(request).await.map(|_| ())
    }

    /// Round-trip a control ping
    pub async fn ping(&mut self) -> Result<Duration> {
        let started = Instant::now();
        self.send(Message::control(ControlMessageType::Ping)).await?;

        let deadline = started + self.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let next = tokio::time::timeout(remaining, self.framed.next())
                .await
                .map_err(|_| ClientError::Timeout(self.request_timeout))?;
            match next {
                Some(Ok(message))
                    if message.protocol() == Some(ProtocolType::Control)
                        && message.message_type == ControlMessageType::Pong.as_str() =>
                {
                    return Ok(started.elapsed());
                }
                Some(Ok(message)) => self.pending.push_back(message),
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Closed),
            }
        }
    }

    /// Collect shell output until none arrives for `idle`
    ///
    /// Returns early when the shell exits or the connection closes. An
    /// `ERROR` answer to earlier input is returned as an error.
    pub async fn recv_output(&mut self, idle: Duration) -> Result<Output> {
        let mut output = Output::default();

        loop {
            let Some(message) = self.recv_timeout(idle).await? else {
                return Ok(output);
            };

            if message.protocol() != Some(ProtocolType::Shell) {
                tracing::debug!("Ignoring {} message", message.message_type);
                continue;
            }

            match (
                ShellMessageType::parse(&message.message_type),
                message.status(),
            ) {
                (Some(ShellMessageType::Shell), Some(Status::Normal)) => {
                    output.data.extend_from_slice(&message.body);
                }
                _ if message.is_exit_notice() => {
                    tracing::debug!("Shell exited");
                    self.note_exit(&message);
                    output.closed = true;
                    return Ok(output);
                }
                (_, Some(Status::Error)) => {
                    return Err(ClientError::Rejected {
                        message_type: message.message_type.clone(),
                        reason: String::from_utf8_lossy(&message.body).into_owned(),
                    });
                }
                _ => tracing::debug!("Ignoring {} message", message.message_type),
            }
        }
    }

    /// Forget the running session if the notice is about it
    fn note_exit(&mut self, notice: &Message) {
        let id = notice.session_id();
        if id.is_none() || id == self.session_id {
            self.session_id = None;
        }
    }

    fn targeted(&self, message: Message) -> Message {
        match &self.session_id {
            Some(id) => message.with_session(id),
            None => message,
        }
    }
}
