//! Shared helpers for agent integration tests

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ds_agent::connection::{Connection, DisconnectReason};
use ds_agent::session::SessionSettings;
use ds_agent::shell::{
    ShellControl, ShellProcess, ShellSpawner, SpawnError, SpawnRequest,
};
use ds_core::ConnectionId;
use ds_protocol::{Message, MessageCodec, ProtocolType, ShellMessageType, TerminalSize};

/// Prompt printed by a loopback shell when it starts
pub const PROMPT: &str = "$ ";

type OutputSender = Arc<Mutex<Option<std_mpsc::Sender<Vec<u8>>>>>;

/// Spawns in-memory shells that echo their input
///
/// Writing `exit` closes the shell as if the process had exited. The
/// spawner can be switched to report its dependency as unavailable.
#[derive(Default)]
pub struct LoopbackSpawner {
    unavailable: AtomicBool,
    spawned: AtomicUsize,
    last_size: Mutex<Option<TerminalSize>>,
    resizes: Arc<Mutex<Vec<TerminalSize>>>,
}

impl LoopbackSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn last_size(&self) -> Option<TerminalSize> {
        *self.last_size.lock().unwrap()
    }

    pub fn resizes(&self) -> Vec<TerminalSize> {
        self.resizes.lock().unwrap().clone()
    }
}

impl ShellSpawner for LoopbackSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<ShellProcess, SpawnError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SpawnError::Unavailable("pty subsystem not ready".to_string()));
        }

        let (tx, rx) = std_mpsc::channel();
        tx.send(PROMPT.as_bytes().to_vec()).unwrap();
        let output: OutputSender = Arc::new(Mutex::new(Some(tx)));

        self.spawned.fetch_add(1, Ordering::SeqCst);
        *self.last_size.lock().unwrap() = Some(request.size);

        Ok(ShellProcess {
            pid: None,
            reader: Box::new(ChannelReader {
                rx,
                pending: Vec::new(),
            }),
            writer: Box::new(LoopbackWriter {
                output: Arc::clone(&output),
            }),
            control: Box::new(LoopbackControl {
                output,
                resizes: Arc::clone(&self.resizes),
            }),
        })
    }
}

struct ChannelReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct LoopbackWriter {
    output: OutputSender,
}

impl Write for LoopbackWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut output = self.output.lock().unwrap();
        let Some(tx) = output.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "shell exited"));
        };

        if buf.starts_with(b"exit") {
            output.take();
            return Ok(buf.len());
        }

        let mut echoed = b"echo: ".to_vec();
        echoed.extend_from_slice(buf);
        let _ = tx.send(echoed);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct LoopbackControl {
    output: OutputSender,
    resizes: Arc<Mutex<Vec<TerminalSize>>>,
}

impl ShellControl for LoopbackControl {
    fn resize(&mut self, size: TerminalSize) -> io::Result<()> {
        self.resizes.lock().unwrap().push(size);
        Ok(())
    }

    fn kill(&mut self) -> Option<i32> {
        self.output.lock().unwrap().take();
        Some(0)
    }
}

/// Client end of an in-memory connection to the agent
pub struct TestPeer {
    pub framed: Framed<DuplexStream, MessageCodec>,
    pub server: JoinHandle<DisconnectReason>,
    pub cancel: CancellationToken,
}

/// Serve a connection backed by `spawner` over an in-memory pipe
pub fn connect(spawner: Arc<dyn ShellSpawner>) -> TestPeer {
    connect_with(spawner, SessionSettings::default())
}

pub fn connect_with(spawner: Arc<dyn ShellSpawner>, settings: SessionSettings) -> TestPeer {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let connection = Connection::from_stream(ConnectionId::generate(), server, spawner, settings);
    let cancel = CancellationToken::new();
    let server = tokio::spawn(connection.run(cancel.clone()));

    TestPeer {
        framed: Framed::new(client, MessageCodec::new()),
        server,
        cancel,
    }
}

impl TestPeer {
    pub async fn send(&mut self, message: Message) {
        self.framed.send(message).await.expect("send failed");
    }

    /// Receive the next message, failing after five seconds
    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("decode failed")
    }

    /// Receive the next message if one arrives within `wait`
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Message> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            _ => None,
        }
    }

    /// Send a request and return the first non-output message
    pub async fn request(&mut self, message: Message) -> Message {
        self.send(message).await;
        loop {
            let response = self.recv().await;
            if !is_output(&response) {
                return response;
            }
        }
    }

    /// Collect shell output until it contains `needle`
    pub async fn output_until(&mut self, needle: &str) -> String {
        let mut collected = String::new();
        while !collected.contains(needle) {
            let message = self.recv().await;
            assert!(
                is_output(&message),
                "expected output, got {:?} while waiting for {:?}",
                message,
                needle
            );
            collected.push_str(&String::from_utf8_lossy(&message.body));
        }
        collected
    }
}

/// Whether a message is a chunk of shell output
pub fn is_output(message: &Message) -> bool {
    message.protocol() == Some(ProtocolType::Shell)
        && message.message_type == ShellMessageType::Shell.as_str()
}
