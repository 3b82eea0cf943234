//! Shell output relay
//!
//! Each running session has one blocking reader task that forwards shell
//! output to the connection's event loop. The relay never writes to the
//! transport itself; the event loop decides whether a chunk may still be
//! emitted.

use std::io::Read;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ds_protocol::SessionId;

/// Read buffer size for shell output
const RELAY_BUFFER_SIZE: usize = 4096;

/// Event sent from a relay task to the connection event loop
#[derive(Debug)]
pub enum RelayEvent {
    /// Output read from the shell
    Output { session_id: SessionId, data: Bytes },
    /// The shell's output reached EOF without the session being stopped
    Closed { session_id: SessionId },
}

/// Spawn a blocking task to read shell output and send it to the channel.
///
/// The token is cancelled when the session is stopped. It is checked before
/// every send, and a cancelled relay exits without reporting `Closed`.
pub fn spawn_output_relay(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; RELAY_BUFFER_SIZE];

        loop {
            if cancel.is_cancelled() {
                tracing::debug!("Output relay cancelled for {}", session_id);
                return;
            }

            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("Output relay EOF for {}", session_id);
                    break;
                }
                Ok(n) => {
                    if cancel.is_cancelled() {
                        tracing::debug!("Dropping {} bytes read after stop of {}", n, session_id);
                        return;
                    }
                    let event = RelayEvent::Output {
                        session_id: session_id.clone(),
                        data: Bytes::copy_from_slice(&buf[..n]),
                    };
                    if tx.blocking_send(event).is_err() {
                        tracing::debug!("Relay channel closed for {}", session_id);
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // A PTY master reports EIO once the shell side has closed
                    if cancel.is_cancelled() {
                        tracing::debug!("Output relay stopped for {} (cancelled)", session_id);
                        return;
                    }
                    tracing::debug!("Output relay closed for {}: {}", session_id, e);
                    break;
                }
            }
        }

        if !cancel.is_cancelled() {
            let _ = tx.blocking_send(RelayEvent::Closed { session_id });
        }
    })
}
