//! Listen-mode server
//!
//! Accepts incoming TCP connections and serves each on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::state::AgentState;

/// Server that accepts client connections directly
pub struct ShellServer {
    /// Shared agent state
    state: Arc<AgentState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl ShellServer {
    /// Create a new server
    pub fn new(state: Arc<AgentState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Bind `bind_addr` and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.run_with_listener(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Agent listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let live = self.state.connections();
                    tracing::info!("Server shutting down ({} live connections)", live.len());
                    for (id, info) in live {
                        tracing::debug!("{} from {:?} still open", id, info.peer);
                    }
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let guard = match self.state.register_connection(Some(peer_addr)) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Rejecting connection from {}: {}", peer_addr, e);
                return;
            }
        };

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        tracing::info!("New connection from {} ({})", peer_addr, guard.id());

        let connection = Connection::from_stream(
            guard.id(),
            socket,
            Arc::clone(&self.state.spawner),
            self.state.settings(),
        );
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let reason = connection.run(cancel).await;
            tracing::info!("Connection from {} closed: {}", peer_addr, reason);
            drop(guard);
        });
    }
}
