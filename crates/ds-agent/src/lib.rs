//! ds-agent: Device agent for devshell
//!
//! The agent owns shell sessions on a device and serves the session
//! protocol, either by accepting connections (listen mode) or by dialing a
//! backend and keeping that connection alive (dial mode).

pub mod connection;
pub mod server;
pub mod session;
pub mod shell;
pub mod state;
pub mod tunnel;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ds_core::config::{AgentConfig, AgentMode};

pub use connection::{Connection, DisconnectReason};
pub use server::ShellServer;
pub use state::AgentState;

/// Run the agent in its configured mode until `cancel` fires
pub async fn run(config: AgentConfig, cancel: CancellationToken) -> Result<()> {
    config.validate().context("Invalid agent configuration")?;
    run_with_state(Arc::new(AgentState::new(config)), cancel).await
}

/// Run the agent with prepared state
pub async fn run_with_state(state: Arc<AgentState>, cancel: CancellationToken) -> Result<()> {
    // Spawns re-check this on every request; failing here only warns
    if let Err(e) = state.spawner.probe() {
        tracing::warn!("Shell not available yet: {}", e);
    }

    match state.config.mode {
        AgentMode::Listen => {
            let address = state.config.listen_address.clone();
            ShellServer::new(Arc::clone(&state), cancel)
                .run(&address)
                .await
        }
        AgentMode::Dial => {
            let connector = tunnel::TunnelConnector::from_config(state.config.clone())
                .context("Failed to create backend connector")?;
            tracing::info!("Dialing backend at {}", connector.backend_address());
            tunnel::run_dial(state, connector, cancel).await
        }
    }
}
