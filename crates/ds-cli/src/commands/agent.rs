//! Agent command: serve shell sessions from this binary

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ds_core::config::{AgentConfig, AgentMode};

use crate::output::print_info;

/// Command-line overrides for the agent configuration
#[derive(Debug, Default, Clone)]
pub struct AgentOverrides {
    pub listen: Option<String>,
    pub backend: Option<String>,
    pub token_file: Option<PathBuf>,
    pub device_id: Option<String>,
    pub shell: Option<String>,
    pub max_sessions: Option<u32>,
}

impl AgentOverrides {
    /// Apply the overrides; a backend address selects dial mode
    pub fn apply(self, config: &mut AgentConfig) {
        if let Some(listen) = self.listen {
            config.listen_address = listen;
            config.mode = AgentMode::Listen;
        }
        if let Some(backend) = self.backend {
            config.backend_address = Some(backend);
            config.mode = AgentMode::Dial;
        }
        if let Some(path) = self.token_file {
            config.auth_token_path = Some(path);
        }
        if let Some(device_id) = self.device_id {
            config.device_id = Some(device_id);
        }
        if let Some(shell) = self.shell {
            config.shell = Some(shell);
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
    }
}

/// Run the agent in the foreground until Ctrl-C
pub async fn agent_command(mut config: AgentConfig, overrides: AgentOverrides) -> Result<()> {
    overrides.apply(&mut config);
    config.validate().context("Invalid agent configuration")?;

    match config.mode {
        AgentMode::Listen => print_info(&format!(
            "Agent listening on {} (Ctrl-C to stop)",
            config.listen_address
        )),
        AgentMode::Dial => print_info(&format!(
            "Agent dialing {} (Ctrl-C to stop)",
            config.backend_address.as_deref().unwrap_or("-")
        )),
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown..."),
            _ = terminate => tracing::info!("Received SIGTERM, initiating shutdown..."),
        }

        shutdown.cancel();
    });

    ds_agent::run(config, cancel).await
}
