//! devshell agent daemon
//!
//! Serves remote shell sessions on this device, either listening for
//! clients or dialing a backend.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ds_core::config::{self, AgentConfig, AgentMode};

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Listen,
    Dial,
}

#[derive(Parser)]
#[command(name = "ds-agent")]
#[command(about = "devshell agent - serves remote shell sessions")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen for clients or dial a backend
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Address to listen on (listen mode)
    #[arg(short, long)]
    listen: Option<String>,

    /// Backend address to dial (implies dial mode)
    #[arg(short, long)]
    backend: Option<String>,

    /// File holding the bearer token for the backend handshake
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Device identity announced to the backend (defaults to hostname)
    #[arg(long)]
    device_id: Option<String>,

    /// Shell to spawn
    #[arg(long)]
    shell: Option<String>,

    /// Maximum concurrently running shells per connection
    #[arg(long)]
    max_sessions: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(self, config: &mut AgentConfig) {
        if let Some(backend) = self.backend {
            config.backend_address = Some(backend);
            config.mode = AgentMode::Dial;
        }
        if let Some(mode) = self.mode {
            config.mode = match mode {
                ModeArg::Listen => AgentMode::Listen,
                ModeArg::Dial => AgentMode::Dial,
            };
        }
        if let Some(listen) = self.listen {
            config.listen_address = listen;
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

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("devshell agent starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut agent_config = config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?
        .agent;
    args.apply(&mut agent_config);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            shutdown.cancel();
        }
    });

    ds_agent::run(agent_config, cancel).await
}
