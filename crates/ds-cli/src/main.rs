//! devshell CLI
//!
//! Single binary for the client side of the shell protocol:
//! - Agent (serves shells on this machine)
//! - Interactive shell and one-shot commands against an agent
//! - Configuration management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devshell::commands::{self, AgentOverrides};
use devshell::output::print_error;
use ds_core::config::{self, ClientConfig, ConfigFile};

#[derive(Parser)]
#[command(name = "devshell")]
#[command(author, version, about = "Remote shell sessions over a framed protocol")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent that serves shell sessions on this machine
    Agent {
        /// Listen for clients on this address
        #[arg(short, long)]
        listen: Option<String>,
        /// Dial a backend at this address instead of listening
        #[arg(short, long)]
        backend: Option<String>,
        /// File holding the bearer token for the backend handshake
        #[arg(long)]
        token_file: Option<PathBuf>,
        /// Device identity announced to the backend
        #[arg(long)]
        device_id: Option<String>,
        /// Shell to spawn
        #[arg(long)]
        shell: Option<String>,
        /// Maximum concurrently running shells per connection
        #[arg(long)]
        max_sessions: Option<u32>,
    },

    /// Open an interactive shell on an agent
    Shell {
        /// Agent address (overrides config)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Run one command in a fresh shell and print its output
    Run {
        /// Command line to send to the shell
        command: String,
        /// Agent address (overrides config)
        #[arg(short, long)]
        address: Option<String>,
        /// Milliseconds of silence that end output collection
        #[arg(long)]
        idle_ms: Option<u64>,
    },

    /// Check that an agent is answering
    Ping {
        /// Agent address (overrides config)
        #[arg(short, long)]
        address: Option<String>,
        /// Number of pings to send
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Get a config value (e.g. client.address)
    Get {
        /// Dotted key path
        key: String,
    },
    /// Set a config value
    Set {
        /// Dotted key path
        key: String,
        /// New value
        value: String,
    },
    /// Show config file path
    Path,
}

fn load_file(path: Option<&PathBuf>) -> Result<ConfigFile> {
    let path = path.cloned().unwrap_or_else(config::default_config_path);
    config::load_or_default(&path).with_context(|| format!("Failed to load config from {:?}", path))
}

fn client_config(
    path: Option<&PathBuf>,
    address: Option<String>,
    idle_ms: Option<u64>,
) -> Result<ClientConfig> {
    let mut client = load_file(path)?.client;
    if let Some(address) = address {
        client.address = address;
    }
    if let Some(ms) = idle_ms {
        client.idle_timeout = Duration::from_millis(ms);
    }
    Ok(client)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Agent {
            listen,
            backend,
            token_file,
            device_id,
            shell,
            max_sessions,
        } => {
            let agent = load_file(config_path)?.agent;
            let overrides = AgentOverrides {
                listen,
                backend,
                token_file,
                device_id,
                shell,
                max_sessions,
            };
            commands::agent_command(agent, overrides).await
        }
        Commands::Shell { address } => {
            let client = client_config(config_path, address, None)?;
            commands::shell_command(&client).await
        }
        Commands::Run {
            command,
            address,
            idle_ms,
        } => {
            let client = client_config(config_path, address, idle_ms)?;
            commands::run_command(&client, &command).await
        }
        Commands::Ping { address, count } => {
            let client = client_config(config_path, address, None)?;
            commands::ping_command(&client, count).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, force),
            ConfigAction::Get { key } => commands::config_get(config_path, &key),
            ConfigAction::Set { key, value } => commands::config_set(config_path, &key, &value),
            ConfigAction::Path => {
                commands::config_path(config_path);
                Ok(())
            }
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = dispatch(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
