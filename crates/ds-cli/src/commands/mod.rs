//! CLI command implementations

mod agent;
mod config;
mod ping;
mod run;
mod shell;

pub use agent::{agent_command, AgentOverrides};
pub use config::{config_get, config_init, config_path, config_set, config_show};
pub use ping::ping_command;
pub use run::run_command;
pub use shell::shell_command;
