//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ds_protocol::TerminalSize;

use super::serde_utils::{duration_millis, duration_secs};

/// Configuration for the `devshell` client commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Agent address to connect to
    pub address: String,

    /// How long output collection waits for more data before returning
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    /// Connection timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Terminal size requested when the local size is unknown
    pub terminal: TerminalSize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8520".to_string(),
            idle_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            terminal: TerminalSize::default(),
        }
    }
}
