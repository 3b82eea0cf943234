//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use ds_protocol::TerminalSize;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// How the agent obtains its connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Accept connections on `listen_address`
    Listen,
    /// Dial `backend_address` and keep that connection alive
    Dial,
}

/// Configuration for the device agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Listen for clients or dial a backend
    pub mode: AgentMode,

    /// Address to bind in listen mode
    pub listen_address: String,

    /// Backend to dial in dial mode
    pub backend_address: Option<String>,

    /// File holding the bearer token sent in the dial-mode handshake.
    ///
    /// Re-read on every connection attempt; the file may appear after the
    /// agent has started.
    pub auth_token_path: Option<PathBuf>,

    /// Device identity announced to the backend (defaults to hostname)
    pub device_id: Option<String>,

    /// Shell to spawn (defaults to `$SHELL`, then `/bin/sh`)
    pub shell: Option<String>,

    /// Environment variables for spawned shells
    pub default_env: Vec<(String, String)>,

    /// Maximum number of concurrently running shells per connection
    pub max_sessions: u32,

    /// Maximum number of concurrent connections in listen mode
    pub max_connections: Option<u32>,

    /// Terminal size used when a spawn request carries none
    pub terminal: TerminalSize,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,

    /// Connection timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::Listen,
            listen_address: "127.0.0.1:8520".to_string(),
            backend_address: None,
            auth_token_path: None,
            device_id: None,
            shell: None,
            default_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            max_sessions: 1,
            max_connections: None,
            terminal: TerminalSize::default(),
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// Get the device identity, falling back to hostname
    pub fn device_identity(&self) -> String {
        self.device_id
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Check the configuration for the selected mode
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_sessions must be at least 1".to_string(),
            ));
        }

        if self.max_connections == Some(0) {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1 when set".to_string(),
            ));
        }

        if self.mode == AgentMode::Dial && self.backend_address.is_none() {
            return Err(ConfigError::MissingField("backend_address".to_string()));
        }

        if self.backoff.multiplier < 1.0 || !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::Invalid(
                "backoff multiplier must be >= 1 and jitter within 0..=1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay in milliseconds
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay in milliseconds
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_sessions, 1);
    }

    #[test]
    fn test_dial_requires_backend() {
        let config = AgentConfig {
            mode: AgentMode::Dial,
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let config = AgentConfig {
            max_sessions: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_connections_rejected() {
        let config = AgentConfig {
            max_connections: Some(0),
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = AgentConfig {
            max_connections: Some(1),
            ..AgentConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_device_identity_override() {
        let config = AgentConfig {
            device_id: Some("rpi-42".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(config.device_identity(), "rpi-42");
        assert!(!AgentConfig::default().device_identity().is_empty());
    }

    #[test]
    fn test_backoff_parses_millis() {
        let config: BackoffConfig =
            toml::from_str("initial = 250\nmax = 4000\nmultiplier = 1.5\njitter = 0.0\n").unwrap();
        assert_eq!(config.initial, Duration::from_millis(250));
        assert_eq!(config.max, Duration::from_secs(4));
    }
}
