//! Outbound connection to the backend
//!
//! In dial mode the agent connects to the backend, announces itself with a
//! control `open` message and then serves the connection exactly like an
//! accepted one.

use std::sync::Arc;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ds_core::config::AgentConfig;
use ds_core::{ConfigError, ConnectionError, CredentialSource, FileTokenSource, StaticToken};
use ds_protocol::{
    ControlMessageType, Message, MessageCodec, PROP_AUTHORIZATION, PROP_DEVICE_ID,
};

use super::reconnect::ExponentialBackoff;

/// A framed connection to the backend
pub type BackendTransport = Framed<TcpStream, MessageCodec>;

/// Build the control handshake announcing this device
///
/// The authorization property is omitted when there is no token.
pub fn open_message(device_id: &str, token: &str) -> Message {
    let open = Message::control(ControlMessageType::Open).with_property(PROP_DEVICE_ID, device_id);
    if token.is_empty() {
        open
    } else {
        open.with_property(PROP_AUTHORIZATION, format!("Bearer {}", token))
    }
}

/// Dials the backend and performs the handshake
pub struct TunnelConnector {
    config: AgentConfig,
    backend_address: String,
    credentials: Arc<dyn CredentialSource>,
}

impl TunnelConnector {
    /// Create a connector using the given credential source
    pub fn new(
        config: AgentConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ConfigError> {
        let backend_address = config
            .backend_address
            .clone()
            .ok_or_else(|| ConfigError::MissingField("backend_address".to_string()))?;

        Ok(Self {
            config,
            backend_address,
            credentials,
        })
    }

    /// Create a connector reading the token from `auth_token_path`, if set
    pub fn from_config(config: AgentConfig) -> Result<Self, ConfigError> {
        let credentials: Arc<dyn CredentialSource> = match &config.auth_token_path {
            Some(path) => Arc::new(FileTokenSource::new(path)),
            None => Arc::new(StaticToken(None)),
        };
        Self::new(config, credentials)
    }

    /// Backend address being dialed
    pub fn backend_address(&self) -> &str {
        &self.backend_address
    }

    /// Attempt a single connection
    ///
    /// The credential is fetched again on every attempt, so a token that
    /// appears after startup is picked up by the next attempt.
    pub async fn try_connect(&self) -> Result<BackendTransport, ConnectionError> {
        let token = self.credentials.token().await?;

        tracing::debug!("Connecting to {}", self.backend_address);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.backend_address),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))?
        .map_err(|e| {
            ConnectionError::ConnectionRefused(format!(
                "failed to connect to {}: {}",
                self.backend_address, e
            ))
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let mut framed = Framed::new(stream, MessageCodec::new());
        let device_id = self.config.device_identity();
        framed.send(open_message(&device_id, &token)).await?;

        tracing::info!(
            "Connected to backend at {} as {}",
            self.backend_address,
            device_id
        );
        Ok(framed)
    }

    /// Connect, retrying with backoff until it succeeds or `cancel` fires
    ///
    /// Returns `None` when cancelled. The backoff is reset after a
    /// successful connection.
    pub async fn connect_with_retry(
        &self,
        backoff: &mut ExponentialBackoff,
        cancel: &CancellationToken,
    ) -> Option<BackendTransport> {
        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return None,
                attempt = self.try_connect() => attempt,
            };

            match attempt {
                Ok(transport) => {
                    backoff.reset();
                    return Some(transport);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!("Connection failed: {}. Retrying in {:?}", e, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_protocol::{Status, PROTO_TYPE_CONTROL};

    #[test]
    fn test_open_message_with_token() {
        let open = open_message("dev-1", "abc");
        assert_eq!(open.protocol_type, PROTO_TYPE_CONTROL);
        assert_eq!(open.message_type, "open");
        assert_eq!(open.property(PROP_DEVICE_ID), Some("dev-1"));
        assert_eq!(open.property(PROP_AUTHORIZATION), Some("Bearer abc"));
        assert_eq!(open.status(), None::<Status>);
    }

    #[test]
    fn test_open_message_without_token() {
        let open = open_message("dev-1", "");
        assert!(open.property(PROP_AUTHORIZATION).is_none());
    }

    #[test]
    fn test_connector_requires_backend() {
        let result = TunnelConnector::from_config(AgentConfig::default());
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[tokio::test]
    async fn test_missing_token_fails_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            backend_address: Some("127.0.0.1:9".to_string()),
            auth_token_path: Some(dir.path().join("token")),
            ..Default::default()
        };
        let connector = TunnelConnector::from_config(config).unwrap();
        assert!(matches!(
            connector.try_connect().await,
            Err(ConnectionError::CredentialsUnavailable(_))
        ));
    }
}
