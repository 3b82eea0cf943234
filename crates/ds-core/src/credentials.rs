//! Bearer credentials for the backend handshake
//!
//! A dialing agent attaches a bearer token to its `open` handshake. The
//! token is provided by another local service and may not exist yet when
//! the agent starts, so sources are queried on every connection attempt
//! instead of once at startup.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ConnectionError;

/// Provides the bearer token attached to the transport handshake
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch the current token
    ///
    /// Returns `ConnectionError::CredentialsUnavailable` while the token
    /// cannot be obtained; callers retry on their next attempt.
    async fn token(&self) -> Result<String, ConnectionError>;
}

/// Reads the token from a file each time it is requested
#[derive(Debug, Clone)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    /// Create a source reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialSource for FileTokenSource {
    async fn token(&self) -> Result<String, ConnectionError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ConnectionError::CredentialsUnavailable(format!(
                "cannot read token from {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let token = content.trim();
        if token.is_empty() {
            return Err(ConnectionError::CredentialsUnavailable(format!(
                "token file {} is empty",
                self.path.display()
            )));
        }

        tracing::debug!("Loaded bearer token from {:?}", self.path);
        Ok(token.to_string())
    }
}

/// A fixed token, or none at all
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl CredentialSource for StaticToken {
    async fn token(&self) -> Result<String, ConnectionError> {
        Ok(self.0.clone().unwrap_or_default())
    }
}
