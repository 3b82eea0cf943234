//! Agent state management

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

use ds_core::config::{AgentConfig, AgentMode};
use ds_core::time::current_time_millis;
use ds_core::{ConnectionError, ConnectionId};

use crate::session::SessionSettings;
use crate::shell::{PtySpawner, ShellSpawner};

/// A live connection served by the agent
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address, when the transport has one
    pub peer: Option<SocketAddr>,
    /// Connection start (Unix millis)
    pub connected_at: u64,
}

/// Global state for the agent daemon
pub struct AgentState {
    /// Configuration
    pub config: AgentConfig,
    /// Spawner shared by every connection
    pub spawner: Arc<dyn ShellSpawner>,
    /// Live connections
    connections: DashMap<ConnectionId, ConnectionInfo>,
}

impl AgentState {
    /// Create agent state spawning PTY shells as configured
    pub fn new(config: AgentConfig) -> Self {
        let spawner = PtySpawner::new(config.shell.clone(), config.default_env.clone());
        Self::with_spawner(config, Arc::new(spawner))
    }

    /// Create agent state with a custom spawner
    pub fn with_spawner(config: AgentConfig, spawner: Arc<dyn ShellSpawner>) -> Self {
        Self {
            config,
            spawner,
            connections: DashMap::new(),
        }
    }

    /// Session settings applied to every connection
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            max_sessions: self.config.max_sessions.max(1) as usize,
            default_size: self.config.terminal,
        }
    }

    /// Track a new connection
    ///
    /// In listen mode this fails once `max_connections` connections are
    /// live; a dialing agent holds one backend connection and is never
    /// limited. The connection is untracked when the returned guard is
    /// dropped.
    pub fn register_connection(
        self: &Arc<Self>,
        peer: Option<SocketAddr>,
    ) -> Result<ConnectionGuard, ConnectionError> {
        if let (AgentMode::Listen, Some(limit)) = (self.config.mode, self.config.max_connections) {
            if self.connections.len() >= limit as usize {
                return Err(ConnectionError::LimitReached(limit));
            }
        }

        let id = ConnectionId::generate();
        self.connections.insert(
            id,
            ConnectionInfo {
                peer,
                connected_at: current_time_millis(),
            },
        );
        tracing::debug!("{} registered ({} live)", id, self.connections.len());

        Ok(ConnectionGuard {
            id,
            state: Arc::clone(self),
        })
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of live connections
    pub fn connections(&self) -> Vec<(ConnectionId, ConnectionInfo)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

/// Keeps a connection registered while alive
pub struct ConnectionGuard {
    id: ConnectionId,
    state: Arc<AgentState>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some((id, info)) = self.state.connections.remove(&self.id) {
            tracing::debug!(
                "{} unregistered after {:?}",
                id,
                ds_core::time::elapsed_since(info.connected_at)
            );
        }
    }
}
