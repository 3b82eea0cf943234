//! Dial mode: keeping a connection to the backend

mod connector;
mod reconnect;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, DisconnectReason};
use crate::state::AgentState;

pub use connector::{open_message, BackendTransport, TunnelConnector};
pub use reconnect::ExponentialBackoff;

/// Dial the backend and serve it, reconnecting after every disconnect
///
/// Sessions of a lost connection are torn down before reconnecting. Runs
/// until `cancel` fires.
pub async fn run_dial(
    state: Arc<AgentState>,
    connector: TunnelConnector,
    cancel: CancellationToken,
) -> Result<()> {
    let mut backoff = ExponentialBackoff::from_config(&state.config.backoff);

    loop {
        let Some(transport) = connector.connect_with_retry(&mut backoff, &cancel).await else {
            break;
        };

        let peer = transport.get_ref().peer_addr().ok();
        let guard = state.register_connection(peer)?;

        let connection = Connection::new(
            guard.id(),
            transport,
            Arc::clone(&state.spawner),
            state.settings(),
        );
        let reason = connection.run(cancel.clone()).await;
        drop(guard);

        if reason == DisconnectReason::Shutdown {
            break;
        }

        let delay = backoff.next_delay();
        tracing::warn!(
            "Disconnected from {}: {}. Reconnecting in {:?}",
            connector.backend_address(),
            reason,
            delay
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!("Dial loop stopped");
    Ok(())
}
