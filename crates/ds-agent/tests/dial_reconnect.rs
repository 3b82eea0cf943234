//! Dial-mode tests against a fake backend
//!
//! The backend is a plain TCP listener speaking the framed protocol.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ds_agent::tunnel::{run_dial, TunnelConnector};
use ds_agent::AgentState;
use ds_core::config::{AgentConfig, AgentMode, BackoffConfig};
use ds_protocol::{
    Message, MessageCodec, ShellMessageType, Status, PROP_AUTHORIZATION, PROP_DEVICE_ID,
    PROTO_TYPE_CONTROL,
};

use common::{is_output, LoopbackSpawner};

type Backend = Framed<TcpStream, MessageCodec>;

fn dial_config(backend: String, token_path: std::path::PathBuf) -> AgentConfig {
    AgentConfig {
        mode: AgentMode::Dial,
        backend_address: Some(backend),
        auth_token_path: Some(token_path),
        device_id: Some("test-device".to_string()),
        backoff: BackoffConfig {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        },
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

async fn accept(listener: &TcpListener) -> Backend {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("agent did not connect")
        .unwrap();
    Framed::new(stream, MessageCodec::new())
}

async fn recv(backend: &mut Backend) -> Message {
    timeout(Duration::from_secs(5), backend.next())
        .await
        .expect("timed out waiting for the agent")
        .expect("agent closed the connection")
        .unwrap()
}

async fn spawn_shell(backend: &mut Backend) -> Message {
    backend
        .send(Message::shell(ShellMessageType::SpawnShell))
        .await
        .unwrap();
    loop {
        let message = recv(backend).await;
        if !is_output(&message) {
            return message;
        }
    }
}

#[tokio::test]
async fn test_token_appears_after_start_then_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_address = listener.local_addr().unwrap().to_string();

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");

    let config = dial_config(backend_address, token_path.clone());
    let spawner = LoopbackSpawner::new();
    let state = Arc::new(AgentState::with_spawner(config.clone(), spawner.clone()));
    let connector = TunnelConnector::from_config(config).unwrap();

    let cancel = CancellationToken::new();
    let agent = tokio::spawn(run_dial(state.clone(), connector, cancel.clone()));

    // Without a token the agent keeps retrying but never connects
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );

    std::fs::write(&token_path, "secret-token\n").unwrap();

    let mut backend = accept(&listener).await;
    let open = recv(&mut backend).await;
    assert_eq!(open.protocol_type, PROTO_TYPE_CONTROL);
    assert_eq!(open.message_type, "open");
    assert_eq!(open.property(PROP_AUTHORIZATION), Some("Bearer secret-token"));
    assert_eq!(open.property(PROP_DEVICE_ID), Some("test-device"));

    let started = spawn_shell(&mut backend).await;
    assert_eq!(started.status(), Some(Status::Normal));
    let first_session = started.session_id().unwrap();

    // Backend goes away; the agent tears the session down and dials again
    drop(backend);

    let mut backend = accept(&listener).await;
    let open = recv(&mut backend).await;
    assert_eq!(open.message_type, "open");

    let restarted = spawn_shell(&mut backend).await;
    assert_eq!(restarted.status(), Some(Status::Normal));
    assert_ne!(restarted.session_id(), Some(first_session));
    assert_eq!(spawner.spawn_count(), 2);
    assert_eq!(state.connection_count(), 1);

    cancel.cancel();
    timeout(Duration::from_secs(5), agent)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(state.connection_count(), 0);
}

#[tokio::test]
async fn test_backend_down_at_start() {
    // Reserve a port, then free it so the first attempts are refused
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = probe.local_addr().unwrap();
    drop(probe);

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "t").unwrap();

    let config = dial_config(address.to_string(), token_path);
    let state = Arc::new(AgentState::with_spawner(
        config.clone(),
        LoopbackSpawner::new(),
    ));
    let connector = TunnelConnector::from_config(config).unwrap();

    let cancel = CancellationToken::new();
    let agent = tokio::spawn(run_dial(state, connector, cancel.clone()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let listener = TcpListener::bind(address).await.unwrap();

    let mut backend = accept(&listener).await;
    let open = recv(&mut backend).await;
    assert_eq!(open.property(PROP_AUTHORIZATION), Some("Bearer t"));

    cancel.cancel();
    timeout(Duration::from_secs(5), agent)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
