//! Ping command

use anyhow::{Context, Result};

use ds_core::config::ClientConfig;

use crate::client::ShellClient;
use crate::output::print_success;

/// Check that an agent answers on the control sub-protocol
pub async fn ping_command(config: &ClientConfig, count: u32) -> Result<()> {
    let mut client = ShellClient::connect(&config.address, config.connect_timeout)
        .await
        .with_context(|| format!("Failed to reach agent at {}", config.address))?;

    for seq in 1..=count.max(1) {
        let rtt = client.ping().await.context("Ping failed")?;
        print_success(&format!(
            "pong from {}: seq={} time={:.2}ms",
            config.address,
            seq,
            rtt.as_secs_f64() * 1000.0
        ));
    }

    Ok(())
}
