//! One-shot command execution

use std::io::Write;

use anyhow::{Context, Result};

use ds_core::config::ClientConfig;

use crate::client::ShellClient;
use crate::output::print_warning;

/// Start a shell, send one command line, print its output and stop the shell
pub async fn run_command(config: &ClientConfig, command: &str) -> Result<()> {
    let mut client = ShellClient::connect(&config.address, config.connect_timeout)
        .await
        .with_context(|| format!("Failed to reach agent at {}", config.address))?;

    client
        .start_shell(config.terminal)
        .await
        .context("Failed to start shell")?;

    let mut line = command.to_string();
    if !line.ends_with('\n') {
        line.push('\n');
    }
    client.send_input(line.into_bytes()).await?;

    let output = client.recv_output(config.idle_timeout).await?;

    let mut stdout = std::io::stdout();
    stdout.write_all(&output.data)?;
    stdout.flush()?;

    if output.closed {
        print_warning("Remote shell exited");
        return Ok(());
    }

    client.stop_shell().await.context("Failed to stop shell")?;
    Ok(())
}
