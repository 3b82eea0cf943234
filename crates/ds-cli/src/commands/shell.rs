//! Interactive shell command

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;

use ds_core::config::ClientConfig;
use ds_protocol::{ShellMessageType, Status, TerminalSize};

use crate::client::ShellClient;
use crate::output::{print_info, print_success};

/// Start a shell on the agent and relay the local terminal to it
///
/// Returns when the user detaches (Ctrl+]) or the remote shell exits.
pub async fn shell_command(config: &ClientConfig) -> Result<()> {
    let mut client = ShellClient::connect(&config.address, config.connect_timeout)
        .await
        .with_context(|| format!("Failed to reach agent at {}", config.address))?;

    let size = local_size().unwrap_or(config.terminal);
    let session_id = client
        .start_shell(size)
        .await
        .context("Failed to start shell")?;

    print_success(&format!("Shell started ({})", session_id.as_str()));
    print_info("Press Ctrl+] to detach");

    enable_raw_mode()?;
    let result = relay(&mut client).await;
    disable_raw_mode()?;

    let exited = result?;
    if exited {
        print_info("Remote shell exited");
    } else {
        if let Err(e) = client.stop_shell().await {
            tracing::warn!("Failed to stop shell: {}", e);
        }
        print_success("Detached, shell stopped");
    }
    Ok(())
}

fn local_size() -> Option<TerminalSize> {
    terminal::size()
        .ok()
        .map(|(cols, rows)| TerminalSize::new(rows, cols))
}

/// Relay terminal events and shell output until detach or exit
///
/// Returns true when the remote shell exited.
async fn relay(client: &mut ShellClient) -> Result<bool> {
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(256);

    let event_handle = tokio::task::spawn_blocking(move || loop {
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            match event::read() {
                Ok(evt) => {
                    if event_tx.blocking_send(evt).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        } else if event_tx.is_closed() {
            break;
        }
    });

    let mut stdout = std::io::stdout();

    let exited = loop {
        tokio::select! {
            Some(evt) = event_rx.recv() => match evt {
                Event::Key(KeyEvent { code, modifiers, kind, .. }) => {
                    if kind == KeyEventKind::Release {
                        continue;
                    }
                    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char(']') {
                        break false;
                    }
                    let data = key_to_bytes(code, modifiers);
                    if !data.is_empty() {
                        client.send_input(data).await?;
                    }
                }
                Event::Paste(text) => client.send_input(text.into_bytes()).await?,
                Event::Resize(cols, rows) => {
                    client.resize(TerminalSize::new(rows, cols)).await?;
                }
                _ => {}
            },

            message = client.recv() => {
                let Some(message) = message? else {
                    break true;
                };
                match (ShellMessageType::parse(&message.message_type), message.status()) {
                    (Some(ShellMessageType::Shell), Some(Status::Normal)) => {
                        stdout.write_all(&message.body)?;
                        stdout.flush()?;
                    }
                    _ if message.is_exit_notice() => break true,
                    (_, Some(Status::Error)) => {
                        tracing::warn!(
                            "{} failed: {}",
                            message.message_type,
                            String::from_utf8_lossy(&message.body)
                        );
                    }
                    _ => {}
                }
            }
        }
    };

    drop(event_rx);
    let _ = event_handle.await;
    Ok(exited)
}

/// Convert a key event to the bytes a terminal would send
fn key_to_bytes(code: KeyCode, modifiers: KeyModifiers) -> Vec<u8> {
    use KeyCode::*;

    match code {
        Char(c) => {
            if modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() {
                // Ctrl+A = 0x01, Ctrl+B = 0x02, etc.
                vec![(c.to_ascii_lowercase() as u8) - b'a' + 1]
            } else if modifiers.contains(KeyModifiers::ALT) {
                let mut bytes = vec![0x1b];
                bytes.extend_from_slice(c.to_string().as_bytes());
                bytes
            } else {
                c.to_string().into_bytes()
            }
        }
        Enter => vec![b'\r'],
        Tab => vec![b'\t'],
        BackTab => b"\x1b[Z".to_vec(),
        Backspace => vec![0x7f],
        Esc => vec![0x1b],
        Up => b"\x1b[A".to_vec(),
        Down => b"\x1b[B".to_vec(),
        Right => b"\x1b[C".to_vec(),
        Left => b"\x1b[D".to_vec(),
        Home => b"\x1b[H".to_vec(),
        End => b"\x1b[F".to_vec(),
        PageUp => b"\x1b[5~".to_vec(),
        PageDown => b"\x1b[6~".to_vec(),
        Delete => b"\x1b[3~".to_vec(),
        Insert => b"\x1b[2~".to_vec(),
        F(n) => match n {
            1 => b"\x1bOP".to_vec(),
            2 => b"\x1bOQ".to_vec(),
            3 => b"\x1bOR".to_vec(),
            4 => b"\x1bOS".to_vec(),
            5 => b"\x1b[15~".to_vec(),
            6 => b"\x1b[17~".to_vec(),
            7 => b"\x1b[18~".to_vec(),
            8 => b"\x1b[19~".to_vec(),
            9 => b"\x1b[20~".to_vec(),
            10 => b"\x1b[21~".to_vec(),
            11 => b"\x1b[23~".to_vec(),
            12 => b"\x1b[24~".to_vec(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_keys() {
        assert_eq!(
            key_to_bytes(KeyCode::Char('c'), KeyModifiers::CONTROL),
            vec![0x03]
        );
        assert_eq!(
            key_to_bytes(KeyCode::Char('D'), KeyModifiers::CONTROL),
            vec![0x04]
        );
    }

    #[test]
    fn test_plain_and_special_keys() {
        assert_eq!(key_to_bytes(KeyCode::Char('é'), KeyModifiers::NONE), "é".as_bytes());
        assert_eq!(key_to_bytes(KeyCode::Enter, KeyModifiers::NONE), b"\r");
        assert_eq!(key_to_bytes(KeyCode::Up, KeyModifiers::NONE), b"\x1b[A");
        assert_eq!(
            key_to_bytes(KeyCode::Char('x'), KeyModifiers::ALT),
            b"\x1bx"
        );
        assert!(key_to_bytes(KeyCode::F(13), KeyModifiers::NONE).is_empty());
    }
}
