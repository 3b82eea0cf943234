//! PTY-backed shells
//!
//! Spawns shells on pseudo-terminals using the portable-pty crate.

use std::io;
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair, PtySize};

use ds_protocol::TerminalSize;

use super::{ShellControl, ShellProcess, ShellSpawner, SpawnError, SpawnRequest};

/// Allowed shell paths for security (prevents arbitrary command execution)
const ALLOWED_SHELLS_UNIX: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/zsh",
    "/bin/fish",
    "/bin/dash",
    "/bin/ash",
    "/bin/ksh",
    "/usr/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/zsh",
    "/usr/bin/fish",
    "/usr/bin/dash",
    "/usr/bin/ksh",
    "/usr/local/bin/bash",
    "/usr/local/bin/zsh",
    "/usr/local/bin/fish",
];

const ALLOWED_SHELLS_WINDOWS: &[&str] = &[
    "cmd.exe",
    "powershell.exe",
    "pwsh.exe",
    "C:\\Windows\\System32\\cmd.exe",
    "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
];

/// Validate that a shell path is allowed and currently present
///
/// A shell outside the allow-list (and `/etc/shells`) is a permanent
/// failure. An allowed shell that does not exist yet is reported as
/// unavailable so the next spawn request checks again.
fn validate_shell_path(shell: &str) -> Result<String, SpawnError> {
    let allowed = if cfg!(windows) {
        ALLOWED_SHELLS_WINDOWS
    } else {
        ALLOWED_SHELLS_UNIX
    };

    let shell_lower = shell.to_lowercase();
    let mut is_allowed = allowed.iter().any(|s| s.to_lowercase() == shell_lower);

    #[cfg(unix)]
    if !is_allowed {
        if let Ok(shells) = std::fs::read_to_string("/etc/shells") {
            is_allowed = shells.lines().any(|line| {
                let line = line.trim();
                !line.starts_with('#') && line == shell
            });
        }
    }

    if !is_allowed {
        return Err(SpawnError::Failed(format!(
            "shell '{}' is not in the allowed shell list",
            shell
        )));
    }

    if !cfg!(windows) && !Path::new(shell).exists() {
        return Err(SpawnError::Unavailable(format!(
            "shell '{}' does not exist",
            shell
        )));
    }

    Ok(shell.to_string())
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Spawns shells on freshly opened pseudo-terminals
///
/// Holds no PTY state between requests: the PTY system is opened per spawn,
/// so a PTY subsystem that was unavailable earlier is retried every time.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    /// Configured shell (None = `$SHELL`, then platform default)
    shell: Option<String>,
    /// Environment variables for every shell
    env: Vec<(String, String)>,
}

impl PtySpawner {
    /// Create a spawner with the given shell and environment
    pub fn new(shell: Option<String>, env: Vec<(String, String)>) -> Self {
        Self { shell, env }
    }

    fn requested_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    "cmd.exe".to_string()
                } else {
                    "/bin/sh".to_string()
                }
            })
    }
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self::new(
            None,
            vec![("TERM".to_string(), "xterm-256color".to_string())],
        )
    }
}

impl ShellSpawner for PtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<ShellProcess, SpawnError> {
        let shell_path = validate_shell_path(&self.requested_shell())?;

        tracing::info!(
            "Spawning {} with size {}x{}",
            shell_path,
            request.size.cols,
            request.size.rows
        );

        let PtyPair { master, slave } = native_pty_system()
            .openpty(pty_size(request.size))
            .map_err(|e| SpawnError::Unavailable(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&shell_path);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| SpawnError::Failed(format!("failed to spawn {}: {}", shell_path, e)))?;

        // Only the child holds the slave side, so the reader sees EOF on exit
        drop(slave);

        let pid = child.process_id();
        tracing::info!("Spawned shell process with PID: {:?}", pid);

        let reader = master
            .try_clone_reader()
            .map_err(|e| SpawnError::Failed(format!("failed to clone PTY reader: {}", e)))?;

        let writer = master
            .take_writer()
            .map_err(|e| SpawnError::Failed(format!("failed to take PTY writer: {}", e)))?;

        Ok(ShellProcess {
            pid,
            reader,
            writer,
            control: Box::new(PtyControl { master, child }),
        })
    }

    fn probe(&self) -> Result<(), SpawnError> {
        validate_shell_path(&self.requested_shell())?;
        native_pty_system()
            .openpty(pty_size(TerminalSize::default()))
            .map(|_| ())
            .map_err(|e| SpawnError::Unavailable(format!("failed to open PTY: {}", e)))
    }
}

/// Resize/kill handle of a PTY shell
struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl ShellControl for PtyControl {
    fn resize(&mut self, size: TerminalSize) -> io::Result<()> {
        tracing::debug!("Resizing PTY to {}x{}", size.cols, size.rows);
        self.master
            .resize(pty_size(size))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    fn kill(&mut self) -> Option<i32> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status.exit_code() as i32);
        }

        let _ = self.child.kill();
        match self.child.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(e) => {
                tracing::warn!("Failed to reap shell process: {}", e);
                None
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unlisted_shell() {
        let result = validate_shell_path("/tmp/definitely-not-a-shell");
        assert!(matches!(result, Err(SpawnError::Failed(_))));
    }

    #[test]
    fn test_accepts_bin_sh() {
        // /bin/sh is present on every unix CI image
        assert_eq!(validate_shell_path("/bin/sh").unwrap(), "/bin/sh");
    }

    #[test]
    fn test_missing_allowed_shell_is_unavailable() {
        if Path::new("/usr/local/bin/fish").exists() {
            return;
        }
        let result = validate_shell_path("/usr/local/bin/fish");
        assert!(matches!(result, Err(SpawnError::Unavailable(_))));
    }

    #[test]
    fn test_configured_shell_wins() {
        let spawner = PtySpawner::new(Some("/bin/sh".to_string()), vec![]);
        assert_eq!(spawner.requested_shell(), "/bin/sh");
    }
}
