//! Daemon spawning logic
//!
//! Spawns the daemon on demand, using the same binary with the hidden
//! `daemon` subcommand. The daemon inherits the working directory, so a
//! relative index path resolves against the project the CLI ran in.

use std::time::Duration;

use crate::common::{paths, Error, Result};
use crate::ipc::{transport, DaemonClient};

/// Timeout for daemon to start up
const SPAWN_TIMEOUT_SECS: u64 = 5;

/// Ensure the daemon is running, spawning it if necessary
pub async fn ensure_daemon_running() -> Result<()> {
    match DaemonClient::connect().await {
        Ok(_) => Ok(()),
        Err(Error::DaemonNotRunning) => spawn_daemon().await,
        Err(e) => Err(e),
    }
}

/// Connect, spawning the daemon first when it isn't running
pub async fn connect_or_spawn() -> Result<DaemonClient> {
    ensure_daemon_running().await?;
    DaemonClient::connect().await
}

async fn spawn_daemon() -> Result<()> {
    tracing::debug!("Spawning daemon process");

    let exe_path = std::env::current_exe().map_err(|e| {
        Error::Internal(format!("Failed to get current executable path: {}", e))
    })?;

    paths::ensure_socket_dir()?;
    paths::remove_socket()?;

    // The daemon logs to its own file; terminal output goes nowhere
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        std::process::Command::new(&exe_path)
            .arg("daemon")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn daemon: {}", e)))?;
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        std::process::Command::new(&exe_path)
            .arg("daemon")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn daemon: {}", e)))?;
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(SPAWN_TIMEOUT_SECS);

    loop {
        if std::time::Instant::now() >= deadline {
            return Err(Error::DaemonSpawnTimeout(SPAWN_TIMEOUT_SECS));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        if !transport::socket_exists() {
            continue;
        }

        if transport::connect().await.is_ok() {
            tracing::debug!("Daemon started successfully");
            return Ok(());
        }
    }
}
