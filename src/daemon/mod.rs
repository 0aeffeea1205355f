//! Daemon mode - background process owning the run controller
//!
//! The daemon is spawned automatically by CLI commands. It keeps results,
//! runs and coverage across CLI invocations and is the single place reports
//! from the headless runner and the browser are reconciled.

mod handler;
mod server;

pub use handler::DaemonState;

use crate::common::Result;

/// Run in daemon mode
///
/// Entry point for the hidden `daemon` command. The daemon:
/// 1. Loads the config and the story index
/// 2. Creates an IPC socket/pipe for clients
/// 3. Applies every request on one loop, in arrival order
/// 4. Streams snapshots to subscribers
pub async fn run() -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Starting storyrun daemon"
    );

    let mut daemon = server::Daemon::new().await?;
    daemon.run().await
}
