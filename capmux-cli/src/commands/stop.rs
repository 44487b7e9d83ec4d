//! Stop command - stop the running daemon

use anyhow::{Context, Result};
use capmux_core::ipc;

use super::connect_daemon;

/// Stop the running daemon
pub async fn stop() -> Result<()> {
    if !ipc::daemon_running().await {
        println!("No capmux daemon is running.");
        return Ok(());
    }

    let mut client = connect_daemon().await?;
    client.stop().await.context("Failed to stop daemon")?;
    println!("Daemon is stopping.");

    Ok(())
}
