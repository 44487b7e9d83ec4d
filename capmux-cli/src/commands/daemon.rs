//! Daemon command - run the session manager behind the IPC socket

use anyhow::{Context, Result};
use capmux_core::config::ConfigFile;
use capmux_core::ipc::{self, IpcServer};
use tokio::signal;
use tracing::{info, warn};

use super::local_manager;

/// Run the daemon until Ctrl+C or `capmux stop`
pub async fn daemon() -> Result<()> {
    if ipc::daemon_running().await {
        anyhow::bail!("A capmux daemon is already running");
    }

    let config = ConfigFile::load_or_default();
    let handle = local_manager(&config)?;

    match handle.enumerate_devices().await {
        Ok(devices) => info!("Found {} capture device(s)", devices.len()),
        Err(e) => warn!("Initial device enumeration failed: {}", e),
    }

    let mut server = IpcServer::new(handle.clone());
    server.start().await.context("Failed to start IPC server")?;

    println!("Capmux daemon listening on {}", server.socket_path().display());
    println!("Press Ctrl+C or run 'capmux stop' to exit.\n");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                println!("\nReceived interrupt signal...");
                break;
            }
            keep_running = server.accept_one() => {
                if !keep_running? {
                    info!("Stop requested over IPC");
                    break;
                }
            }
        }
    }

    println!("Shutting down...");
    handle.shutdown().await.context("Failed to shut down session manager")?;
    server.cleanup();
    println!("Daemon stopped.");

    Ok(())
}
