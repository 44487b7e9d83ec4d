//! Background and foreground commands - forward app state to the daemon

use anyhow::{Context, Result};
use capmux_core::AppState;

use super::connect_daemon;

/// Release hardware devices in the running daemon
pub async fn background() -> Result<()> {
    send(AppState::Background).await
}

/// Restart released hardware devices in the running daemon
pub async fn foreground() -> Result<()> {
    send(AppState::Foreground).await
}

async fn send(state: AppState) -> Result<()> {
    let mut client = connect_daemon().await?;
    client
        .set_app_state(state)
        .await
        .with_context(|| format!("Failed to move daemon to the {}", state))?;
    println!("Daemon moved to the {}.", state);
    Ok(())
}
