//! CLI command implementations

mod app_state;
mod capture;
mod config;
mod daemon;
mod devices;
mod status;
mod stop;

pub use app_state::{background, foreground};
pub use capture::{CaptureArgs, capture};
pub use config::{ConfigArgs, config};
pub use daemon::daemon;
pub use devices::{DevicesArgs, devices};
pub use status::{StatusArgs, status};
pub use stop::stop;

use anyhow::{Context, Result};
use capmux_core::config::ConfigFile;
use capmux_core::ipc::IpcClient;
use capmux_core::{ManagerHandle, ManagerService, SessionManager};
use std::sync::Arc;

/// Start an in-process session manager over the configured fake devices
pub(crate) fn local_manager(config: &ConfigFile) -> Result<ManagerHandle> {
    let backend = Arc::new(config.fake_backend());
    let manager = SessionManager::new(config.manager_config(), backend)
        .context("Failed to start session manager")?;
    Ok(ManagerService::spawn(manager))
}

/// Connect to the running daemon with a friendly error
pub(crate) async fn connect_daemon() -> Result<IpcClient> {
    IpcClient::connect()
        .await
        .context("Could not reach the capmux daemon; start it with 'capmux daemon'")
}
