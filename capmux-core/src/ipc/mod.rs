//! IPC for daemon mode
//!
//! Unix socket carrying newline-delimited JSON between a running capmux
//! daemon and CLI commands like `status`, `stop` and `background`.

mod client;
mod protocol;
mod server;

pub use client::IpcClient;
pub use protocol::{DaemonStatus, IpcMessage, IpcResponse};
pub use server::IpcServer;

use std::path::PathBuf;

/// Get the IPC socket path
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("capmux.sock")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/capmux-{}.sock", uid))
    }
}

/// Check if the daemon is running by checking if the socket exists and is responsive
pub async fn daemon_running() -> bool {
    if !socket_path().exists() {
        return false;
    }

    match IpcClient::connect().await {
        Ok(mut client) => matches!(client.ping().await, Ok(true)),
        Err(_) => false,
    }
}
