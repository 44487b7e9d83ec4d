//! IPC server for daemon mode
//!
//! Listens on a Unix socket and answers CLI clients from a running session
//! manager.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::protocol::{DaemonStatus, IpcMessage, IpcResponse};
use super::socket_path;
use crate::error::{CapmuxError, Result};
use crate::service::ManagerHandle;

/// How long `accept_one` waits before giving the caller a chance to check
/// for shutdown
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// IPC server that handles client connections
pub struct IpcServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Listener for incoming connections
    listener: Option<UnixListener>,
    /// Session manager being served
    manager: ManagerHandle,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl IpcServer {
    /// Create a server on the default socket path
    pub fn new(manager: ManagerHandle) -> Self {
        Self::with_path(manager, socket_path())
    }

    /// Create a server on a specific socket path
    pub fn with_path(manager: ManagerHandle, path: impl Into<PathBuf>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            socket_path: path.into(),
            listener: None,
            manager,
            shutdown_tx,
            start_time: Instant::now(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start listening for connections
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .map_err(|e| CapmuxError::ipc(format!("Failed to remove old socket: {}", e)))?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CapmuxError::ipc(format!("Failed to create socket directory: {}", e))
                })?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            CapmuxError::ipc(format!(
                "Failed to bind socket at {:?}: {}",
                self.socket_path, e
            ))
        })?;

        // Owner-only, other users must not drive our devices
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
            warn!("Failed to set socket permissions: {}", e);
            CapmuxError::ipc(format!("Failed to set socket permissions: {}", e))
        })?;

        info!("IPC server listening on {:?}", self.socket_path);
        self.listener = Some(listener);

        Ok(())
    }

    /// Get a receiver for shutdown signals
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Accept and handle one connection
    ///
    /// Returns true if the server should continue, false if it should shut down
    pub async fn accept_one(&self) -> Result<bool> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| CapmuxError::ipc("Server not started"))?;

        let (stream, _addr) = match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                error!("Failed to accept connection: {}", e);
                return Ok(true);
            }
            Err(_) => return Ok(true),
        };

        debug!("IPC client connected");
        Ok(self.handle_connection(stream).await)
    }

    /// Serve connections until a client asks the daemon to stop
    pub async fn run(&self) -> Result<()> {
        while self.accept_one().await? {}
        Ok(())
    }

    /// Handle a client connection
    ///
    /// Returns true if server should continue, false if it should shut down
    async fn handle_connection(&self, stream: UnixStream) -> bool {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("IPC client disconnected");
                    return true;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let (response, should_stop) = match IpcMessage::from_bytes(trimmed.as_bytes()) {
                        Ok(msg) => self.handle_message(msg).await,
                        Err(e) => {
                            warn!("Invalid IPC message: {}", e);
                            (IpcResponse::error(format!("Invalid message: {}", e)), false)
                        }
                    };

                    if let Err(e) = writer.write_all(&response.to_bytes()).await {
                        error!("Failed to send IPC response: {}", e);
                        return true;
                    }

                    if should_stop {
                        let _ = self.shutdown_tx.send(());
                        return false;
                    }
                }
                Err(e) => {
                    error!("Error reading from IPC client: {}", e);
                    return true;
                }
            }
        }
    }

    /// Handle an IPC message
    ///
    /// Returns (response, should_stop)
    async fn handle_message(&self, msg: IpcMessage) -> (IpcResponse, bool) {
        let response = match msg {
            IpcMessage::Ping => IpcResponse::Pong,
            IpcMessage::Status => match self.manager.status().await {
                Ok(manager) => IpcResponse::Status(DaemonStatus {
                    pid: std::process::id(),
                    uptime_seconds: self.start_time.elapsed().as_secs_f64(),
                    manager,
                }),
                Err(e) => IpcResponse::error(e.to_string()),
            },
            IpcMessage::Devices { refresh } => {
                let devices = if refresh {
                    self.manager.enumerate_devices().await
                } else {
                    self.manager.devices().await
                };
                match devices {
                    Ok(devices) => IpcResponse::Devices { devices },
                    Err(e) => IpcResponse::error(e.to_string()),
                }
            }
            IpcMessage::AppState { state } => match self.manager.set_app_state(state).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::error(e.to_string()),
            },
            IpcMessage::Stop => {
                info!("Received stop command via IPC");
                return (IpcResponse::Stopping, true);
            }
        };
        (response, false)
    }

    /// Clean up the socket file
    pub fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            } else {
                debug!("Removed socket file {:?}", self.socket_path);
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
