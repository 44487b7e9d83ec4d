//! IPC client for CLI commands
//!
//! Connects to the running daemon to send commands and receive responses.

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::protocol::{DaemonStatus, IpcMessage, IpcResponse};
use super::socket_path;
use crate::error::{CapmuxError, Result};
use crate::types::{AppState, DeviceDescriptor};

/// Default connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read/write timeout; a refreshing device list may probe hardware
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    stream: UnixStream,
}

impl IpcClient {
    /// Connect to the daemon on the default socket
    pub async fn connect() -> Result<Self> {
        Self::connect_to(&socket_path(), CONNECT_TIMEOUT).await
    }

    /// Connect to a daemon socket with a custom timeout
    pub async fn connect_to(path: &Path, timeout: Duration) -> Result<Self> {
        if !path.exists() {
            return Err(CapmuxError::ipc(format!("No daemon socket at {:?}", path)));
        }

        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| CapmuxError::ipc("Connection timed out"))?
            .map_err(|e| CapmuxError::ipc(format!("Failed to connect to daemon: {}", e)))?;

        debug!("Connected to daemon at {:?}", path);

        Ok(Self { stream })
    }

    /// Send a message and receive a response
    async fn send(&mut self, msg: IpcMessage) -> Result<IpcResponse> {
        let (reader, mut writer) = self.stream.split();

        tokio::time::timeout(IO_TIMEOUT, writer.write_all(&msg.to_bytes()))
            .await
            .map_err(|_| CapmuxError::ipc("Write timed out"))?
            .map_err(|e| CapmuxError::ipc(format!("Failed to send message: {}", e)))?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        tokio::time::timeout(IO_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| CapmuxError::ipc("Read timed out"))?
            .map_err(|e| CapmuxError::ipc(format!("Failed to read response: {}", e)))?;

        Ok(IpcResponse::from_bytes(line.trim().as_bytes())?)
    }

    /// Ping the daemon to check if it's alive
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send(IpcMessage::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            Ok(_) | Err(_) => Ok(false),
        }
    }

    /// Get the daemon status
    pub async fn status(&mut self) -> Result<DaemonStatus> {
        match self.send(IpcMessage::Status).await? {
            IpcResponse::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// List devices known to the daemon
    pub async fn devices(&mut self, refresh: bool) -> Result<Vec<DeviceDescriptor>> {
        match self.send(IpcMessage::Devices { refresh }).await? {
            IpcResponse::Devices { devices } => Ok(devices),
            other => Err(unexpected(other)),
        }
    }

    /// Tell the daemon about an application state change
    pub async fn set_app_state(&mut self, state: AppState) -> Result<()> {
        match self.send(IpcMessage::AppState { state }).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Request the daemon to stop
    pub async fn stop(&mut self) -> Result<()> {
        match self.send(IpcMessage::Stop).await? {
            IpcResponse::Stopping => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: IpcResponse) -> CapmuxError {
    match response {
        IpcResponse::Error { message } => CapmuxError::Ipc(message),
        other => CapmuxError::ipc(format!("Unexpected response: {:?}", other)),
    }
}
