//! IPC protocol definitions
//!
//! Message types exchanged between the daemon and the CLI.

use serde::{Deserialize, Serialize};

use crate::stats::ManagerStatus;
use crate::types::{AppState, DeviceDescriptor};

/// Messages that can be sent to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// Check if daemon is alive
    Ping,
    /// Request the session manager status
    Status,
    /// List devices, optionally re-enumerating first
    Devices {
        #[serde(default)]
        refresh: bool,
    },
    /// Tell the daemon the application moved to the background or foreground
    AppState { state: AppState },
    /// Stop the daemon gracefully
    Stop,
}

/// Responses from the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Simple acknowledgment
    Ok,
    /// Pong response to ping
    Pong,
    /// Error response
    Error { message: String },
    /// Status response
    Status(DaemonStatus),
    /// Device list
    Devices { devices: Vec<DeviceDescriptor> },
    /// Shutdown acknowledgment
    Stopping,
}

/// Daemon process info plus the manager snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Process ID
    pub pid: u32,
    /// Uptime in seconds
    pub uptime_seconds: f64,
    /// Session manager snapshot
    pub manager: ManagerStatus,
}

impl IpcMessage {
    /// Serialize message to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl IpcResponse {
    /// Serialize response to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize response from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_wire_format() {
        let msg = IpcMessage::AppState {
            state: AppState::Background,
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(
            std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap(),
            r#"{"type":"AppState","state":"background"}"#
        );
    }

    #[test]
    fn test_devices_refresh_defaults_to_false() {
        let parsed = IpcMessage::from_bytes(br#"{"type":"Devices"}"#).unwrap();
        assert_eq!(parsed, IpcMessage::Devices { refresh: false });
    }

    #[test]
    fn test_error_response() {
        let resp = IpcResponse::error("boom");
        let bytes = resp.to_bytes();
        let parsed = IpcResponse::from_bytes(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(parsed, IpcResponse::Error { message: "boom".into() });
    }
}
