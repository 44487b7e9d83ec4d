//! Error types for capmux

use thiserror::Error;

use crate::types::SessionId;

/// Result type alias using CapmuxError
pub type Result<T> = std::result::Result<T, CapmuxError>;

/// Main error type for capmux operations
#[derive(Debug, Error)]
pub enum CapmuxError {
    /// Session id was never opened or is already closed
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// Session exists but no device entry serves it
    #[error("Session {0} is not capturing")]
    NotCapturing(SessionId),

    /// Session was closed before a queued request could run
    #[error("Session {0} was closed")]
    SessionClosed(SessionId),

    /// Device id not present in the enumerated inventory
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Backend failed to create or start a device
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// Device failed while running
    #[error("Device error: {0}")]
    Device(String),

    /// Backend does not implement the requested operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Lifecycle event not valid in the current state
    #[error("Invalid transition: {event} while {from}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    /// Worker thread is gone
    #[error("Device worker is not running")]
    WorkerGone,

    /// Control context is gone
    #[error("Session manager is not running")]
    ManagerGone,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Daemon communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CapmuxError>,
    },
}

impl CapmuxError {
    /// Create a device creation error
    pub fn creation(msg: impl Into<String>) -> Self {
        Self::DeviceCreation(msg.into())
    }

    /// Create a runtime device error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an IPC error
    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::Ipc(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &CapmuxError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// A short hint telling the user what to try next
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::UnknownSession(_) | Self::SessionClosed(_) => {
                Some("Open a new session before starting capture")
            }
            Self::NotCapturing(_) => Some("Start capture on the session first"),
            Self::DeviceNotFound(_) => {
                Some("Run 'capmux devices' to refresh the device list; the device may have been unplugged")
            }
            Self::DeviceCreation(_) => {
                Some("The device could not be opened; check that no other program holds it and retry")
            }
            Self::Device(_) => Some("The device stopped unexpectedly; restart capture"),
            Self::WorkerGone | Self::ManagerGone => Some("Restart the capmux daemon"),
            Self::Config(_) => Some("Check ~/.config/capmux/config.toml for errors"),
            Self::Ipc(_) => Some("Is the daemon running? Start it with 'capmux daemon'"),
            _ => None,
        }
    }

    /// Whether the user can fix this without a code change
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::UnknownSession(_)
                | Self::NotCapturing(_)
                | Self::SessionClosed(_)
                | Self::DeviceNotFound(_)
                | Self::DeviceCreation(_)
                | Self::Device(_)
                | Self::Config(_)
                | Self::Ipc(_)
                | Self::Io(_)
        )
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<toml::de::Error> for CapmuxError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config file: {}", err))
    }
}

impl From<serde_json::Error> for CapmuxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Ipc(format!("Malformed message: {}", err))
    }
}
