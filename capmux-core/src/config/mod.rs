//! Configuration types for capmux
//!
//! Runtime settings for the session manager plus the on-disk config file.

mod file;

pub use file::{CaptureSettings, ConfigFile, FakeSettings, ManagerSettings, sample_config};

use serde::{Deserialize, Serialize};

use crate::types::StreamKind;

/// Buffers per hardware device
pub const DEFAULT_MAX_BUFFERS: usize = 3;

/// Buffers per tab or desktop capture; software sources burst more
pub const DEFAULT_MAX_BUFFERS_DERIVED: usize = 10;

fn default_worker_thread_name() -> String {
    "capmux-device".to_string()
}

/// Session manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Name of the device worker thread
    pub worker_thread_name: String,
    /// Buffer pool size for hardware devices
    pub max_buffers: usize,
    /// Buffer pool size for tab and desktop captures
    pub max_buffers_derived: usize,
    /// Capacity of the listener event channel
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_thread_name: default_worker_thread_name(),
            max_buffers: DEFAULT_MAX_BUFFERS,
            max_buffers_derived: DEFAULT_MAX_BUFFERS_DERIVED,
            event_capacity: 64,
        }
    }
}

impl ManagerConfig {
    /// Set the worker thread name
    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    /// Set the buffer pool size for hardware devices
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Set the buffer pool size for derived streams
    pub fn with_max_buffers_derived(mut self, max_buffers: usize) -> Self {
        self.max_buffers_derived = max_buffers;
        self
    }

    /// Set the listener channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Pool size for an entry of the given kind
    pub fn max_buffers_for(&self, kind: StreamKind) -> usize {
        if kind.is_derived() {
            self.max_buffers_derived
        } else {
            self.max_buffers
        }
    }

    /// Return an error for settings that cannot work
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.worker_thread_name.trim().is_empty() {
            return Err("Worker thread name cannot be empty".to_string());
        }
        if self.max_buffers == 0 || self.max_buffers_derived == 0 {
            return Err("Buffer pools need at least one buffer".to_string());
        }
        if self.event_capacity == 0 {
            return Err("Event channel capacity cannot be zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_buffers_for(StreamKind::Device), 3);
        assert_eq!(config.max_buffers_for(StreamKind::Tab), 10);
        assert_eq!(config.max_buffers_for(StreamKind::Desktop), 10);
        assert!(config.validate_strict().is_ok());
    }

    #[test]
    fn test_validate_strict() {
        assert!(ManagerConfig::default().with_max_buffers(0).validate_strict().is_err());
        assert!(ManagerConfig::default().with_worker_thread_name(" ").validate_strict().is_err());
        assert!(ManagerConfig::default().with_event_capacity(0).validate_strict().is_err());
    }
}
