//! Configuration file loading
//!
//! Loads user configuration from `~/.config/capmux/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{DEFAULT_MAX_BUFFERS, DEFAULT_MAX_BUFFERS_DERIVED, ManagerConfig};
use crate::backend::{FakeBackend, FakeDeviceSpec};
use crate::error::{CapmuxError, Result};
use crate::types::{CaptureParams, PixelFormat, VideoFormat};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Session manager settings
    #[serde(default)]
    pub manager: ManagerSettings,

    /// Default capture request
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Synthetic backend devices
    #[serde(default)]
    pub fake: FakeSettings,
}

/// Session manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Device worker thread name
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,

    /// Buffer pool size for hardware devices
    #[serde(default = "default_max_buffers")]
    pub max_buffers: usize,

    /// Buffer pool size for tab and desktop captures
    #[serde(default = "default_max_buffers_derived")]
    pub max_buffers_derived: usize,

    /// Listener event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Format requested when the CLI starts a capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: f32,
}

/// Devices served by the synthetic backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeSettings {
    #[serde(default = "default_fake_devices")]
    pub devices: Vec<FakeDeviceSpec>,
}

fn default_worker_thread_name() -> String {
    ManagerConfig::default().worker_thread_name
}

fn default_max_buffers() -> usize {
    DEFAULT_MAX_BUFFERS
}

fn default_max_buffers_derived() -> usize {
    DEFAULT_MAX_BUFFERS_DERIVED
}

fn default_event_capacity() -> usize {
    ManagerConfig::default().event_capacity
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_fps() -> f32 {
    30.0
}

fn default_fake_devices() -> Vec<FakeDeviceSpec> {
    vec![
        FakeDeviceSpec::new("fake-cam-0", "Fake Front Camera"),
        FakeDeviceSpec::new("fake-cam-1", "Fake Rear Camera"),
    ]
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            worker_thread_name: default_worker_thread_name(),
            max_buffers: default_max_buffers(),
            max_buffers_derived: default_max_buffers_derived(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl Default for FakeSettings {
    fn default() -> Self {
        Self {
            devices: default_fake_devices(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("capmux").join("config.toml")
        } else if let Some(home) = dirs::home_dir() {
            home.join(".config").join("capmux").join("config.toml")
        } else {
            PathBuf::from("/etc/capmux/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CapmuxError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CapmuxError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CapmuxError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| CapmuxError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        std::fs::create_dir_all(path.parent().unwrap_or(&path))
            .map_err(|e| CapmuxError::config(format!("Failed to create config directory: {}", e)))?;
        std::fs::write(&path, sample_config())
            .map_err(|e| CapmuxError::config(format!("Failed to write config file: {}", e)))?;
        Ok(true)
    }

    /// Session manager configuration
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            worker_thread_name: self.manager.worker_thread_name.clone(),
            max_buffers: self.manager.max_buffers,
            max_buffers_derived: self.manager.max_buffers_derived,
            event_capacity: self.manager.event_capacity,
        }
    }

    /// Capture parameters requested by default
    pub fn capture_params(&self) -> CaptureParams {
        CaptureParams::new(VideoFormat::new(
            self.capture.width,
            self.capture.height,
            self.capture.fps,
            PixelFormat::I420,
        ))
    }

    /// Synthetic backend serving the configured devices
    pub fn fake_backend(&self) -> FakeBackend {
        FakeBackend::new(self.fake.devices.clone())
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# capmux configuration

[manager]
# Name of the thread that runs blocking device calls
worker_thread_name = "capmux-device"

# Frame buffers per hardware device
max_buffers = 3

# Frame buffers per tab or desktop capture
max_buffers_derived = 10

# Pending listener events before slow subscribers start lagging
event_capacity = 64

[capture]
# Format requested by `capmux capture`
width = 640
height = 480
fps = 30.0

# Devices served by the synthetic backend
[[fake.devices]]
id = "fake-cam-0"
name = "Fake Front Camera"

[[fake.devices]]
id = "fake-cam-1"
name = "Fake Rear Camera"

# A device that always fails to open, handy for testing error paths
# [[fake.devices]]
# id = "fake-broken"
# name = "Broken Camera"
# fail_create = true
# start_delay_ms = 250
"#
    .to_string()
}
