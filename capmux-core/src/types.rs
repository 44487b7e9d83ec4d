//! Core types for capmux
//!
//! Identifiers, stream descriptors and capture formats shared by the
//! session manager, the worker and capture backends.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for client ids
static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque session id returned by `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

/// Serial number of a device entry
///
/// A fresh serial is allocated every time an entry is created, so the same
/// physical device torn down and reopened gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntrySerial(u64);

impl EntrySerial {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw serial value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntrySerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One dispatch of a start request for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchId {
    /// Entry the device belongs to
    pub serial: EntrySerial,
    /// Manager-wide launch counter
    pub attempt: u64,
}

impl std::fmt::Display for LaunchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.serial, self.attempt)
    }
}

/// Identity of a capture client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Create a new unique client id
    pub fn new() -> Self {
        Self(CLIENT_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

/// Kind of stream a session targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Physical capture hardware (camera, capture card)
    Device,
    /// Derived stream: a browser tab or application surface
    Tab,
    /// Derived stream: a screen or window
    Desktop,
}

impl StreamKind {
    /// Whether this kind is produced by software rather than hardware
    pub fn is_derived(&self) -> bool {
        !matches!(self, Self::Device)
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Tab => write!(f, "tab"),
            Self::Desktop => write!(f, "desktop"),
        }
    }
}

impl std::str::FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device" | "camera" => Ok(Self::Device),
            "tab" => Ok(Self::Tab),
            "desktop" | "screen" => Ok(Self::Desktop),
            _ => Err(format!("Unknown stream kind: {}", s)),
        }
    }
}

/// (stream kind, device id) pair identifying one device entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub kind: StreamKind,
    pub device_id: String,
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.device_id)
    }
}

/// What a session wants to capture
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream kind
    pub kind: StreamKind,
    /// Device identity (hardware id, tab id or desktop media id)
    pub device_id: String,
    /// Human-readable name
    pub name: String,
}

impl StreamDescriptor {
    /// Create a descriptor for a hardware device
    pub fn device(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            kind: StreamKind::Device,
            name: device_id.clone(),
            device_id,
        }
    }

    /// Create a descriptor for a tab capture
    pub fn tab(id: impl Into<String>) -> Self {
        let device_id = id.into();
        Self {
            kind: StreamKind::Tab,
            name: device_id.clone(),
            device_id,
        }
    }

    /// Create a descriptor for a desktop capture
    pub fn desktop(id: impl Into<String>) -> Self {
        let device_id = id.into();
        Self {
            kind: StreamKind::Desktop,
            name: device_id.clone(),
            device_id,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Key of the device entry this descriptor maps to
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            kind: self.kind,
            device_id: self.device_id.clone(),
        }
    }

    /// Whether this descriptor maps to the given key
    pub fn matches(&self, key: &DeviceKey) -> bool {
        self.kind == key.kind && self.device_id == key.device_id
    }
}

impl std::fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.device_id)
    }
}

/// Pixel format of captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar YUV 4:2:0
    #[default]
    I420,
    /// Semi-planar YUV 4:2:0
    Nv12,
    /// Packed YUV 4:2:2
    Yuy2,
    /// Motion JPEG
    Mjpeg,
    /// 16-bit depth
    Y16,
    /// 32-bit ARGB
    Argb,
}

impl PixelFormat {
    /// Approximate bytes needed for one frame
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::I420 | Self::Nv12 => pixels * 3 / 2,
            Self::Yuy2 | Self::Y16 => pixels * 2,
            Self::Argb => pixels * 4,
            // Worst case for compressed frames
            Self::Mjpeg => pixels * 2,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::I420 => "I420",
            Self::Nv12 => "NV12",
            Self::Yuy2 => "YUY2",
            Self::Mjpeg => "MJPEG",
            Self::Y16 => "Y16",
            Self::Argb => "ARGB",
        };
        write!(f, "{}", name)
    }
}

/// Resolution, frame rate and pixel format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub frame_rate: f32,
    /// Pixel format
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    /// Create a new video format
    pub fn new(width: u32, height: u32, frame_rate: f32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            frame_rate,
            pixel_format,
        }
    }

    /// Frame area in pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Bytes needed to hold one frame
    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self::new(640, 480, 30.0, PixelFormat::I420)
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@{:.0} {}",
            self.width, self.height, self.frame_rate, self.pixel_format
        )
    }
}

/// Parameters a client requests when starting capture
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptureParams {
    /// Requested format; the device may deliver something else
    pub requested_format: VideoFormat,
}

impl CaptureParams {
    /// Create params requesting the given format
    pub fn new(requested_format: VideoFormat) -> Self {
        Self { requested_format }
    }
}

/// Backend-reported identity of a physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable device id
    pub device_id: String,
    /// Human-readable name
    pub display_name: String,
    /// Vendor/model id, when known
    pub model_id: Option<String>,
}

impl DeviceDescriptor {
    /// Create a new descriptor
    pub fn new(device_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            display_name: display_name.into(),
            model_id: None,
        }
    }

    /// Set the model id
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Name and model for logging
    pub fn name_and_model(&self) -> String {
        match &self.model_id {
            Some(model) => format!("{} ({})", self.display_name, model),
            None => self.display_name.clone(),
        }
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.device_id, self.name_and_model())
    }
}

/// An enumerated device with its cached supported formats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub descriptor: DeviceDescriptor,
    pub supported_formats: Vec<VideoFormat>,
}

impl DeviceInfo {
    /// Create device info with no formats probed yet
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            supported_formats: Vec::new(),
        }
    }
}

/// Metadata delivered with each captured buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Actual frame format
    pub format: VideoFormat,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
}

/// Application lifecycle signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    /// Application has running activities
    #[default]
    Foreground,
    /// All activities stopped; hardware should be released
    Background,
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Native window id used for desktop capture notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

/// Range of a numeric photo setting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingRange {
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub step: f64,
}

/// Still-photo capabilities of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoCapabilities {
    /// Zoom range
    pub zoom: SettingRange,
    /// Whether a torch/flash is available
    pub torch: bool,
    /// Largest still resolution
    pub max_resolution: (u32, u32),
}

/// Photo settings a client wants applied
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhotoSettings {
    pub zoom: Option<f64>,
    pub torch: Option<bool>,
}

/// An encoded still photo
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub mime_type: String,
    pub data: Bytes,
}

/// Request that needs a live device
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityRequest {
    /// Query photo capabilities
    PhotoCapabilities,
    /// Apply photo settings
    SetPhotoOptions(PhotoSettings),
    /// Capture a still photo
    TakePhoto,
}

impl CapabilityRequest {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhotoCapabilities => "photo-capabilities",
            Self::SetPhotoOptions(_) => "set-photo-options",
            Self::TakePhoto => "take-photo",
        }
    }
}

/// Result of a capability request
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityResponse {
    PhotoCapabilities(PhotoCapabilities),
    OptionsApplied(bool),
    Photo(Photo),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_descriptor_key() {
        let d = StreamDescriptor::device("cam0").with_name("Front Camera");
        let key = d.key();
        assert_eq!(key.kind, StreamKind::Device);
        assert_eq!(key.device_id, "cam0");
        assert!(d.matches(&key));
        assert!(!StreamDescriptor::desktop("cam0").matches(&key));
        assert_eq!(key.to_string(), "device:cam0");
    }

    #[test]
    fn test_stream_kind_parse() {
        assert_eq!("device".parse::<StreamKind>(), Ok(StreamKind::Device));
        assert_eq!("screen".parse::<StreamKind>(), Ok(StreamKind::Desktop));
        assert!("bogus".parse::<StreamKind>().is_err());
        assert!(StreamKind::Tab.is_derived());
        assert!(!StreamKind::Device.is_derived());
    }

    #[test]
    fn test_frame_size() {
        let format = VideoFormat::new(640, 480, 30.0, PixelFormat::I420);
        assert_eq!(format.frame_size(), 640 * 480 * 3 / 2);
        assert_eq!(format.area(), 640 * 480);
        assert_eq!(format.to_string(), "640x480@30 I420");
    }
}
