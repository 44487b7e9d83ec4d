//! Synthetic capture backend
//!
//! Serves configurable fake cameras plus any tab or desktop id. Each started
//! device runs a producer thread that writes pattern frames at the requested
//! rate.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{CaptureBackend, CaptureDevice, DeviceSink, StartTarget};
use crate::error::{CapmuxError, Result};
use crate::types::{
    CapabilityRequest, CapabilityResponse, CaptureParams, DeviceDescriptor, FrameInfo, Photo,
    PhotoCapabilities, PixelFormat, SettingRange, VideoFormat, WindowId,
};

/// A fake camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeDeviceSpec {
    /// Device id
    pub id: String,
    /// Display name
    pub name: String,
    /// Formats reported by probe
    #[serde(default = "default_formats")]
    pub formats: Vec<VideoFormat>,
    /// Refuse to start
    #[serde(default)]
    pub fail_create: bool,
    /// Time create+start blocks the worker, in milliseconds
    #[serde(default)]
    pub start_delay_ms: u64,
}

fn default_formats() -> Vec<VideoFormat> {
    vec![
        VideoFormat::new(320, 240, 30.0, PixelFormat::Yuy2),
        VideoFormat::new(640, 480, 30.0, PixelFormat::Yuy2),
        VideoFormat::new(1280, 720, 30.0, PixelFormat::Mjpeg),
    ]
}

impl FakeDeviceSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            formats: default_formats(),
            fail_create: false,
            start_delay_ms: 0,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_formats(mut self, formats: Vec<VideoFormat>) -> Self {
        self.formats = formats;
        self
    }

    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(&self.id, &self.name).with_model("capmux-fake")
    }

    /// Pick the supported format closest to what was requested
    fn choose_format(&self, requested: &VideoFormat) -> VideoFormat {
        self.formats
            .iter()
            .find(|f| f.width == requested.width && f.height == requested.height)
            .or_else(|| self.formats.first())
            .map(|f| VideoFormat {
                frame_rate: requested.frame_rate.min(f.frame_rate),
                ..*f
            })
            .unwrap_or(*requested)
    }
}

/// Backend serving fake devices
#[derive(Debug, Default)]
pub struct FakeBackend {
    devices: RwLock<Vec<FakeDeviceSpec>>,
}

impl FakeBackend {
    pub fn new(devices: Vec<FakeDeviceSpec>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Two working cameras
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            FakeDeviceSpec::new("fake-cam-0", "Fake Front Camera"),
            FakeDeviceSpec::new("fake-cam-1", "Fake Rear Camera"),
        ])
    }

    /// Plug in a device
    pub fn add_device(&self, spec: FakeDeviceSpec) {
        self.devices.write().push(spec);
    }

    /// Unplug a device
    pub fn remove_device(&self, id: &str) -> bool {
        let mut devices = self.devices.write();
        let before = devices.len();
        devices.retain(|d| d.id != id);
        devices.len() != before
    }

    fn spec(&self, id: &str) -> Option<FakeDeviceSpec> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }
}

impl CaptureBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.read().iter().map(|d| d.descriptor()).collect())
    }

    fn probe(&self, descriptor: &DeviceDescriptor) -> Result<Vec<VideoFormat>> {
        self.spec(&descriptor.device_id)
            .map(|spec| spec.formats)
            .ok_or_else(|| CapmuxError::DeviceNotFound(descriptor.device_id.clone()))
    }

    fn create_and_start(
        &self,
        target: &StartTarget,
        params: &CaptureParams,
        sink: DeviceSink,
    ) -> Result<Box<dyn CaptureDevice>> {
        let format = match target {
            StartTarget::Device(descriptor) => {
                let spec = self
                    .spec(&descriptor.device_id)
                    .ok_or_else(|| CapmuxError::DeviceNotFound(descriptor.device_id.clone()))?;
                if spec.start_delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(spec.start_delay_ms));
                }
                if spec.fail_create {
                    return Err(CapmuxError::creation(format!(
                        "{} refused to open",
                        spec.name
                    )));
                }
                spec.choose_format(&params.requested_format)
            }
            StartTarget::Tab(_) | StartTarget::Desktop(_) => params.requested_format,
        };

        info!("Starting fake {} at {}", target, format);
        let device = FakeDevice::spawn(target.id(), format, sink)?;
        Ok(Box::new(device))
    }
}

struct ProducerState {
    running: AtomicBool,
    paused: AtomicBool,
    refresh: AtomicBool,
    frames: AtomicU64,
}

struct FakeDevice {
    format: VideoFormat,
    state: Arc<ProducerState>,
    producer: Option<JoinHandle<()>>,
    zoom: f64,
    torch: bool,
    window: Option<WindowId>,
}

impl FakeDevice {
    fn spawn(id: &str, format: VideoFormat, sink: DeviceSink) -> Result<Self> {
        let state = Arc::new(ProducerState {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            refresh: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        });

        let thread_state = state.clone();
        let producer = std::thread::Builder::new()
            .name(format!("capmux-fake-{}", id))
            .spawn(move || produce(format, sink, thread_state))
            .map_err(|e| CapmuxError::creation(format!("Failed to spawn producer: {}", e)))?;

        Ok(Self {
            format,
            state,
            producer: Some(producer),
            zoom: 1.0,
            torch: false,
            window: None,
        })
    }

    fn capabilities(&self) -> PhotoCapabilities {
        PhotoCapabilities {
            zoom: SettingRange {
                min: 1.0,
                max: 4.0,
                current: self.zoom,
                step: 0.1,
            },
            torch: self.torch,
            max_resolution: (self.format.width, self.format.height),
        }
    }

    /// Small grayscale still encoded as binary PGM
    fn take_photo(&self) -> Photo {
        let (width, height) = (64u32, 48u32);
        let shade = (self.state.frames.load(Ordering::Relaxed) % 256) as u8;
        let mut data = format!("P5\n{} {}\n255\n", width, height).into_bytes();
        data.extend((0..width * height).map(|i| shade.wrapping_add((i % width) as u8)));
        Photo {
            mime_type: "image/x-portable-graymap".to_string(),
            data: Bytes::from(data),
        }
    }
}

impl CaptureDevice for FakeDevice {
    fn stop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                warn!("Fake producer thread panicked");
            }
        }
        debug!(
            "Fake device stopped after {} frames (notification window {:?})",
            self.state.frames.load(Ordering::Relaxed),
            self.window
        );
    }

    fn suspend(&mut self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    fn refresh_frame(&mut self) {
        self.state.refresh.store(true, Ordering::SeqCst);
    }

    fn set_notification_window(&mut self, window: WindowId) {
        debug!("Fake desktop capture badging window {:?}", window);
        self.window = Some(window);
    }

    fn request_capability(&mut self, request: &CapabilityRequest) -> Result<CapabilityResponse> {
        match request {
            CapabilityRequest::PhotoCapabilities => {
                Ok(CapabilityResponse::PhotoCapabilities(self.capabilities()))
            }
            CapabilityRequest::SetPhotoOptions(settings) => {
                if let Some(zoom) = settings.zoom {
                    self.zoom = zoom.clamp(1.0, 4.0);
                }
                if let Some(torch) = settings.torch {
                    self.torch = torch;
                }
                Ok(CapabilityResponse::OptionsApplied(true))
            }
            CapabilityRequest::TakePhoto => Ok(CapabilityResponse::Photo(self.take_photo())),
        }
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        if self.producer.is_some() {
            self.stop();
        }
    }
}

fn produce(format: VideoFormat, sink: DeviceSink, state: Arc<ProducerState>) {
    let fps = if format.frame_rate > 0.0 {
        format.frame_rate
    } else {
        30.0
    };
    let interval = Duration::from_secs_f32(1.0 / fps);
    let started = Instant::now();
    let mut frame = vec![0u8; format.frame_size()];

    while state.running.load(Ordering::SeqCst) {
        std::thread::sleep(interval);

        let refresh = state.refresh.swap(false, Ordering::SeqCst);
        if state.paused.load(Ordering::SeqCst) && !refresh {
            continue;
        }
        if sink.is_closed() {
            break;
        }

        let n = state.frames.fetch_add(1, Ordering::Relaxed);
        let shade = (n % 256) as u8;
        for (i, byte) in frame.iter_mut().enumerate().take(format.width as usize) {
            *byte = shade.wrapping_add(i as u8);
        }

        let info = FrameInfo {
            format,
            pts: started.elapsed().as_nanos() as u64,
        };
        sink.on_incoming_frame(&frame, info);
    }
}
