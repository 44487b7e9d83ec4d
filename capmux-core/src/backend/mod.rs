//! Capture backend interface
//!
//! Platform capture code plugs in behind `CaptureBackend`. Every method is
//! called on the device worker thread, so implementations may block.
//!
//! Devices push frames and errors through a `DeviceSink`, which forwards
//! them to the session manager.

pub mod fake;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::buffer_pool::{BufferId, BufferPool, WritableBuffer};
use crate::error::{CapmuxError, Result};
use crate::types::{
    CapabilityRequest, CapabilityResponse, CaptureParams, DeviceDescriptor, FrameInfo, LaunchId,
    VideoFormat, WindowId,
};
use crate::worker::WorkerEvent;

pub use fake::{FakeBackend, FakeDeviceSpec};

/// What a start request resolves to once the device id is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartTarget {
    /// An enumerated hardware device
    Device(DeviceDescriptor),
    /// A tab or application surface
    Tab(String),
    /// A screen or window
    Desktop(String),
}

impl StartTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Device(descriptor) => &descriptor.device_id,
            Self::Tab(id) | Self::Desktop(id) => id,
        }
    }
}

impl std::fmt::Display for StartTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(descriptor) => write!(f, "device {}", descriptor.name_and_model()),
            Self::Tab(id) => write!(f, "tab {}", id),
            Self::Desktop(id) => write!(f, "desktop {}", id),
        }
    }
}

/// Source of capture devices
pub trait CaptureBackend: Send + Sync + 'static {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// List currently attached hardware devices
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Query the formats a device supports
    fn probe(&self, descriptor: &DeviceDescriptor) -> Result<Vec<VideoFormat>>;

    /// Create a device and start it delivering into `sink`
    fn create_and_start(
        &self,
        target: &StartTarget,
        params: &CaptureParams,
        sink: DeviceSink,
    ) -> Result<Box<dyn CaptureDevice>>;
}

/// A live capture device, owned by the worker thread
pub trait CaptureDevice: Send {
    /// Stop capturing; the device is dropped right after
    fn stop(&mut self);

    /// Hint that no client is consuming frames
    fn suspend(&mut self) {}

    /// Hint that a client is consuming frames again
    fn resume(&mut self) {}

    /// Ask for a frame to be delivered even if nothing changed
    fn refresh_frame(&mut self) {}

    /// Window to badge while a desktop capture is running
    fn set_notification_window(&mut self, _window: WindowId) {}

    /// Photo and other device-specific operations
    fn request_capability(&mut self, request: &CapabilityRequest) -> Result<CapabilityResponse> {
        Err(CapmuxError::unsupported(request.name()))
    }
}

/// Something a device reported through its sink
#[derive(Debug)]
pub enum SinkEvent {
    /// A buffer was filled and committed to the pool
    FrameReady { id: BufferId, info: FrameInfo },
    /// A frame was lost because the pool was full
    FrameDropped,
    /// The device failed
    Error(String),
    /// The device stopped producing on its own
    Ended,
    /// Diagnostic message from the device
    Log(String),
}

/// Channel from a running device back to the session manager
#[derive(Debug, Clone)]
pub struct DeviceSink {
    launch: LaunchId,
    pool: Arc<BufferPool>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl DeviceSink {
    pub(crate) fn new(
        launch: LaunchId,
        pool: Arc<BufferPool>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            launch,
            pool,
            events,
        }
    }

    pub fn launch(&self) -> LaunchId {
        self.launch
    }

    /// Reserve a buffer to fill
    pub fn reserve(&self, size: usize) -> Option<WritableBuffer> {
        self.pool.reserve(size)
    }

    /// Hand a filled buffer to the clients
    pub fn deliver(&self, buffer: WritableBuffer, info: FrameInfo) {
        let id = self.pool.commit(buffer);
        self.post(SinkEvent::FrameReady { id, info });
    }

    /// Copy a frame into the pool and deliver it
    ///
    /// Returns false when the pool is exhausted and the frame was dropped.
    pub fn on_incoming_frame(&self, data: &[u8], info: FrameInfo) -> bool {
        match self.reserve(data.len()) {
            Some(mut buffer) => {
                buffer.data_mut().copy_from_slice(data);
                self.deliver(buffer, info);
                true
            }
            None => {
                self.post(SinkEvent::FrameDropped);
                false
            }
        }
    }

    pub fn on_error(&self, message: impl Into<String>) {
        self.post(SinkEvent::Error(message.into()));
    }

    pub fn on_ended(&self) {
        self.post(SinkEvent::Ended);
    }

    pub fn on_log(&self, message: impl Into<String>) {
        self.post(SinkEvent::Log(message.into()));
    }

    /// Whether the manager is still listening
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    fn post(&self, event: SinkEvent) {
        let launch = self.launch;
        if self.events.send(WorkerEvent::Sink { launch, event }).is_err() {
            trace!("Sink for {} outlived the manager", launch);
        }
    }
}
