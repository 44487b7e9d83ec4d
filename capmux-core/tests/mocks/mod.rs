//! Mock infrastructure for testing
//!
//! A scripted capture backend that records every call the device worker
//! makes, can hold starts until a test releases them, and exposes each
//! device's sink so tests can push frames and errors.

#![allow(dead_code)]

use bytes::Bytes;
use capmux_core::backend::{CaptureBackend, CaptureDevice, DeviceSink, StartTarget};
use capmux_core::error::{CapmuxError, Result};
use capmux_core::types::{
    CapabilityRequest, CapabilityResponse, CaptureParams, DeviceDescriptor, FrameInfo, Photo,
    PixelFormat, SessionId, VideoFormat, WindowId,
};
use capmux_core::{ClientEvent, ClientHandle, ManagerConfig, SessionManager};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Longest a gated start waits before giving up on the test
const GATE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the async helpers wait for the worker
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Gate {
    enabled: bool,
    permits: usize,
}

/// Capture backend driven by the test
pub struct MockBackend {
    devices: Mutex<Vec<(DeviceDescriptor, Vec<VideoFormat>)>>,
    failing: Mutex<HashSet<String>>,
    unprobeable: Mutex<HashSet<String>>,
    calls: Arc<Mutex<Vec<String>>>,
    sinks: Mutex<HashMap<String, DeviceSink>>,
    gate: Mutex<Gate>,
    gate_cv: Condvar,
}

impl MockBackend {
    /// Backend with the given camera ids, each supporting 640x480 and 1280x720
    pub fn new(ids: &[&str]) -> Arc<Self> {
        let devices = ids
            .iter()
            .map(|id| {
                (
                    DeviceDescriptor::new(*id, format!("Mock {}", id)).with_model("mock:0001"),
                    vec![
                        VideoFormat::new(1280, 720, 30.0, PixelFormat::Mjpeg),
                        VideoFormat::new(640, 480, 30.0, PixelFormat::Yuy2),
                    ],
                )
            })
            .collect();

        Arc::new(Self {
            devices: Mutex::new(devices),
            failing: Mutex::new(HashSet::new()),
            unprobeable: Mutex::new(HashSet::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            sinks: Mutex::new(HashMap::new()),
            gate: Mutex::new(Gate::default()),
            gate_cv: Condvar::new(),
        })
    }

    /// Hold every start until `release_start` or `open_gate`
    pub fn close_gate(&self) {
        self.gate.lock().enabled = true;
    }

    /// Let one held start proceed
    pub fn release_start(&self) {
        self.gate.lock().permits += 1;
        self.gate_cv.notify_all();
    }

    /// Stop holding starts
    pub fn open_gate(&self) {
        self.gate.lock().enabled = false;
        self.gate_cv.notify_all();
    }

    /// Make creation of `id` fail
    pub fn fail_device(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    /// Make format probing of `id` fail
    pub fn fail_probe(&self, id: &str) {
        self.unprobeable.lock().insert(id.to_string());
    }

    pub fn unplug(&self, id: &str) {
        self.devices.lock().retain(|(d, _)| d.device_id != id);
    }

    /// Every call the worker made, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Wait until the worker has made `n` calls starting with `prefix`
    pub async fn wait_for(&self, prefix: &str, n: usize) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.count(prefix) >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// Sink of the device started for `id`
    pub fn sink(&self, id: &str) -> Option<DeviceSink> {
        self.sinks.lock().get(id).cloned()
    }

    /// Push one small frame through the device's sink
    pub fn push_frame(&self, id: &str) -> bool {
        let Some(sink) = self.sink(id) else {
            return false;
        };
        let format = VideoFormat::new(4, 4, 30.0, PixelFormat::I420);
        let data = vec![0x80u8; format.frame_size()];
        sink.on_incoming_frame(&data, FrameInfo { format, pts: 0 })
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn wait_gate(&self) {
        let mut gate = self.gate.lock();
        while gate.enabled && gate.permits == 0 {
            if self.gate_cv.wait_for(&mut gate, GATE_TIMEOUT).timed_out() {
                return;
            }
        }
        if gate.permits > 0 {
            gate.permits -= 1;
        }
    }
}

impl CaptureBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        self.record("enumerate".to_string());
        Ok(self.devices.lock().iter().map(|(d, _)| d.clone()).collect())
    }

    fn probe(&self, descriptor: &DeviceDescriptor) -> Result<Vec<VideoFormat>> {
        self.record(format!("probe {}", descriptor.device_id));
        if self.unprobeable.lock().contains(&descriptor.device_id) {
            return Err(CapmuxError::device("probe failed"));
        }
        self.devices
            .lock()
            .iter()
            .find(|(d, _)| d.device_id == descriptor.device_id)
            .map(|(_, formats)| formats.clone())
            .ok_or_else(|| CapmuxError::DeviceNotFound(descriptor.device_id.clone()))
    }

    fn create_and_start(
        &self,
        target: &StartTarget,
        params: &CaptureParams,
        sink: DeviceSink,
    ) -> Result<Box<dyn CaptureDevice>> {
        let id = target.id().to_string();
        self.record(format!("start {}", id));
        self.wait_gate();

        if self.failing.lock().contains(&id) {
            return Err(CapmuxError::creation(format!("{} is busy", id)));
        }

        self.sinks.lock().insert(id.clone(), sink);
        Ok(Box::new(MockDevice {
            id,
            format: params.requested_format,
            calls: self.calls.clone(),
        }))
    }
}

struct MockDevice {
    id: String,
    format: VideoFormat,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockDevice {
    fn record(&self, call: &str) {
        self.calls.lock().push(format!("{} {}", call, self.id));
    }
}

impl CaptureDevice for MockDevice {
    fn stop(&mut self) {
        self.record("stop");
    }

    fn suspend(&mut self) {
        self.record("suspend");
    }

    fn resume(&mut self) {
        self.record("resume");
    }

    fn refresh_frame(&mut self) {
        self.record("refresh");
    }

    fn set_notification_window(&mut self, window: WindowId) {
        self.calls
            .lock()
            .push(format!("window {} {}", self.id, window.0));
    }

    fn request_capability(&mut self, request: &CapabilityRequest) -> Result<CapabilityResponse> {
        self.record(request.name());
        match request {
            CapabilityRequest::TakePhoto => Ok(CapabilityResponse::Photo(Photo {
                mime_type: "image/x-portable-graymap".to_string(),
                data: Bytes::from(format!("{}x{}", self.format.width, self.format.height)),
            })),
            CapabilityRequest::SetPhotoOptions(_) => Ok(CapabilityResponse::OptionsApplied(true)),
            CapabilityRequest::PhotoCapabilities => Err(CapmuxError::unsupported(request.name())),
        }
    }
}

/// Manager over a mock backend with a worker thread named for the test
pub fn manager(backend: &Arc<MockBackend>) -> SessionManager {
    let config = ManagerConfig::default().with_worker_thread_name("capmux-test-device");
    SessionManager::new(config, backend.clone()).expect("manager should start")
}

/// Manager that has already enumerated the mock's devices
pub async fn enumerated_manager(backend: &Arc<MockBackend>) -> SessionManager {
    let mut manager = manager(backend);
    let ticket = manager.enumerate_devices();
    assert!(manager.process_next().await);
    ticket.wait().await.expect("enumeration should succeed");
    manager
}

/// Handle the next worker event, failing the test if none arrives in time
pub async fn pump(manager: &mut SessionManager) {
    let handled = tokio::time::timeout(WAIT_TIMEOUT, manager.process_next())
        .await
        .expect("worker event should arrive");
    assert!(handled, "worker events should still be flowing");
}

/// New client attached to nothing yet
pub fn client() -> (ClientHandle, UnboundedReceiver<ClientEvent>) {
    ClientHandle::new()
}

/// Next client event, failing the test if none arrives in time
pub async fn next_event(rx: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT_TIMEOUT, rx.recv())
        .await
        .expect("client event should arrive")
        .expect("client channel should be open")
}

/// Drain whatever client events are already queued
pub fn drain(rx: &mut UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Open a device session and start a client on it
pub fn start_device(
    manager: &mut SessionManager,
    id: &str,
) -> (SessionId, ClientHandle, UnboundedReceiver<ClientEvent>) {
    let session = manager.open(capmux_core::StreamDescriptor::device(id));
    let (handle, rx) = client();
    manager
        .start_capture_for_client(session, CaptureParams::default(), handle.clone())
        .expect("start should be accepted");
    (session, handle, rx)
}
