//! Capmux Core Library
//!
//! Capture-device session manager: many clients, few devices.
//!
//! This library provides:
//! - Sessions that name a camera, tab or desktop stream
//! - Shared device entries with reference-counted clients
//! - A serialized start queue and a dedicated device worker thread
//! - Deferred capability requests replayed once a device starts
//! - A Unix-socket control interface for daemon mode
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌────────────────┐    ┌─────────────────┐
//! │ Clients         │───▶│ SessionManager │───▶│ Device Worker   │
//! │ (ClientHandle)  │◀───│ (control task) │◀───│ (CaptureBackend)│
//! └─────────────────┘    └────────────────┘    └─────────────────┘
//! ```

pub mod backend;
pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod deferred;
pub mod entry;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod manager;
pub mod registry;
pub mod service;
pub mod session;
pub mod start_queue;
pub mod stats;
pub mod types;
pub mod worker;

pub use backend::{CaptureBackend, CaptureDevice, DeviceSink, FakeBackend, FakeDeviceSpec, StartTarget};
pub use buffer_pool::{BufferPool, PoolAccessor, ReadyBuffer};
pub use client::{ClientEvent, ClientHandle, DeviceFailure, FailureCause};
pub use config::{ConfigFile, ManagerConfig};
pub use error::{CapmuxError, Result, ResultExt};
pub use manager::{ManagerEvent, SessionManager};
pub use service::{ManagerHandle, ManagerService};
pub use stats::{CaptureStats, ManagerStatus};
pub use types::{
    AppState, CapabilityRequest, CapabilityResponse, CaptureParams, ClientId, DeviceDescriptor,
    PixelFormat, SessionId, StreamDescriptor, StreamKind, VideoFormat, WindowId,
};
