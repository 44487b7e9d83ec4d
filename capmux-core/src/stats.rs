//! Capture statistics and manager status snapshots

use serde::{Deserialize, Serialize};

use crate::entry::EntryStatus;
use crate::types::{AppState, EntrySerial, StreamKind};

/// Counters for capture start/stop outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Clients that started capturing a hardware device
    pub starts_device: u64,
    /// Clients that started capturing a tab or desktop
    pub starts_derived: u64,
    /// Clients that stopped normally after receiving frames
    pub stops_ok: u64,
    /// Hardware clients that stopped before any frame arrived
    pub stops_ok_no_frames_device: u64,
    /// Tab or desktop clients that stopped before any frame arrived
    pub stops_ok_no_frames_derived: u64,
    /// Clients that stopped because of a device error
    pub stops_due_to_error: u64,
    /// Device starts that failed
    pub start_failures: u64,
    /// Frames handed to clients
    pub frames_delivered: u64,
    /// Frames lost to full buffer pools
    pub frames_dropped: u64,
}

impl CaptureStats {
    pub(crate) fn record_start(&mut self, kind: StreamKind) {
        if kind.is_derived() {
            self.starts_derived += 1;
        } else {
            self.starts_device += 1;
        }
    }

    pub(crate) fn record_stop(&mut self, kind: StreamKind, had_frames: bool, due_to_error: bool) {
        match (due_to_error, had_frames) {
            (true, _) => self.stops_due_to_error += 1,
            (false, true) => self.stops_ok += 1,
            (false, false) if kind.is_derived() => self.stops_ok_no_frames_derived += 1,
            (false, false) => self.stops_ok_no_frames_device += 1,
        }
    }

    /// Total stops of every kind
    pub fn total_stops(&self) -> u64 {
        self.stops_ok
            + self.stops_ok_no_frames_device
            + self.stops_ok_no_frames_derived
            + self.stops_due_to_error
    }
}

/// One open session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub id: u64,
    pub kind: StreamKind,
    pub device_id: String,
    pub name: String,
}

/// Snapshot of everything the manager tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub sessions: Vec<SessionStatus>,
    pub entries: Vec<EntryStatus>,
    /// Start requests waiting or in flight
    pub queue_len: usize,
    /// Entry whose start is running on the worker
    pub in_flight: Option<EntrySerial>,
    /// Stop jobs posted but not yet completed
    pub pending_stops: usize,
    /// Capability requests waiting for a device
    pub deferred: usize,
    /// Devices in the registry
    pub known_devices: usize,
    /// Whether a device enumeration has completed
    pub enumerated: bool,
    /// Whether the device worker thread is alive
    pub worker_running: bool,
    pub app_state: AppState,
    pub stats: CaptureStats,
}
