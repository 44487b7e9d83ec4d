//! Per-device state

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use crate::buffer_pool::{BufferPool, PoolAccessor, PoolStats};
use crate::client::{ClientSet, DeviceFailure};
use crate::lifecycle::{DeviceState, Effect, EntryState, LifecycleEvent, Rejected};
use crate::types::{CaptureParams, DeviceKey, EntrySerial, LaunchId, StreamKind, VideoFormat};

/// Live record of one device shared by any number of sessions
///
/// The buffer pool is created with the entry and survives device restarts.
#[derive(Debug)]
pub struct DeviceEntry {
    serial: EntrySerial,
    key: DeviceKey,
    params: CaptureParams,
    state: DeviceState,
    pub(crate) clients: ClientSet,
    pool: Arc<BufferPool>,
    /// Launch of the pending or live device
    launch: Option<LaunchId>,
    failure: Option<DeviceFailure>,
    format_in_use: Option<VideoFormat>,
    frames_delivered: u64,
    frames_dropped: u64,
}

impl DeviceEntry {
    pub fn new(serial: EntrySerial, key: DeviceKey, params: CaptureParams, max_buffers: usize) -> Self {
        Self {
            serial,
            key,
            params,
            state: DeviceState::Idle,
            clients: ClientSet::new(),
            pool: BufferPool::new(max_buffers),
            launch: None,
            failure: None,
            format_in_use: None,
            frames_delivered: 0,
            frames_dropped: 0,
        }
    }

    pub fn serial(&self) -> EntrySerial {
        self.serial
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn kind(&self) -> StreamKind {
        self.key.kind
    }

    /// Parameters of the first start
    pub fn params(&self) -> &CaptureParams {
        &self.params
    }

    pub fn state(&self) -> EntryState {
        self.state.kind()
    }

    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    /// Launch of the live device, if started
    pub fn live_launch(&self) -> Option<LaunchId> {
        self.state.launch()
    }

    /// Launch of the pending or live device
    pub fn launch(&self) -> Option<LaunchId> {
        self.launch
    }

    pub(crate) fn set_launch(&mut self, launch: Option<LaunchId>) {
        self.launch = launch;
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn pool_accessor(&self) -> PoolAccessor {
        PoolAccessor::new(&self.pool)
    }

    pub fn failure(&self) -> Option<&DeviceFailure> {
        self.failure.as_ref()
    }

    pub(crate) fn set_failure(&mut self, failure: DeviceFailure) {
        self.failure = Some(failure);
    }

    pub(crate) fn clear_failure(&mut self) {
        self.failure = None;
    }

    /// Format of delivered frames, or the requested one before the first frame
    pub fn format_in_use(&self) -> VideoFormat {
        self.format_in_use.unwrap_or(self.params.requested_format)
    }

    pub(crate) fn record_frame(&mut self, format: VideoFormat) {
        if self.format_in_use.is_none() {
            debug!("Entry {} delivering {}", self.serial, format);
            self.format_in_use = Some(format);
        }
        self.frames_delivered += 1;
    }

    pub(crate) fn record_drop(&mut self) {
        self.frames_dropped += 1;
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    /// Run a lifecycle event through the transition table
    pub(crate) fn transition(&mut self, event: LifecycleEvent) -> Result<Effect, Rejected> {
        let from = self.state.name();
        let event_name = event.name();
        let effect = self.state.apply(event)?;
        debug!(
            "Entry {} ({}): {} --{}--> {}",
            self.serial,
            self.key,
            from,
            event_name,
            self.state.name()
        );
        Ok(effect)
    }

    pub fn snapshot(&self) -> EntryStatus {
        EntryStatus {
            serial: self.serial,
            key: self.key.clone(),
            state: self.state(),
            active_clients: self.clients.active_count(),
            paused_clients: self.clients.paused_count(),
            sessions: self.clients.sessions().iter().map(|s| s.as_u64()).collect(),
            format: self.format_in_use(),
            frames_delivered: self.frames_delivered,
            frames_dropped: self.frames_dropped,
            pool: self.pool.stats(),
            failure: self.failure.as_ref().map(|f| f.to_string()),
        }
    }
}

impl Drop for DeviceEntry {
    fn drop(&mut self) {
        self.pool.retire();
        if self.state.is_started() {
            error!(
                "Entry {} ({}) dropped while its device is live; the worker will stop it at shutdown",
                self.serial, self.key
            );
        }
    }
}

/// Serializable view of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryStatus {
    pub serial: EntrySerial,
    pub key: DeviceKey,
    pub state: EntryState,
    pub active_clients: usize,
    pub paused_clients: usize,
    pub sessions: Vec<u64>,
    pub format: VideoFormat,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub pool: PoolStats,
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientHandle;
    use crate::types::{PixelFormat, SessionId, StreamDescriptor};

    fn entry() -> DeviceEntry {
        DeviceEntry::new(
            EntrySerial::from_raw(1),
            StreamDescriptor::device("cam0").key(),
            CaptureParams::default(),
            3,
        )
    }

    #[test]
    fn test_format_in_use_falls_back_to_requested() {
        let mut entry = entry();
        assert_eq!(entry.format_in_use(), VideoFormat::default());

        let actual = VideoFormat::new(320, 240, 15.0, PixelFormat::Nv12);
        entry.record_frame(actual);
        entry.record_frame(VideoFormat::default());
        assert_eq!(entry.format_in_use(), actual);
        assert_eq!(entry.frames_delivered(), 2);
    }

    #[test]
    fn test_drop_retires_pool() {
        let entry = entry();
        let accessor = entry.pool_accessor();
        assert!(accessor.is_live());
        drop(entry);
        assert!(!accessor.is_live());
    }

    #[test]
    fn test_snapshot_counts_clients() {
        let mut entry = entry();
        let (a, _rx_a) = ClientHandle::new();
        let (b, _rx_b) = ClientHandle::new();
        entry.clients.add(a.clone(), SessionId::from_raw(1));
        entry.clients.add(b, SessionId::from_raw(2));
        entry.clients.pause(a.id());
        let _ = entry.transition(LifecycleEvent::StartQueued);

        let status = entry.snapshot();
        assert_eq!(status.state, EntryState::Queued);
        assert_eq!(status.active_clients, 1);
        assert_eq!(status.paused_clients, 1);
        assert_eq!(status.sessions, vec![1, 2]);
        assert_eq!(status.pool.capacity, 3);
    }
}
