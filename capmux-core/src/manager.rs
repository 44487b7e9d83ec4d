//! Session manager
//!
//! Multiplexes sessions onto device entries, serializes device starts
//! through the start queue and routes worker completions back into entry
//! state. Everything here runs on one control context (`&mut self`); all
//! blocking hardware work is posted to the device worker.
//!
//! Worker results arrive as `WorkerEvent`s. Either drive them yourself with
//! `process_next`/`process_pending`, or hand the manager to
//! `ManagerService`, which does it on a tokio task.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{CaptureBackend, DeviceSink, SinkEvent, StartTarget};
use crate::buffer_pool::{PoolAccessor, ReadyBuffer};
use crate::client::{ClientEvent, ClientHandle, DeviceFailure};
use crate::config::ManagerConfig;
use crate::deferred::{CapabilityTicket, DeferredQueue};
use crate::entry::{DeviceEntry, EntryStatus};
use crate::error::{CapmuxError, Result};
use crate::lifecycle::{DeviceToken, Effect, EntryState, LifecycleEvent, Rejected};
use crate::registry::{DeviceRegistry, EnumerationTicket};
use crate::session::SessionTable;
use crate::start_queue::{StartQueue, StartRequest};
use crate::stats::{CaptureStats, ManagerStatus, SessionStatus};
use crate::types::{
    AppState, CapabilityRequest, CaptureParams, ClientId, DeviceDescriptor, DeviceKey, EntrySerial,
    LaunchId, SessionId, StreamDescriptor, StreamKind, VideoFormat, WindowId,
};
use crate::worker::{Worker, WorkerEvent, WorkerJob};

/// Notifications for whoever opened sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ManagerEvent {
    /// A session was opened
    Opened { session: SessionId, kind: StreamKind },
    /// A session was closed
    Closed { session: SessionId, kind: StreamKind },
    /// Capture on the session's device was aborted by a device error
    Aborted { session: SessionId, kind: StreamKind },
    /// The device registry was refreshed
    DevicesEnumerated { count: usize },
}

/// Multiplexes capture sessions onto shared devices
pub struct SessionManager {
    config: ManagerConfig,
    sessions: SessionTable,
    registry: DeviceRegistry,
    entries: Vec<DeviceEntry>,
    start_queue: StartQueue,
    deferred: DeferredQueue,
    /// Desktop notification windows waiting for their device
    notification_windows: HashMap<SessionId, WindowId>,
    next_serial: u64,
    next_attempt: u64,
    worker: Worker,
    /// Sender handed to device sinks
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_events: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
    listeners: broadcast::Sender<ManagerEvent>,
    pending_stops: HashSet<LaunchId>,
    app_state: AppState,
    stats: CaptureStats,
}

impl SessionManager {
    /// Create a manager and spawn its device worker
    pub fn new(config: ManagerConfig, backend: Arc<dyn CaptureBackend>) -> Result<Self> {
        config.validate_strict().map_err(CapmuxError::config)?;

        let (event_tx, worker_events) = mpsc::unbounded_channel();
        info!("Starting session manager with {} backend", backend.name());
        let worker = Worker::spawn(&config.worker_thread_name, backend, event_tx.clone())?;
        let (listeners, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            config,
            sessions: SessionTable::new(),
            registry: DeviceRegistry::new(),
            entries: Vec::new(),
            start_queue: StartQueue::new(),
            deferred: DeferredQueue::new(),
            notification_windows: HashMap::new(),
            next_serial: 1,
            next_attempt: 1,
            worker,
            event_tx,
            worker_events: Some(worker_events),
            listeners,
            pending_stops: HashSet::new(),
            app_state: AppState::Foreground,
            stats: CaptureStats::default(),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Subscribe to listener events
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.listeners.subscribe()
    }

    // ---------------------------------------------------------------------
    // Sessions
    // ---------------------------------------------------------------------

    /// Open a session for a stream; bookkeeping only
    pub fn open(&mut self, descriptor: StreamDescriptor) -> SessionId {
        let kind = descriptor.kind;
        let id = self.sessions.open(descriptor);
        info!("Opened {} ({})", id, kind);
        self.emit(ManagerEvent::Opened { session: id, kind });
        id
    }

    /// Close a session, detaching its clients and failing its queued requests
    pub fn close(&mut self, session: SessionId) {
        let Some(descriptor) = self.sessions.get(session).cloned() else {
            warn!("Close of unknown {}", session);
            return;
        };

        if let Some(idx) = self.entry_index(&descriptor.key()) {
            let entry = &mut self.entries[idx];
            let kind = entry.kind();
            let had_frames = entry.frames_delivered() > 0;
            let detached = entry.clients.remove_session(session);
            for attachment in &detached {
                attachment.client.send(ClientEvent::Stopped);
                self.stats.record_stop(kind, had_frames, false);
            }
            if !detached.is_empty() {
                debug!("Detached {} client(s) of {}", detached.len(), session);
            }
            if self.entries[idx].clients.is_empty() {
                self.destroy_entry(idx);
            } else if detached.iter().any(|a| !a.paused) {
                self.suspend_if_all_paused(idx);
            }
        }

        let failed = self.deferred.drop_session(session);
        if failed > 0 {
            debug!("Failed {} deferred request(s) of {}", failed, session);
        }
        self.notification_windows.remove(&session);
        self.sessions.close(session);

        info!("Closed {}", session);
        self.emit(ManagerEvent::Closed {
            session,
            kind: descriptor.kind,
        });
    }

    // ---------------------------------------------------------------------
    // Capture
    // ---------------------------------------------------------------------

    /// Attach a client to the session's device, starting it if needed
    ///
    /// The client is registered as active before the device starts; it gets
    /// `ClientEvent::Started` once frames can flow.
    pub fn start_capture_for_client(
        &mut self,
        session: SessionId,
        params: CaptureParams,
        client: ClientHandle,
    ) -> Result<PoolAccessor> {
        let descriptor = self
            .sessions
            .get(session)
            .cloned()
            .ok_or(CapmuxError::UnknownSession(session))?;
        let key = descriptor.key();

        let idx = match self.entry_index(&key) {
            Some(idx) => idx,
            None => self.create_entry(key, params),
        };

        let entry = &mut self.entries[idx];
        if !entry.clients.add(client.clone(), session) {
            warn!("{} is already capturing {}", client.id(), entry.key());
            return Ok(entry.pool_accessor());
        }
        debug!("{} attached to {} via {}", client.id(), entry.key(), session);
        self.stats.record_start(entry.kind());

        let accessor = entry.pool_accessor();
        if entry.clients.len() == 1 && entry.state() == EntryState::Idle {
            self.queue_start(idx, Some(session));
        } else if entry.is_started() {
            client.send(ClientEvent::Started);
            if entry.clients.paused_count() > 0 {
                self.resume_if_first_active(idx);
            }
        } else if let Some(failure) = entry.failure() {
            client.send(ClientEvent::Error(failure.clone()));
        }

        Ok(accessor)
    }

    /// Detach a client; the device is torn down when its last client leaves
    ///
    /// With `aborted_due_to_error` every other client of the device is
    /// detached too and every session on the device is told it was aborted.
    pub fn stop_capture_for_client(
        &mut self,
        session: SessionId,
        client: ClientId,
        aborted_due_to_error: bool,
    ) {
        let Some(idx) = self.entry_index_for_client(client) else {
            warn!("{} is not capturing ({})", client, session);
            return;
        };

        let entry = &mut self.entries[idx];
        let kind = entry.kind();
        let had_frames = entry.frames_delivered() > 0;
        let Some(detached) = entry.clients.remove(client) else {
            return;
        };
        if detached.session != session {
            warn!(
                "{} stopped via {} but attached via {}",
                client, session, detached.session
            );
        }
        self.stats.record_stop(kind, had_frames, aborted_due_to_error);
        debug!("{} detached from {}", client, entry.key());

        if aborted_due_to_error {
            let key = entry.key().clone();
            for other in entry.clients.drain_except(client) {
                other.client.send(ClientEvent::Aborted);
            }
            warn!("Capture of {} aborted after a device error", key);

            let affected: Vec<SessionId> = self
                .sessions
                .iter()
                .filter(|(_, d)| d.matches(&key))
                .map(|(id, _)| id)
                .collect();
            for session in affected {
                self.emit(ManagerEvent::Aborted { session, kind });
            }
        }

        let entry = &self.entries[idx];
        if entry.clients.is_empty() {
            self.destroy_entry(idx);
        } else if !detached.paused {
            self.suspend_if_all_paused(idx);
        }
    }

    /// Stop delivering frames to a client without detaching it
    pub fn pause_capture_for_client(&mut self, session: SessionId, client: ClientId) {
        let Some(idx) = self.entry_index_for_client(client) else {
            warn!("Pause of {} which is not capturing ({})", client, session);
            return;
        };

        let entry = &mut self.entries[idx];
        if !entry.clients.pause(client) {
            debug!("{} already paused", client);
            return;
        }
        self.suspend_if_all_paused(idx);
    }

    /// Resume frame delivery to a paused client
    pub fn resume_capture_for_client(&mut self, session: SessionId, client: ClientId) {
        let Some(idx) = self.entry_index_for_client(client) else {
            warn!("Resume of {} which is not capturing ({})", client, session);
            return;
        };

        let entry = &mut self.entries[idx];
        if !entry.clients.resume(client) {
            debug!("{} was not paused", client);
            return;
        }
        self.resume_if_first_active(idx);
    }

    /// Ask the session's device for a fresh frame; no-op unless started
    pub fn request_refresh_frame_for_client(&mut self, session: SessionId) {
        let Some(launch) = self
            .entry_for_session(session)
            .and_then(|entry| entry.live_launch())
        else {
            trace!("Refresh for {} ignored, no live device", session);
            return;
        };
        self.post(WorkerJob::RefreshFrame { launch });
    }

    /// Run a capability request against the session's device
    ///
    /// Dispatched at once when the device is live, otherwise queued until
    /// it starts.
    pub fn get_capability(
        &mut self,
        session: SessionId,
        request: CapabilityRequest,
    ) -> Result<CapabilityTicket> {
        if !self.sessions.contains(session) {
            return Err(CapmuxError::UnknownSession(session));
        }
        let entry = self
            .entry_for_session(session)
            .ok_or(CapmuxError::NotCapturing(session))?;

        let (reply, rx) = oneshot::channel();
        match entry.live_launch() {
            Some(launch) => {
                self.worker.post(WorkerJob::Capability {
                    launch,
                    request,
                    reply,
                })?;
                Ok(CapabilityTicket::new(false, rx))
            }
            None => {
                self.deferred.push(session, request, reply);
                Ok(CapabilityTicket::new(true, rx))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Formats and devices
    // ---------------------------------------------------------------------

    /// Cached formats of the session's device
    pub fn supported_formats(&self, session: SessionId) -> Result<Vec<VideoFormat>> {
        let descriptor = self
            .sessions
            .get(session)
            .ok_or(CapmuxError::UnknownSession(session))?;
        if descriptor.kind != StreamKind::Device {
            return Ok(Vec::new());
        }
        Ok(self.registry.supported_formats(&descriptor.device_id))
    }

    /// Format the session's device is delivering
    pub fn formats_in_use(&self, session: SessionId) -> Result<Vec<VideoFormat>> {
        if !self.sessions.contains(session) {
            return Err(CapmuxError::UnknownSession(session));
        }
        Ok(self
            .entry_for_session(session)
            .map(|entry| vec![entry.format_in_use()])
            .unwrap_or_default())
    }

    /// Window to badge while the session's desktop capture runs
    pub fn set_notification_window(&mut self, session: SessionId, window: WindowId) -> Result<()> {
        let descriptor = self
            .sessions
            .get(session)
            .ok_or(CapmuxError::UnknownSession(session))?;
        if descriptor.kind != StreamKind::Desktop {
            debug!("Notification window ignored for {} ({})", session, descriptor.kind);
            return Ok(());
        }

        match self
            .entry_for_session(session)
            .and_then(|entry| entry.live_launch())
        {
            Some(launch) => self.post(WorkerJob::SetNotificationWindow { launch, window }),
            None => {
                self.notification_windows.insert(session, window);
            }
        }
        Ok(())
    }

    /// Refresh the device registry on the worker
    pub fn enumerate_devices(&mut self) -> EnumerationTicket {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerJob::Enumerate {
            cached: self.registry.devices().to_vec(),
            reply,
        });
        EnumerationTicket::new(rx)
    }

    /// Devices from the last enumeration
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.registry.descriptors()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Application state
    // ---------------------------------------------------------------------

    /// React to the application going to the background or foreground
    pub fn on_application_state(&mut self, state: AppState) {
        if state == self.app_state {
            return;
        }
        info!("Application moved to the {}", state);
        self.app_state = state;
        match state {
            AppState::Background => self.suspend_devices(),
            AppState::Foreground => self.resume_devices(),
        }
    }

    /// Release every hardware device while keeping entries and clients
    pub fn suspend_devices(&mut self) {
        let mut effects = Vec::new();
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.kind() == StreamKind::Device)
        {
            match entry.transition(LifecycleEvent::Released) {
                Ok(effect) => effects.push((entry.serial(), Ok(effect))),
                Err(rejected) => effects.push((entry.serial(), Err(rejected))),
            }
            entry.set_launch(None);
        }

        for (serial, outcome) in effects {
            match outcome {
                Ok(effect) => self.apply_effect(serial, effect),
                Err(rejected) => self.handle_rejected(serial, rejected),
            }
        }
    }

    /// Restart every released hardware device
    pub fn resume_devices(&mut self) {
        let restart: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.kind() == StreamKind::Device
                    && e.state() == EntryState::Idle
                    && e.failure().is_none()
            })
            .map(|(idx, _)| idx)
            .collect();

        for idx in restart {
            debug!("Restarting {}", self.entries[idx].key());
            self.queue_start(idx, None);
        }
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    // ---------------------------------------------------------------------
    // Worker events
    // ---------------------------------------------------------------------

    /// Take the worker event receiver to drive it elsewhere
    pub fn take_worker_events(&mut self) -> Option<mpsc::UnboundedReceiver<WorkerEvent>> {
        self.worker_events.take()
    }

    /// Wait for the next worker event and handle it
    ///
    /// Returns false once the receiver has been taken or closed.
    pub async fn process_next(&mut self) -> bool {
        let Some(events) = self.worker_events.as_mut() else {
            return false;
        };
        let next = events.recv().await;
        match next {
            Some(event) => {
                self.handle_worker_event(event);
                true
            }
            None => false,
        }
    }

    /// Handle every worker event already waiting
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.worker_events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_worker_event(event);
            handled += 1;
        }
        handled
    }

    /// Apply one worker result
    pub fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Started { launch, result } => self.on_device_started(launch, result),
            WorkerEvent::Stopped { launch } => {
                if self.pending_stops.remove(&launch) {
                    debug!("Device for launch {} stopped", launch);
                }
            }
            WorkerEvent::Enumerated { result, reply } => match result {
                Ok(devices) => {
                    let count = devices.len();
                    self.registry.install(devices);
                    self.emit(ManagerEvent::DevicesEnumerated { count });
                    let _ = reply.send(Ok(self.registry.descriptors()));
                }
                Err(e) => {
                    warn!("Device enumeration failed: {}", e);
                    let _ = reply.send(Err(e));
                }
            },
            WorkerEvent::Sink { launch, event } => self.on_sink_event(launch, event),
        }
    }

    fn on_device_started(&mut self, launch: LaunchId, result: Result<DeviceToken>) {
        let request = self.start_queue.finish();
        let aborted = match &request {
            Some(request) if request.serial == launch.serial => request.is_aborted(),
            Some(request) => {
                error!(
                    "Start completion for {} but entry {} was in flight",
                    launch, request.serial
                );
                true
            }
            None => {
                error!("Start completion for {} with nothing in flight", launch);
                true
            }
        };

        let idx = if aborted {
            None
        } else {
            self.entry_index_by_launch(launch)
        };

        match (result, idx) {
            (Ok(token), None) => {
                debug!("Start of {} completed after abort, stopping it", launch);
                self.post_stop(token);
            }
            (Err(e), None) => {
                debug!("Aborted start of {} failed: {}", launch, e);
            }
            (Ok(token), Some(idx)) => {
                let serial = self.entries[idx].serial();
                match self.entries[idx].transition(LifecycleEvent::StartSucceeded(token)) {
                    Ok(effect) => self.apply_effect(serial, effect),
                    Err(rejected) => self.handle_rejected(serial, rejected),
                }
                let session = request.and_then(|r| r.session);
                self.on_entry_started(idx, session);
            }
            (Err(e), Some(idx)) => {
                let entry = &mut self.entries[idx];
                warn!("Failed to start {}: {}", entry.key(), e);
                let serial = entry.serial();
                let outcome = entry.transition(LifecycleEvent::StartFailed);
                let failure = DeviceFailure::creation(e.to_string());
                entry.set_launch(None);
                entry.set_failure(failure.clone());
                entry
                    .clients
                    .broadcast(|| ClientEvent::Error(failure.clone()));
                self.stats.start_failures += 1;
                match outcome {
                    Ok(effect) => self.apply_effect(serial, effect),
                    Err(rejected) => self.handle_rejected(serial, rejected),
                }
            }
        }

        self.process_start_queue();
    }

    /// Notify clients and flush everything that was waiting for the device
    fn on_entry_started(&mut self, idx: usize, session: Option<SessionId>) {
        let entry = &self.entries[idx];
        let Some(launch) = entry.live_launch() else {
            return;
        };
        let key = entry.key().clone();
        info!("Device {} started ({})", key, launch);

        entry.clients.broadcast(|| ClientEvent::Started);
        if entry.clients.active_count() == 0 {
            debug!("{} started with every client paused", key);
            self.post(WorkerJob::Suspend { launch });
        }

        if key.kind == StreamKind::Desktop {
            if let Some(window) = session.and_then(|s| self.notification_windows.remove(&s)) {
                self.post(WorkerJob::SetNotificationWindow { launch, window });
            }
        }

        let sessions = &self.sessions;
        let ready = self.deferred.take_where(|r| {
            sessions
                .get(r.session)
                .map(|d| d.matches(&key))
                .unwrap_or(false)
        });
        for deferred in ready {
            debug!("Replaying {} for {}", deferred.request.name(), deferred.session);
            self.post(WorkerJob::Capability {
                launch,
                request: deferred.request,
                reply: deferred.reply,
            });
        }
    }

    fn on_sink_event(&mut self, launch: LaunchId, event: SinkEvent) {
        let Some(idx) = self
            .entries
            .iter()
            .position(|e| e.live_launch() == Some(launch))
        else {
            // Late event from a device being stopped
            if let SinkEvent::FrameReady { id, .. } = event {
                if let Some(entry) = self.entries.iter().find(|e| e.serial() == launch.serial) {
                    entry.pool().hold(id, 0);
                }
            }
            trace!("Dropping sink event from stale launch {}", launch);
            return;
        };

        let entry = &mut self.entries[idx];
        match event {
            SinkEvent::FrameReady { id, info } => {
                entry.record_frame(info.format);
                self.stats.frames_delivered += 1;

                let pool = entry.pool().clone();
                let consumers = entry.clients.active_count();
                pool.hold(id, consumers);
                if consumers == 0 {
                    return;
                }
                let Some(data) = pool.read(id) else {
                    warn!("Frame {:?} of {} vanished from the pool", id, entry.key());
                    return;
                };
                trace!("Delivering frame {:?} to {} client(s)", id, consumers);
                for client in entry.clients.active() {
                    client.send(ClientEvent::Buffer(ReadyBuffer::new(
                        id,
                        data.clone(),
                        info,
                        &pool,
                    )));
                }
            }
            SinkEvent::FrameDropped => {
                entry.record_drop();
                self.stats.frames_dropped += 1;
            }
            SinkEvent::Error(message) => {
                warn!("Device {} error: {}", entry.key(), message);
                let failure = DeviceFailure::runtime(message);
                entry.set_failure(failure.clone());
                entry
                    .clients
                    .broadcast(|| ClientEvent::Error(failure.clone()));
            }
            SinkEvent::Ended => {
                info!("Device {} ended", entry.key());
                entry.clients.broadcast(|| ClientEvent::Ended);
            }
            SinkEvent::Log(message) => {
                debug!("Device {}: {}", entry.key(), message);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            sessions: self
                .sessions
                .iter()
                .map(|(id, d)| SessionStatus {
                    id: id.as_u64(),
                    kind: d.kind,
                    device_id: d.device_id.clone(),
                    name: d.name.clone(),
                })
                .collect(),
            entries: self.entries.iter().map(|e| e.snapshot()).collect(),
            queue_len: self.start_queue.len(),
            in_flight: self.start_queue.in_flight().map(|r| r.serial),
            pending_stops: self.pending_stops.len(),
            deferred: self.deferred.len(),
            known_devices: self.registry.devices().len(),
            enumerated: self.registry.is_enumerated(),
            worker_running: self.worker.is_running(),
            app_state: self.app_state,
            stats: self.stats,
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of the entry serving a session
    pub fn entry_status(&self, session: SessionId) -> Option<EntryStatus> {
        self.entry_for_session(session).map(|e| e.snapshot())
    }

    pub fn queue_len(&self) -> usize {
        self.start_queue.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn pending_stops(&self) -> usize {
        self.pending_stops.len()
    }

    /// Tear down every entry and join the worker
    pub fn shutdown(&mut self) {
        if !self.entries.is_empty() {
            info!("Tearing down {} device entr(ies)", self.entries.len());
        }
        while !self.entries.is_empty() {
            let idx = self.entries.len() - 1;
            self.entries[idx].clients.broadcast(|| ClientEvent::Stopped);
            self.destroy_entry(idx);
        }
        self.worker.shutdown();
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn emit(&self, event: ManagerEvent) {
        // No subscribers is fine
        let _ = self.listeners.send(event);
    }

    fn post(&self, job: WorkerJob) {
        if let Err(e) = self.worker.post(job) {
            error!("Failed to post worker job: {}", e);
        }
    }

    /// Suspend a live device once every remaining client is paused
    fn suspend_if_all_paused(&self, idx: usize) {
        let entry = &self.entries[idx];
        if entry.clients.is_empty() || entry.clients.active_count() > 0 {
            return;
        }
        if let Some(launch) = entry.live_launch() {
            debug!("No active client left on {}, suspending", entry.key());
            self.post(WorkerJob::Suspend { launch });
        }
    }

    /// Resume a live device when its active count goes from zero to one
    fn resume_if_first_active(&self, idx: usize) {
        let entry = &self.entries[idx];
        if entry.clients.active_count() != 1 {
            return;
        }
        if let Some(launch) = entry.live_launch() {
            debug!("{} has an active client again, resuming", entry.key());
            self.post(WorkerJob::Resume { launch });
        }
    }

    fn post_stop(&mut self, token: DeviceToken) {
        let launch = token.launch();
        self.pending_stops.insert(launch);
        self.post(WorkerJob::Stop { token });
    }

    fn apply_effect(&mut self, serial: EntrySerial, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::AbortStart => {
                if !self.start_queue.abort(serial) {
                    warn!("No pending start to abort for entry {}", serial);
                }
            }
            Effect::StopDevice(token) => self.post_stop(token),
        }
    }

    fn handle_rejected(&mut self, serial: EntrySerial, rejected: Rejected) {
        error!("Entry {}: {}", serial, rejected.error);
        if let Some(token) = rejected.stray_token {
            self.post_stop(token);
        }
    }

    fn entry_index(&self, key: &DeviceKey) -> Option<usize> {
        self.entries.iter().position(|e| e.key() == key)
    }

    fn entry_index_by_launch(&self, launch: LaunchId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.launch() == Some(launch))
    }

    fn entry_index_for_client(&self, client: ClientId) -> Option<usize> {
        self.entries.iter().position(|e| e.clients.contains(client))
    }

    fn entry_for_session(&self, session: SessionId) -> Option<&DeviceEntry> {
        let descriptor = self.sessions.get(session)?;
        self.entries.iter().find(|e| descriptor.matches(e.key()))
    }

    fn create_entry(&mut self, key: DeviceKey, params: CaptureParams) -> usize {
        let serial = EntrySerial::from_raw(self.next_serial);
        self.next_serial += 1;
        let max_buffers = self.config.max_buffers_for(key.kind);
        debug!("Creating entry {} for {}", serial, key);
        self.entries
            .push(DeviceEntry::new(serial, key, params, max_buffers));
        self.entries.len() - 1
    }

    /// Remove an entry from the live set and release its device
    fn destroy_entry(&mut self, idx: usize) {
        let mut entry = self.entries.remove(idx);
        let serial = entry.serial();
        match entry.transition(LifecycleEvent::StopRequested) {
            Ok(effect) => self.apply_effect(serial, effect),
            Err(rejected) => self.handle_rejected(serial, rejected),
        }
        info!("Released {} (entry {})", entry.key(), serial);
        drop(entry);
        self.process_start_queue();
    }

    fn queue_start(&mut self, idx: usize, session: Option<SessionId>) {
        let serial = self.entries[idx].serial();
        if self.start_queue.is_pending(serial) {
            debug!("Start of entry {} already queued", serial);
            return;
        }

        let entry = &mut self.entries[idx];
        match entry.transition(LifecycleEvent::StartQueued) {
            Ok(effect) => self.apply_effect(serial, effect),
            Err(rejected) => {
                self.handle_rejected(serial, rejected);
                return;
            }
        }

        let request = StartRequest::new(serial, session, *self.entries[idx].params());
        if self.start_queue.enqueue(request) {
            self.process_start_queue();
        }
    }

    /// Dispatch the queue head unless a start is already in flight
    ///
    /// Requests for devices missing from the registry fail here and the
    /// queue moves on to the next one.
    fn process_start_queue(&mut self) {
        while let Some(request) = self.start_queue.begin_next() {
            let Some(idx) = self
                .entries
                .iter()
                .position(|e| e.serial() == request.serial)
            else {
                error!("Start request for vanished entry {}", request.serial);
                self.start_queue.finish();
                continue;
            };

            let target = match self.resolve_target(self.entries[idx].key()) {
                Ok(target) => target,
                Err(e) => {
                    self.start_queue.finish();
                    self.fail_queued_entry(idx, e);
                    continue;
                }
            };

            let launch = LaunchId {
                serial: request.serial,
                attempt: self.next_attempt,
            };
            self.next_attempt += 1;

            let entry = &mut self.entries[idx];
            let serial = entry.serial();
            match entry.transition(LifecycleEvent::StartDispatched) {
                Ok(effect) => self.apply_effect(serial, effect),
                Err(rejected) => {
                    self.handle_rejected(serial, rejected);
                    self.start_queue.finish();
                    continue;
                }
            }

            let entry = &mut self.entries[idx];
            entry.set_launch(Some(launch));
            entry.clear_failure();
            let sink = DeviceSink::new(launch, entry.pool().clone(), self.event_tx.clone());
            debug!("Dispatching start of {} as launch {}", entry.key(), launch);

            let job = WorkerJob::Start {
                launch,
                target,
                params: request.params,
                sink,
            };
            if let Err(e) = self.worker.post(job) {
                self.start_queue.finish();
                self.fail_queued_entry(idx, e);
                continue;
            }
            return;
        }
    }

    fn resolve_target(&self, key: &DeviceKey) -> Result<StartTarget> {
        match key.kind {
            StreamKind::Device => self
                .registry
                .find(&key.device_id)
                .map(|info| StartTarget::Device(info.descriptor.clone()))
                .ok_or_else(|| {
                    if !self.registry.is_enumerated() {
                        warn!("{} requested before any device enumeration", key.device_id);
                    }
                    CapmuxError::DeviceNotFound(key.device_id.clone())
                }),
            StreamKind::Tab => Ok(StartTarget::Tab(key.device_id.clone())),
            StreamKind::Desktop => Ok(StartTarget::Desktop(key.device_id.clone())),
        }
    }

    /// Fail an entry whose start never reached the hardware
    fn fail_queued_entry(&mut self, idx: usize, error: CapmuxError) {
        let entry = &mut self.entries[idx];
        warn!("Cannot start {}: {}", entry.key(), error);
        let serial = entry.serial();
        let outcome = entry.transition(LifecycleEvent::StartFailed);
        let failure = DeviceFailure::creation(error.to_string());
        entry.set_launch(None);
        entry.set_failure(failure.clone());
        entry
            .clients
            .broadcast(|| ClientEvent::Error(failure.clone()));
        self.stats.start_failures += 1;
        match outcome {
            Ok(effect) => self.apply_effect(serial, effect),
            Err(rejected) => self.handle_rejected(serial, rejected),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
