//! Capture clients and their attachment to a device entry

use tokio::sync::mpsc;
use tracing::trace;

use crate::buffer_pool::ReadyBuffer;
use crate::types::{ClientId, SessionId};

/// Why a device failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Backend could not create or start the device
    Creation,
    /// Device reported an error while running
    Runtime,
}

/// Device failure reported to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    pub cause: FailureCause,
    pub message: String,
}

impl DeviceFailure {
    pub fn creation(message: impl Into<String>) -> Self {
        Self {
            cause: FailureCause::Creation,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            cause: FailureCause::Runtime,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cause {
            FailureCause::Creation => write!(f, "creation failed: {}", self.message),
            FailureCause::Runtime => write!(f, "runtime error: {}", self.message),
        }
    }
}

/// Events delivered to a capture client
#[derive(Debug)]
pub enum ClientEvent {
    /// Device is started and frames will follow
    Started,
    /// A captured frame
    Buffer(ReadyBuffer),
    /// Device failed
    Error(DeviceFailure),
    /// Device ended on its own
    Ended,
    /// Capture was aborted because another client of the device errored
    Aborted,
    /// Client was detached because its session closed
    Stopped,
}

/// Handle the manager uses to reach one client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientHandle {
    /// Create a client handle and the receiver for its events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ClientId::new(),
                events,
            },
            rx,
        )
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Send an event; returns false if the client has gone away
    pub fn send(&self, event: ClientEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Whether the client's receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// A client attached to an entry through a session
#[derive(Debug, Clone)]
pub struct Attachment {
    pub client: ClientHandle,
    pub session: SessionId,
    pub paused: bool,
}

/// Clients attached to one device entry, partitioned into active and paused
#[derive(Debug, Default)]
pub struct ClientSet {
    attachments: Vec<Attachment>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an active client; returns false if it is already attached
    pub fn add(&mut self, client: ClientHandle, session: SessionId) -> bool {
        if self.contains(client.id()) {
            return false;
        }
        self.attachments.push(Attachment {
            client,
            session,
            paused: false,
        });
        true
    }

    /// Detach a client
    pub fn remove(&mut self, id: ClientId) -> Option<Attachment> {
        let index = self.attachments.iter().position(|a| a.client.id() == id)?;
        Some(self.attachments.remove(index))
    }

    /// Move an active client to the paused set
    pub fn pause(&mut self, id: ClientId) -> bool {
        match self.attachments.iter_mut().find(|a| a.client.id() == id) {
            Some(attachment) if !attachment.paused => {
                attachment.paused = true;
                true
            }
            _ => false,
        }
    }

    /// Move a paused client back to the active set
    pub fn resume(&mut self, id: ClientId) -> bool {
        match self.attachments.iter_mut().find(|a| a.client.id() == id) {
            Some(attachment) if attachment.paused => {
                attachment.paused = false;
                true
            }
            _ => false,
        }
    }

    /// Detach every client attached through `session`
    pub fn remove_session(&mut self, session: SessionId) -> Vec<Attachment> {
        let (removed, kept) = std::mem::take(&mut self.attachments)
            .into_iter()
            .partition(|a| a.session == session);
        self.attachments = kept;
        removed
    }

    /// Detach every client except `id`
    pub fn drain_except(&mut self, id: ClientId) -> Vec<Attachment> {
        let (kept, removed) = std::mem::take(&mut self.attachments)
            .into_iter()
            .partition(|a| a.client.id() == id);
        self.attachments = kept;
        removed
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.attachments.iter().any(|a| a.client.id() == id)
    }

    pub fn session_of(&self, id: ClientId) -> Option<SessionId> {
        self.attachments
            .iter()
            .find(|a| a.client.id() == id)
            .map(|a| a.session)
    }

    pub fn has_session(&self, session: SessionId) -> bool {
        self.attachments.iter().any(|a| a.session == session)
    }

    pub fn active_count(&self) -> usize {
        self.attachments.iter().filter(|a| !a.paused).count()
    }

    pub fn paused_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.paused).count()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    /// Distinct sessions with at least one attached client
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.attachments.iter().map(|a| a.session).collect();
        sessions.sort();
        sessions.dedup();
        sessions
    }

    /// Active clients, in attach order
    pub fn active(&self) -> impl Iterator<Item = &ClientHandle> {
        self.attachments
            .iter()
            .filter(|a| !a.paused)
            .map(|a| &a.client)
    }

    /// Send an event built by `make` to every attached client
    pub fn broadcast(&self, make: impl Fn() -> ClientEvent) {
        for attachment in &self.attachments {
            if !attachment.client.send(make()) {
                trace!("Client {} has gone away", attachment.client.id());
            }
        }
    }
}
