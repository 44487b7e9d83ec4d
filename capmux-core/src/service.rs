//! Control service
//!
//! Runs a `SessionManager` on its own tokio task so callers on any task can
//! drive it through a cloneable `ManagerHandle`. The task is the control
//! context: it applies commands and worker events one at a time.

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::buffer_pool::PoolAccessor;
use crate::client::ClientHandle;
use crate::deferred::CapabilityTicket;
use crate::error::{CapmuxError, Result};
use crate::manager::{ManagerEvent, SessionManager};
use crate::registry::EnumerationTicket;
use crate::stats::ManagerStatus;
use crate::types::{
    AppState, CapabilityRequest, CaptureParams, ClientId, DeviceDescriptor, SessionId,
    StreamDescriptor, VideoFormat, WindowId,
};
use crate::worker::WorkerEvent;

enum Command {
    Open {
        descriptor: StreamDescriptor,
        reply: oneshot::Sender<SessionId>,
    },
    Close {
        session: SessionId,
        reply: oneshot::Sender<()>,
    },
    StartCapture {
        session: SessionId,
        params: CaptureParams,
        client: ClientHandle,
        reply: oneshot::Sender<Result<PoolAccessor>>,
    },
    StopCapture {
        session: SessionId,
        client: ClientId,
        aborted_due_to_error: bool,
        reply: oneshot::Sender<()>,
    },
    Pause {
        session: SessionId,
        client: ClientId,
        reply: oneshot::Sender<()>,
    },
    Resume {
        session: SessionId,
        client: ClientId,
        reply: oneshot::Sender<()>,
    },
    RefreshFrame {
        session: SessionId,
    },
    GetCapability {
        session: SessionId,
        request: CapabilityRequest,
        reply: oneshot::Sender<Result<CapabilityTicket>>,
    },
    SupportedFormats {
        session: SessionId,
        reply: oneshot::Sender<Result<Vec<VideoFormat>>>,
    },
    FormatsInUse {
        session: SessionId,
        reply: oneshot::Sender<Result<Vec<VideoFormat>>>,
    },
    SetNotificationWindow {
        session: SessionId,
        window: WindowId,
        reply: oneshot::Sender<Result<()>>,
    },
    EnumerateDevices {
        reply: oneshot::Sender<EnumerationTicket>,
    },
    Devices {
        reply: oneshot::Sender<Vec<DeviceDescriptor>>,
    },
    SetAppState {
        state: AppState,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<ManagerStatus>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<ManagerEvent>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Spawns the control task
pub struct ManagerService;

impl ManagerService {
    /// Move `manager` onto a new tokio task and return a handle to it
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut manager: SessionManager) -> ManagerHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let events = manager.take_worker_events();
        if events.is_none() {
            warn!("Worker events already taken; device completions will not be handled");
        }

        tokio::spawn(run(manager, command_rx, events));
        ManagerHandle { commands }
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<WorkerEvent>>) -> Option<WorkerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut manager: SessionManager,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
) {
    info!("Session manager service running");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown { reply }) => {
                    manager.shutdown();
                    let _ = reply.send(());
                    break;
                }
                Some(command) => apply(&mut manager, command),
                None => {
                    debug!("Every manager handle dropped");
                    break;
                }
            },
            Some(event) = next_event(&mut events) => manager.handle_worker_event(event),
        }
    }

    info!("Session manager service stopped");
}

fn apply(manager: &mut SessionManager, command: Command) {
    match command {
        Command::Open { descriptor, reply } => {
            let _ = reply.send(manager.open(descriptor));
        }
        Command::Close { session, reply } => {
            manager.close(session);
            let _ = reply.send(());
        }
        Command::StartCapture {
            session,
            params,
            client,
            reply,
        } => {
            let _ = reply.send(manager.start_capture_for_client(session, params, client));
        }
        Command::StopCapture {
            session,
            client,
            aborted_due_to_error,
            reply,
        } => {
            manager.stop_capture_for_client(session, client, aborted_due_to_error);
            let _ = reply.send(());
        }
        Command::Pause {
            session,
            client,
            reply,
        } => {
            manager.pause_capture_for_client(session, client);
            let _ = reply.send(());
        }
        Command::Resume {
            session,
            client,
            reply,
        } => {
            manager.resume_capture_for_client(session, client);
            let _ = reply.send(());
        }
        Command::RefreshFrame { session } => manager.request_refresh_frame_for_client(session),
        Command::GetCapability {
            session,
            request,
            reply,
        } => {
            let _ = reply.send(manager.get_capability(session, request));
        }
        Command::SupportedFormats { session, reply } => {
            let _ = reply.send(manager.supported_formats(session));
        }
        Command::FormatsInUse { session, reply } => {
            let _ = reply.send(manager.formats_in_use(session));
        }
        Command::SetNotificationWindow {
            session,
            window,
            reply,
        } => {
            let _ = reply.send(manager.set_notification_window(session, window));
        }
        Command::EnumerateDevices { reply } => {
            let _ = reply.send(manager.enumerate_devices());
        }
        Command::Devices { reply } => {
            let _ = reply.send(manager.devices());
        }
        Command::SetAppState { state, reply } => {
            manager.on_application_state(state);
            let _ = reply.send(());
        }
        Command::Status { reply } => {
            let _ = reply.send(manager.status());
        }
        Command::Subscribe { reply } => {
            let _ = reply.send(manager.subscribe());
        }
        // Handled by the loop
        Command::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

/// Cloneable async handle to a running session manager
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for ManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerHandle")
            .field("running", &!self.commands.is_closed())
            .finish()
    }
}

impl ManagerHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| CapmuxError::ManagerGone)?;
        rx.await.map_err(|_| CapmuxError::ManagerGone)
    }

    /// Whether the control task is still running
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub async fn open(&self, descriptor: StreamDescriptor) -> Result<SessionId> {
        self.call(|reply| Command::Open { descriptor, reply }).await
    }

    pub async fn close(&self, session: SessionId) -> Result<()> {
        self.call(|reply| Command::Close { session, reply }).await
    }

    pub async fn start_capture_for_client(
        &self,
        session: SessionId,
        params: CaptureParams,
        client: ClientHandle,
    ) -> Result<PoolAccessor> {
        self.call(|reply| Command::StartCapture {
            session,
            params,
            client,
            reply,
        })
        .await?
    }

    pub async fn stop_capture_for_client(
        &self,
        session: SessionId,
        client: ClientId,
        aborted_due_to_error: bool,
    ) -> Result<()> {
        self.call(|reply| Command::StopCapture {
            session,
            client,
            aborted_due_to_error,
            reply,
        })
        .await
    }

    pub async fn pause_capture_for_client(&self, session: SessionId, client: ClientId) -> Result<()> {
        self.call(|reply| Command::Pause {
            session,
            client,
            reply,
        })
        .await
    }

    pub async fn resume_capture_for_client(&self, session: SessionId, client: ClientId) -> Result<()> {
        self.call(|reply| Command::Resume {
            session,
            client,
            reply,
        })
        .await
    }

    /// Fire and forget
    pub fn request_refresh_frame_for_client(&self, session: SessionId) -> Result<()> {
        self.commands
            .send(Command::RefreshFrame { session })
            .map_err(|_| CapmuxError::ManagerGone)
    }

    pub async fn get_capability(
        &self,
        session: SessionId,
        request: CapabilityRequest,
    ) -> Result<CapabilityTicket> {
        self.call(|reply| Command::GetCapability {
            session,
            request,
            reply,
        })
        .await?
    }

    pub async fn supported_formats(&self, session: SessionId) -> Result<Vec<VideoFormat>> {
        self.call(|reply| Command::SupportedFormats { session, reply })
            .await?
    }

    pub async fn formats_in_use(&self, session: SessionId) -> Result<Vec<VideoFormat>> {
        self.call(|reply| Command::FormatsInUse { session, reply })
            .await?
    }

    pub async fn set_notification_window(&self, session: SessionId, window: WindowId) -> Result<()> {
        self.call(|reply| Command::SetNotificationWindow {
            session,
            window,
            reply,
        })
        .await?
    }

    /// Refresh the device registry and wait for the result
    pub async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let ticket = self
            .call(|reply| Command::EnumerateDevices { reply })
            .await?;
        ticket.wait().await
    }

    /// Devices from the last enumeration
    pub async fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.call(|reply| Command::Devices { reply }).await
    }

    pub async fn set_app_state(&self, state: AppState) -> Result<()> {
        self.call(|reply| Command::SetAppState { state, reply })
            .await
    }

    pub async fn status(&self) -> Result<ManagerStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<ManagerEvent>> {
        self.call(|reply| Command::Subscribe { reply }).await
    }

    /// Tear down every device and stop the control task
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}
