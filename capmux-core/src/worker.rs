//! Device worker thread
//!
//! Every live device object lives here and every backend call runs here.
//! The control side posts jobs and only ever sees `DeviceToken`s; results
//! come back as `WorkerEvent`s on a tokio channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{CaptureBackend, CaptureDevice, DeviceSink, SinkEvent, StartTarget};
use crate::deferred::CapabilityReply;
use crate::error::{CapmuxError, Result};
use crate::lifecycle::DeviceToken;
use crate::registry;
use crate::types::{CapabilityRequest, CaptureParams, DeviceDescriptor, DeviceInfo, LaunchId, WindowId};

pub(crate) type EnumerationReply = oneshot::Sender<Result<Vec<DeviceDescriptor>>>;

/// Work posted to the device thread, executed in posting order
#[derive(Debug)]
pub(crate) enum WorkerJob {
    Start {
        launch: LaunchId,
        target: StartTarget,
        params: CaptureParams,
        sink: DeviceSink,
    },
    Stop {
        token: DeviceToken,
    },
    Suspend {
        launch: LaunchId,
    },
    Resume {
        launch: LaunchId,
    },
    RefreshFrame {
        launch: LaunchId,
    },
    SetNotificationWindow {
        launch: LaunchId,
        window: WindowId,
    },
    Capability {
        launch: LaunchId,
        request: CapabilityRequest,
        reply: CapabilityReply,
    },
    Enumerate {
        cached: Vec<DeviceInfo>,
        reply: EnumerationReply,
    },
    Shutdown,
}

/// Results flowing back from the device thread to the manager
#[derive(Debug)]
pub enum WorkerEvent {
    /// A start job finished
    Started {
        launch: LaunchId,
        result: Result<DeviceToken>,
    },
    /// A stop job finished
    Stopped { launch: LaunchId },
    /// An enumeration finished
    Enumerated {
        result: Result<Vec<DeviceInfo>>,
        reply: EnumerationReply,
    },
    /// A running device reported something
    Sink { launch: LaunchId, event: SinkEvent },
}

/// Handle to the device thread
pub struct Worker {
    name: String,
    jobs: mpsc::Sender<WorkerJob>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn the device thread
    pub fn spawn(
        name: &str,
        backend: Arc<dyn CaptureBackend>,
        events: tokio_mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let (jobs, job_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(backend, job_rx, events))
            .map_err(|e| {
                CapmuxError::Io(e).with_context("Failed to spawn device worker thread")
            })?;

        info!("Device worker '{}' started", name);

        Ok(Self {
            name: name.to_string(),
            jobs,
            thread: Some(thread),
        })
    }

    /// Queue a job
    pub(crate) fn post(&self, job: WorkerJob) -> Result<()> {
        self.jobs.send(job).map_err(|_| CapmuxError::WorkerGone)
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Ask the thread to exit after its queued jobs and wait for it
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.jobs.send(WorkerJob::Shutdown);
        if thread.join().is_err() {
            error!("Device worker '{}' panicked", self.name);
        } else {
            info!("Device worker '{}' stopped", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    backend: Arc<dyn CaptureBackend>,
    jobs: mpsc::Receiver<WorkerJob>,
    events: tokio_mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut devices: HashMap<LaunchId, Box<dyn CaptureDevice>> = HashMap::new();
    let send = |event: WorkerEvent| {
        if events.send(event).is_err() {
            trace!("Manager gone, dropping worker event");
        }
    };

    while let Ok(job) = jobs.recv() {
        match job {
            WorkerJob::Start {
                launch,
                target,
                params,
                sink,
            } => {
                debug!("Creating {} for launch {}", target, launch);
                let result = backend
                    .create_and_start(&target, &params, sink)
                    .map(|device| {
                        devices.insert(launch, device);
                        DeviceToken::new(launch)
                    })
                    .map_err(|e| {
                        warn!("Failed to start {}: {}", target, e);
                        e
                    });
                send(WorkerEvent::Started { launch, result });
            }
            WorkerJob::Stop { token } => {
                let launch = token.launch();
                match devices.remove(&launch) {
                    Some(mut device) => {
                        device.stop();
                        debug!("Stopped device for launch {}", launch);
                    }
                    None => warn!("Stop for unknown launch {}", launch),
                }
                send(WorkerEvent::Stopped { launch });
            }
            WorkerJob::Suspend { launch } => {
                if let Some(device) = devices.get_mut(&launch) {
                    device.suspend();
                }
            }
            WorkerJob::Resume { launch } => {
                if let Some(device) = devices.get_mut(&launch) {
                    device.resume();
                }
            }
            WorkerJob::RefreshFrame { launch } => {
                if let Some(device) = devices.get_mut(&launch) {
                    device.refresh_frame();
                }
            }
            WorkerJob::SetNotificationWindow { launch, window } => {
                if let Some(device) = devices.get_mut(&launch) {
                    device.set_notification_window(window);
                }
            }
            WorkerJob::Capability {
                launch,
                request,
                reply,
            } => {
                let result = match devices.get_mut(&launch) {
                    Some(device) => device.request_capability(&request),
                    None => Err(CapmuxError::device("device is no longer running")),
                };
                let _ = reply.send(result);
            }
            WorkerJob::Enumerate { cached, reply } => {
                let result = backend
                    .enumerate()
                    .map(|snapshot| registry::reconcile(&cached, snapshot, |d| backend.probe(d)));
                send(WorkerEvent::Enumerated { result, reply });
            }
            WorkerJob::Shutdown => break,
        }
    }

    for (launch, mut device) in devices.drain() {
        warn!("Stopping device for launch {} left running at shutdown", launch);
        device.stop();
    }
}
