//! Device entry lifecycle
//!
//! `DeviceState::apply` is the one place that decides what an entry does when
//! something happens to it. Every lifecycle change in the manager goes
//! through it.

use serde::{Deserialize, Serialize};

use crate::error::CapmuxError;
use crate::types::LaunchId;

/// Move-only proof that a device is live on the worker
///
/// Only the worker mints tokens. Handing a token back to the worker in a
/// stop job is the only way to destroy the device.
#[must_use = "a device token must be handed back to the worker to stop the device"]
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceToken {
    launch: LaunchId,
}

impl DeviceToken {
    pub(crate) fn new(launch: LaunchId) -> Self {
        Self { launch }
    }

    pub fn launch(&self) -> LaunchId {
        self.launch
    }
}

/// Lifecycle state of a device entry
#[derive(Debug, Default)]
pub enum DeviceState {
    /// No device and no pending start
    #[default]
    Idle,
    /// Start request waiting in the queue
    Queued,
    /// Start request running on the worker
    Starting,
    /// Device live on the worker
    Started(DeviceToken),
    /// Being torn down
    Stopping,
}

/// Something that happened to an entry
#[derive(Debug)]
pub enum LifecycleEvent {
    /// First client attached and a start request was queued
    StartQueued,
    /// The queue handed the request to the worker
    StartDispatched,
    /// The worker returned a live device
    StartSucceeded(DeviceToken),
    /// The device could not be started
    StartFailed,
    /// Last client detached
    StopRequested,
    /// Hardware released while clients stay attached
    Released,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartQueued => "start-queued",
            Self::StartDispatched => "start-dispatched",
            Self::StartSucceeded(_) => "start-succeeded",
            Self::StartFailed => "start-failed",
            Self::StopRequested => "stop-requested",
            Self::Released => "released",
        }
    }
}

/// Side effect the caller must carry out after a transition
#[derive(Debug)]
#[must_use]
pub enum Effect {
    None,
    /// Abort the entry's pending start request
    AbortStart,
    /// Post a stop job for this device
    StopDevice(DeviceToken),
}

/// A transition not present in the table
///
/// The state is left unchanged. A token carried by the rejected event is
/// handed back so the caller can still stop the device.
#[derive(Debug)]
pub struct Rejected {
    pub error: CapmuxError,
    pub stray_token: Option<DeviceToken>,
}

/// Public view of a lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Idle,
    Queued,
    Starting,
    Started,
    Stopping,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}

impl DeviceState {
    pub fn kind(&self) -> EntryState {
        match self {
            Self::Idle => EntryState::Idle,
            Self::Queued => EntryState::Queued,
            Self::Starting => EntryState::Starting,
            Self::Started(_) => EntryState::Started,
            Self::Stopping => EntryState::Stopping,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Started(_) => "started",
            Self::Stopping => "stopping",
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    /// Launch of the live device, if started
    pub fn launch(&self) -> Option<LaunchId> {
        match self {
            Self::Started(token) => Some(token.launch()),
            _ => None,
        }
    }

    /// Apply an event, returning the effect to carry out
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<Effect, Rejected> {
        let from = self.name();
        let event_name = event.name();

        let (next, effect) = match (std::mem::take(self), event) {
            (Self::Idle, LifecycleEvent::StartQueued) => (Self::Queued, Effect::None),
            (Self::Queued, LifecycleEvent::StartDispatched) => (Self::Starting, Effect::None),
            (Self::Queued | Self::Starting, LifecycleEvent::StartFailed) => {
                (Self::Idle, Effect::None)
            }
            (Self::Starting, LifecycleEvent::StartSucceeded(token)) => {
                (Self::Started(token), Effect::None)
            }
            (Self::Queued | Self::Starting, LifecycleEvent::StopRequested) => {
                (Self::Stopping, Effect::AbortStart)
            }
            (Self::Started(token), LifecycleEvent::StopRequested) => {
                (Self::Stopping, Effect::StopDevice(token))
            }
            (Self::Idle, LifecycleEvent::StopRequested) => (Self::Stopping, Effect::None),
            (Self::Queued | Self::Starting, LifecycleEvent::Released) => {
                (Self::Idle, Effect::AbortStart)
            }
            (Self::Started(token), LifecycleEvent::Released) => {
                (Self::Idle, Effect::StopDevice(token))
            }
            (Self::Idle, LifecycleEvent::Released) => (Self::Idle, Effect::None),
            (state, event) => {
                *self = state;
                let stray_token = match event {
                    LifecycleEvent::StartSucceeded(token) => Some(token),
                    _ => None,
                };
                return Err(Rejected {
                    error: CapmuxError::InvalidTransition {
                        from,
                        event: event_name,
                    },
                    stray_token,
                });
            }
        };

        *self = next;
        Ok(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntrySerial;

    fn token() -> DeviceToken {
        DeviceToken::new(LaunchId {
            serial: EntrySerial::from_raw(1),
            attempt: 1,
        })
    }

    #[test]
    fn test_happy_path() {
        let mut state = DeviceState::Idle;
        assert!(matches!(state.apply(LifecycleEvent::StartQueued), Ok(Effect::None)));
        assert_eq!(state.kind(), EntryState::Queued);
        assert!(matches!(state.apply(LifecycleEvent::StartDispatched), Ok(Effect::None)));
        assert!(matches!(
            state.apply(LifecycleEvent::StartSucceeded(token())),
            Ok(Effect::None)
        ));
        assert!(state.is_started());

        match state.apply(LifecycleEvent::StopRequested) {
            Ok(Effect::StopDevice(t)) => assert_eq!(t.launch().attempt, 1),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(state.kind(), EntryState::Stopping);
    }

    #[test]
    fn test_stop_before_start_aborts() {
        let mut state = DeviceState::Idle;
        let _ = state.apply(LifecycleEvent::StartQueued);
        assert!(matches!(
            state.apply(LifecycleEvent::StopRequested),
            Ok(Effect::AbortStart)
        ));

        let mut state = DeviceState::Starting;
        assert!(matches!(
            state.apply(LifecycleEvent::StopRequested),
            Ok(Effect::AbortStart)
        ));
    }

    #[test]
    fn test_release_returns_to_idle() {
        let mut state = DeviceState::Started(token());
        assert!(matches!(
            state.apply(LifecycleEvent::Released),
            Ok(Effect::StopDevice(_))
        ));
        assert_eq!(state.kind(), EntryState::Idle);
        assert!(matches!(state.apply(LifecycleEvent::Released), Ok(Effect::None)));
        assert!(matches!(state.apply(LifecycleEvent::StartQueued), Ok(Effect::None)));
    }

    #[test]
    fn test_start_failure_returns_to_idle() {
        let mut state = DeviceState::Starting;
        assert!(matches!(state.apply(LifecycleEvent::StartFailed), Ok(Effect::None)));
        assert_eq!(state.kind(), EntryState::Idle);
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut state = DeviceState::Queued;
        let rejected = state
            .apply(LifecycleEvent::StartSucceeded(token()))
            .unwrap_err();
        assert!(rejected.stray_token.is_some());
        assert!(matches!(
            rejected.error,
            CapmuxError::InvalidTransition {
                from: "queued",
                event: "start-succeeded"
            }
        ));
        assert_eq!(state.kind(), EntryState::Queued);

        let mut state = DeviceState::Stopping;
        assert!(state.apply(LifecycleEvent::StartQueued).is_err());
        assert_eq!(state.kind(), EntryState::Stopping);
    }
}
