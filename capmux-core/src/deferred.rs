//! Capability requests waiting for a device to exist

use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CapmuxError, Result};
use crate::types::{CapabilityRequest, CapabilityResponse, SessionId};

pub(crate) type CapabilityReply = oneshot::Sender<Result<CapabilityResponse>>;

/// A capability request queued against a session
#[derive(Debug)]
pub struct DeferredRequest {
    pub session: SessionId,
    pub request: CapabilityRequest,
    pub(crate) reply: CapabilityReply,
}

/// FIFO of requests that arrived before their device handle
#[derive(Debug, Default)]
pub struct DeferredQueue {
    requests: VecDeque<DeferredRequest>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, session: SessionId, request: CapabilityRequest, reply: CapabilityReply) {
        debug!("Deferring {} for {}", request.name(), session);
        self.requests.push_back(DeferredRequest {
            session,
            request,
            reply,
        });
    }

    /// Remove and return matching requests, keeping queue order
    pub fn take_where(&mut self, mut pred: impl FnMut(&DeferredRequest) -> bool) -> Vec<DeferredRequest> {
        let (taken, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.requests)
            .into_iter()
            .partition(|r| pred(r));
        self.requests = kept;
        taken.into()
    }

    /// Fail every request of a closed session
    pub fn drop_session(&mut self, session: SessionId) -> usize {
        let dropped = self.take_where(|r| r.session == session);
        let count = dropped.len();
        for request in dropped {
            let _ = request.reply.send(Err(CapmuxError::SessionClosed(session)));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Pending answer to `get_capability`
#[derive(Debug)]
pub struct CapabilityTicket {
    queued: bool,
    rx: oneshot::Receiver<Result<CapabilityResponse>>,
}

impl CapabilityTicket {
    pub(crate) fn new(queued: bool, rx: oneshot::Receiver<Result<CapabilityResponse>>) -> Self {
        Self { queued, rx }
    }

    /// Whether the request had to wait for the device to start
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Wait for the device's answer
    pub async fn wait(self) -> Result<CapabilityResponse> {
        self.rx.await.map_err(|_| CapmuxError::ManagerGone)?
    }

    /// Poll for an answer without waiting
    pub fn try_wait(&mut self) -> Option<Result<CapabilityResponse>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(CapmuxError::ManagerGone)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(raw: u64) -> SessionId {
        SessionId::from_raw(raw)
    }

    #[test]
    fn test_take_where_keeps_order() {
        let mut queue = DeferredQueue::new();
        let mut receivers = Vec::new();
        for (raw, request) in [
            (1, CapabilityRequest::PhotoCapabilities),
            (2, CapabilityRequest::TakePhoto),
            (1, CapabilityRequest::TakePhoto),
        ] {
            let (tx, rx) = oneshot::channel();
            queue.push(session(raw), request, tx);
            receivers.push(rx);
        }

        let taken = queue.take_where(|r| r.session == session(1));
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].request, CapabilityRequest::PhotoCapabilities);
        assert_eq!(taken[1].request, CapabilityRequest::TakePhoto);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_session_fails_replies() {
        let mut queue = DeferredQueue::new();
        let (tx, rx) = oneshot::channel();
        queue.push(session(3), CapabilityRequest::TakePhoto, tx);

        assert_eq!(queue.drop_session(session(3)), 1);
        assert!(queue.is_empty());

        let ticket = CapabilityTicket::new(true, rx);
        assert!(ticket.is_queued());
        assert!(matches!(ticket.wait().await, Err(CapmuxError::SessionClosed(_))));
    }

    #[test]
    fn test_dropped_sender_means_manager_gone() {
        let (tx, rx) = oneshot::channel();
        let mut ticket = CapabilityTicket::new(false, rx);
        assert!(ticket.try_wait().is_none());

        drop(tx);
        let result = tokio_test::block_on(ticket.wait());
        assert!(matches!(result, Err(CapmuxError::ManagerGone)));
    }
}
