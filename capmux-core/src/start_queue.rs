//! FIFO admission queue for device starts
//!
//! Hardware can only create one device at a time, so start requests line up
//! here and the head is dispatched once nothing else is in flight.

use std::collections::VecDeque;
use tracing::debug;

use crate::types::{CaptureParams, EntrySerial, SessionId};

/// Queued intent to create and start the device of one entry
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub serial: EntrySerial,
    /// Session that triggered the start; `None` for foreground restarts
    pub session: Option<SessionId>,
    pub params: CaptureParams,
    aborted: bool,
}

impl StartRequest {
    pub fn new(serial: EntrySerial, session: Option<SessionId>, params: CaptureParams) -> Self {
        Self {
            serial,
            session,
            params,
            aborted: false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

#[derive(Debug, Default)]
pub struct StartQueue {
    requests: VecDeque<StartRequest>,
    in_flight: bool,
}

impl StartQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request; returns true if the queue was empty and the caller
    /// should start draining
    pub fn enqueue(&mut self, request: StartRequest) -> bool {
        debug!("Queueing start for entry {}", request.serial);
        self.requests.push_back(request);
        self.requests.len() == 1
    }

    /// Abort the newest live request for `serial`
    ///
    /// An aborted in-flight request stays at the head until its completion
    /// arrives.
    pub fn abort(&mut self, serial: EntrySerial) -> bool {
        match self
            .requests
            .iter_mut()
            .rev()
            .find(|r| r.serial == serial && !r.aborted)
        {
            Some(request) => {
                debug!("Aborting start for entry {}", serial);
                request.aborted = true;
                true
            }
            None => false,
        }
    }

    /// Pop aborted heads and mark the next live request in flight
    ///
    /// Returns `None` while a request is already in flight or when the queue
    /// is empty.
    pub fn begin_next(&mut self) -> Option<StartRequest> {
        if self.in_flight {
            return None;
        }
        while let Some(head) = self.requests.front() {
            if !head.aborted {
                break;
            }
            debug!("Dropping aborted start for entry {}", head.serial);
            self.requests.pop_front();
        }
        let head = self.requests.front()?.clone();
        self.in_flight = true;
        Some(head)
    }

    /// Complete the in-flight request, returning it with its final abort flag
    pub fn finish(&mut self) -> Option<StartRequest> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        self.requests.pop_front()
    }

    /// The in-flight request, if any
    pub fn in_flight(&self) -> Option<&StartRequest> {
        if self.in_flight {
            self.requests.front()
        } else {
            None
        }
    }

    /// Whether a live request for `serial` is anywhere in the queue
    pub fn is_pending(&self, serial: EntrySerial) -> bool {
        self.requests.iter().any(|r| r.serial == serial && !r.aborted)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
