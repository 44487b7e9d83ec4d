//! Fixed-capacity frame buffer pool
//!
//! A device entry owns one pool for its whole lifetime, across device
//! restarts. Backends reserve a slot through the sink, fill it, and hand it
//! back; the manager then holds it once per active client and every
//! `ReadyBuffer` releases its hold when dropped.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

use crate::types::FrameInfo;

/// Index of a slot in a buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u32);

#[derive(Debug)]
enum SlotState {
    Free,
    /// Reserved by a producer, not yet delivered
    Writing,
    /// Delivered, waiting for the manager to hand it out
    Delivered,
    /// Handed out to this many consumers
    Held(usize),
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    data: Bytes,
}

#[derive(Debug, Default)]
struct PoolInner {
    slots: Vec<Slot>,
    reservations: u64,
    exhausted: u64,
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Maximum number of slots
    pub capacity: usize,
    /// Slots allocated so far
    pub allocated: usize,
    /// Slots not free
    pub in_use: usize,
    /// Successful reservations
    pub reservations: u64,
    /// Reservations refused because every slot was busy
    pub exhausted: u64,
}

/// Bounded pool of frame buffers shared by a device and its clients
#[derive(Debug)]
pub struct BufferPool {
    max_buffers: usize,
    inner: Mutex<PoolInner>,
    retired: AtomicBool,
}

impl BufferPool {
    /// Create a pool holding at most `max_buffers` slots
    pub fn new(max_buffers: usize) -> Arc<Self> {
        Arc::new(Self {
            max_buffers: max_buffers.max(1),
            inner: Mutex::new(PoolInner::default()),
            retired: AtomicBool::new(false),
        })
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> usize {
        self.max_buffers
    }

    /// Reserve a free slot and return a zeroed buffer of `size` bytes
    ///
    /// Returns `None` when every slot is in use.
    pub fn reserve(self: &Arc<Self>, size: usize) -> Option<WritableBuffer> {
        let mut inner = self.inner.lock();

        let index = match inner
            .slots
            .iter()
            .position(|slot| matches!(slot.state, SlotState::Free))
        {
            Some(index) => index,
            None if inner.slots.len() < self.max_buffers => {
                inner.slots.push(Slot {
                    state: SlotState::Free,
                    data: Bytes::new(),
                });
                inner.slots.len() - 1
            }
            None => {
                inner.exhausted += 1;
                trace!("Buffer pool exhausted ({} slots)", self.max_buffers);
                return None;
            }
        };

        inner.slots[index].state = SlotState::Writing;
        inner.slots[index].data = Bytes::new();
        inner.reservations += 1;

        let mut data = BytesMut::with_capacity(size);
        data.resize(size, 0);

        Some(WritableBuffer {
            id: BufferId(index as u32),
            data,
            pool: Arc::downgrade(self),
            committed: false,
        })
    }

    /// Store a filled buffer, moving its slot to delivered
    pub(crate) fn commit(&self, mut buffer: WritableBuffer) -> BufferId {
        let id = buffer.id;
        let data = std::mem::take(&mut buffer.data).freeze();
        buffer.committed = true;

        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(id.0 as usize) {
            slot.data = data;
            slot.state = SlotState::Delivered;
        }
        id
    }

    /// Hand a delivered buffer to `consumers` readers
    ///
    /// With zero consumers the slot is freed immediately.
    pub fn hold(&self, id: BufferId, consumers: usize) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(id.0 as usize) else {
            warn!("Hold on unknown buffer {:?}", id);
            return;
        };

        match slot.state {
            SlotState::Delivered if consumers == 0 => {
                slot.state = SlotState::Free;
                slot.data = Bytes::new();
            }
            SlotState::Delivered => slot.state = SlotState::Held(consumers),
            SlotState::Held(n) => slot.state = SlotState::Held(n + consumers),
            _ => warn!("Hold on buffer {:?} in state {:?}", id, slot.state),
        }
    }

    /// Drop one consumer hold; the slot is freed when the last hold goes
    pub fn release(&self, id: BufferId) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(id.0 as usize) else {
            return;
        };

        match slot.state {
            SlotState::Held(n) if n > 1 => slot.state = SlotState::Held(n - 1),
            SlotState::Held(_) | SlotState::Delivered | SlotState::Writing => {
                slot.state = SlotState::Free;
                slot.data = Bytes::new();
            }
            SlotState::Free => {}
        }
    }

    /// Read the payload of a delivered or held buffer
    pub fn read(&self, id: BufferId) -> Option<Bytes> {
        let inner = self.inner.lock();
        inner.slots.get(id.0 as usize).and_then(|slot| match slot.state {
            SlotState::Delivered | SlotState::Held(_) => Some(slot.data.clone()),
            _ => None,
        })
    }

    /// Current usage
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            capacity: self.max_buffers,
            allocated: inner.slots.len(),
            in_use: inner
                .slots
                .iter()
                .filter(|slot| !matches!(slot.state, SlotState::Free))
                .count(),
            reservations: inner.reservations,
            exhausted: inner.exhausted,
        }
    }

    /// Mark the pool as no longer backing a live entry
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Whether the owning entry has been destroyed
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

/// A reserved slot being filled by a producer
///
/// Dropping it without delivering returns the slot to the pool.
#[derive(Debug)]
pub struct WritableBuffer {
    id: BufferId,
    data: BytesMut,
    pool: Weak<BufferPool>,
    committed: bool,
}

impl WritableBuffer {
    /// Slot id
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Writable payload
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for WritableBuffer {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.id);
        }
    }
}

/// A delivered frame handed to one client
///
/// Holds one consumer reference on its slot until dropped.
#[derive(Debug)]
pub struct ReadyBuffer {
    id: BufferId,
    data: Bytes,
    info: FrameInfo,
    pool: Weak<BufferPool>,
}

impl ReadyBuffer {
    pub(crate) fn new(id: BufferId, data: Bytes, info: FrameInfo, pool: &Arc<BufferPool>) -> Self {
        Self {
            id,
            data,
            info,
            pool: Arc::downgrade(pool),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }
}

impl Drop for ReadyBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.id);
        }
    }
}

/// Weak handle to an entry's buffer pool, returned by start-capture
#[derive(Debug, Clone)]
pub struct PoolAccessor {
    pool: Weak<BufferPool>,
}

impl PoolAccessor {
    pub(crate) fn new(pool: &Arc<BufferPool>) -> Self {
        Self {
            pool: Arc::downgrade(pool),
        }
    }

    /// The pool, if its entry is still live
    pub fn pool(&self) -> Option<Arc<BufferPool>> {
        self.pool.upgrade().filter(|pool| !pool.is_retired())
    }

    /// Whether the entry backing this accessor still exists
    pub fn is_live(&self) -> bool {
        self.pool().is_some()
    }

    /// Pool usage, if live
    pub fn stats(&self) -> Option<PoolStats> {
        self.pool().map(|pool| pool.stats())
    }
}
