//! Session table

use std::collections::BTreeMap;

use crate::types::{SessionId, StreamDescriptor};

/// Maps session ids to the stream they were opened for
#[derive(Debug)]
pub struct SessionTable {
    next_id: u64,
    sessions: BTreeMap<SessionId, StreamDescriptor>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            sessions: BTreeMap::new(),
        }
    }

    /// Allocate a fresh id for `descriptor`
    pub fn open(&mut self, descriptor: StreamDescriptor) -> SessionId {
        let id = SessionId::from_raw(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, descriptor);
        id
    }

    pub fn close(&mut self, id: SessionId) -> Option<StreamDescriptor> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&StreamDescriptor> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Sessions in id order
    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &StreamDescriptor)> {
        self.sessions.iter().map(|(id, d)| (*id, d))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_and_never_repeat() {
        let mut table = SessionTable::new();
        let a = table.open(StreamDescriptor::device("cam0"));
        let b = table.open(StreamDescriptor::device("cam0"));
        assert_eq!(a.as_u64(), 1);
        assert_ne!(a, b);

        table.close(a);
        let c = table.open(StreamDescriptor::device("cam0"));
        assert_eq!(c.as_u64(), 3);
        assert!(!table.contains(a));
        assert_eq!(table.len(), 2);
    }
}
