//! Snapshot Manager
//!
//! A snapshot is a deep copy of the node arena. Payloads are immutable and
//! shared. The generation ledger is not captured: references minted after
//! the snapshot stay retired once it is restored.

use super::{slot_index, Entry, NodeStore};
use crate::types::Reference;

/// Point-in-time copy of a [`NodeStore`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    slots: Vec<Option<Entry>>,
    len: usize,
    root: Reference,
}

impl Snapshot {
    /// Number of live nodes captured.
    pub fn node_count(&self) -> usize {
        self.len
    }

    pub fn root(&self) -> Reference {
        self.root
    }
}

impl NodeStore {
    /// Capture the current arena.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            slots: self.slots.clone(),
            len: self.len,
            root: self.root,
        }
    }

    /// Replace the arena with a previously captured one.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.slots = snapshot.slots;
        self.len = snapshot.len;
        self.root = snapshot.root;
        self.free = self
            .slots
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, entry)| entry.is_none())
            .map(|(slot, _)| slot_index(slot))
            .collect();
    }
}
