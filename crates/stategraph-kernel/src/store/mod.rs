//! Node Store
//!
//! Arena of graph nodes addressed by generational [`Reference`]s. The store
//! is a plain data structure: no locking, no async. The
//! [`KernelHandle`](crate::KernelHandle) owns the published copy and mutates
//! private working copies inside its commit critical section.

mod snapshot;

pub use snapshot::Snapshot;

use crate::error::OperationError;
use crate::state_machine;
use crate::types::{Lifecycle, NodeView, Params, Payload, Reference, TransformerKind};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Structural store failures; surfaced to callers as
/// [`OperationError::InvalidReference`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("reference {0} does not resolve")]
    UnknownReference(Reference),

    #[error("the root node cannot be deleted")]
    RootIsPermanent,

    #[error("tag key '{tag_key}' is already used under {parent}")]
    DuplicateTagKey { parent: Reference, tag_key: String },
}

impl From<StoreError> for OperationError {
    fn from(value: StoreError) -> Self {
        let reference = match &value {
            StoreError::UnknownReference(r) => Some(*r),
            StoreError::DuplicateTagKey { parent, .. } => Some(*parent),
            StoreError::RootIsPermanent => None,
        };
        OperationError::invalid(reference, value.to_string())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) transformer_kind: TransformerKind,
    pub(crate) params: Params,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) tag_key: Option<String>,
    pub(crate) parent: Option<Reference>,
    pub(crate) children: Vec<Reference>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) payload: Option<Payload>,
    pub(crate) error: Option<String>,
    pub(crate) is_ghost: bool,
    pub(crate) version: u64,
}

/// Definition of a node about to be materialized.
#[derive(Debug, Clone)]
pub(crate) struct NodeDraft {
    pub(crate) kind: TransformerKind,
    pub(crate) params: Params,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) tag_key: Option<String>,
    pub(crate) is_ghost: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    generation: u32,
    node: Node,
}

/// Arena of nodes rooted at a single permanent root.
///
/// Clones share one generation ledger: a reference minted by any copy
/// (including a working copy that is later discarded or restored) is never
/// minted again.
#[derive(Debug, Clone)]
pub struct NodeStore {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    len: usize,
    root: Reference,
    generations: Arc<Mutex<Vec<u32>>>,
}

impl NodeStore {
    /// Create a store holding only its root, `Ok` with a unit payload.
    pub fn new(root_kind: TransformerKind) -> Self {
        let mut store = Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            root: Reference::new(0, 0),
            generations: Arc::new(Mutex::new(Vec::new())),
        };
        store.root = store.allocate(Node {
            transformer_kind: root_kind,
            params: Params::empty(),
            tags: BTreeSet::new(),
            tag_key: None,
            parent: None,
            children: Vec::new(),
            lifecycle: Lifecycle::Ok,
            payload: Some(Payload::unit()),
            error: None,
            is_ghost: false,
            version: 1,
        });
        store
    }

    pub fn root(&self) -> Reference {
        self.root
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: the root cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, reference: Reference) -> bool {
        self.get(reference).is_some()
    }

    /// All live references in slot order.
    pub fn references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry
                .as_ref()
                .map(|e| Reference::new(slot_index(slot), e.generation))
        })
    }

    pub fn view(&self, reference: Reference) -> Option<NodeView> {
        let node = self.get(reference)?;
        Some(NodeView {
            reference,
            transformer_kind: node.transformer_kind.clone(),
            params: node.params.clone(),
            tags: node.tags.clone(),
            tag_key: node.tag_key.clone(),
            parent: node.parent,
            children: node.children.clone(),
            lifecycle: node.lifecycle,
            payload: node.payload.clone(),
            error: node.error.clone(),
            is_ghost: node.is_ghost,
            version: node.version,
        })
    }

    /// Views of every live node in slot order.
    pub fn views(&self) -> Vec<NodeView> {
        self.references().filter_map(|r| self.view(r)).collect()
    }

    pub fn children(&self, reference: Reference) -> Vec<Reference> {
        self.get(reference)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// The child of `parent` addressed by `tag_key`, if any.
    pub fn find_tagged(&self, parent: Reference, tag_key: &str) -> Option<Reference> {
        let node = self.get(parent)?;
        node.children.iter().copied().find(|child| {
            self.get(*child)
                .is_some_and(|n| n.tag_key.as_deref() == Some(tag_key))
        })
    }

    /// Descendants of `reference` in pre-order (parents before children),
    /// excluding `reference` itself.
    pub fn descendants(&self, reference: Reference) -> Vec<Reference> {
        let mut out = Vec::new();
        let mut stack: Vec<Reference> = self
            .get(reference)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.get(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub(crate) fn get(&self, reference: Reference) -> Option<&Node> {
        self.slots
            .get(reference.slot())?
            .as_ref()
            .filter(|e| e.generation == reference.generation())
            .map(|e| &e.node)
    }

    pub(crate) fn get_mut(&mut self, reference: Reference) -> Option<&mut Node> {
        self.slots
            .get_mut(reference.slot())?
            .as_mut()
            .filter(|e| e.generation == reference.generation())
            .map(|e| &mut e.node)
    }

    /// Materialize a `Pending` child of `parent`.
    pub(crate) fn insert_child(
        &mut self,
        parent: Reference,
        draft: NodeDraft,
    ) -> Result<Reference, StoreError> {
        if !self.contains(parent) {
            return Err(StoreError::UnknownReference(parent));
        }
        let mut tags = draft.tags;
        if let Some(key) = &draft.tag_key {
            if self.find_tagged(parent, key).is_some() {
                return Err(StoreError::DuplicateTagKey {
                    parent,
                    tag_key: key.clone(),
                });
            }
            tags.insert(key.clone());
        }

        let reference = self.allocate(Node {
            transformer_kind: draft.kind,
            params: draft.params,
            tags,
            tag_key: draft.tag_key,
            parent: Some(parent),
            children: Vec::new(),
            lifecycle: Lifecycle::Pending,
            payload: None,
            error: None,
            is_ghost: draft.is_ghost,
            version: 0,
        });
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(reference);
        }
        Ok(reference)
    }

    /// Remove `target` and its whole subtree. Returns the removed references,
    /// `target` first.
    pub(crate) fn remove_subtree(&mut self, target: Reference) -> Result<Vec<Reference>, StoreError> {
        if target == self.root {
            return Err(StoreError::RootIsPermanent);
        }
        let parent = self
            .get(target)
            .ok_or(StoreError::UnknownReference(target))?
            .parent;
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|c| *c != target);
        }

        let mut removed = vec![target];
        removed.extend(self.descendants(target));
        for reference in &removed {
            self.release(*reference);
        }
        Ok(removed)
    }

    /// Replace the definition of an existing node and reset it to `Pending`.
    pub(crate) fn redefine(
        &mut self,
        reference: Reference,
        draft: NodeDraft,
    ) -> Result<(), OperationError> {
        self.transition(reference, Lifecycle::Pending)?;
        let node = self
            .get_mut(reference)
            .ok_or(StoreError::UnknownReference(reference))?;
        let mut tags = draft.tags;
        if let Some(key) = &node.tag_key {
            tags.insert(key.clone());
        }
        node.transformer_kind = draft.kind;
        node.params = draft.params;
        node.tags = tags;
        node.is_ghost = draft.is_ghost;
        node.error = None;
        Ok(())
    }

    /// Move a node along the lifecycle state machine. Leaving `Ok` drops the
    /// payload.
    pub(crate) fn transition(&mut self, reference: Reference, to: Lifecycle) -> Result<(), OperationError> {
        let node = self
            .get_mut(reference)
            .ok_or(StoreError::UnknownReference(reference))?;
        state_machine::validate_transition(node.lifecycle, to)?;
        node.lifecycle = to;
        if to != Lifecycle::Ok {
            node.payload = None;
        }
        Ok(())
    }

    /// `Applying -> Ok` with a fresh payload.
    pub(crate) fn complete(&mut self, reference: Reference, payload: Payload) -> Result<(), OperationError> {
        self.transition(reference, Lifecycle::Ok)?;
        if let Some(node) = self.get_mut(reference) {
            node.payload = Some(payload);
            node.error = None;
            node.version += 1;
        }
        Ok(())
    }

    /// Move to `Errored`, recording the failure.
    pub(crate) fn fail(&mut self, reference: Reference, error: String) -> Result<(), OperationError> {
        self.transition(reference, Lifecycle::Errored)?;
        if let Some(node) = self.get_mut(reference) {
            node.error = Some(error);
        }
        Ok(())
    }

    fn allocate(&mut self, node: Node) -> Reference {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                slot_index(self.slots.len() - 1)
            }
        };

        let generation = {
            let mut generations = self.generations.lock();
            let index = slot as usize;
            if generations.len() <= index {
                generations.resize(index + 1, 0);
            }
            generations[index] += 1;
            generations[index]
        };

        self.slots[slot as usize] = Some(Entry { generation, node });
        self.len += 1;
        Reference::new(slot, generation)
    }

    fn release(&mut self, reference: Reference) {
        if let Some(entry) = self.slots.get_mut(reference.slot()) {
            if entry
                .as_ref()
                .is_some_and(|e| e.generation == reference.generation())
            {
                *entry = None;
                self.free.push(slot_index(reference.slot()));
                self.len -= 1;
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn slot_index(slot: usize) -> u32 {
    debug_assert!(u32::try_from(slot).is_ok(), "node store exceeded u32 slots");
    slot as u32
}
