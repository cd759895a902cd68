//! Transaction construction
//!
//! A transaction is an ordered list of [`StagedOp`]s built with the
//! value-returning [`TransactionBuilder`]. Nothing here touches the node
//! store; operations are only resolved against it at commit time.

mod builder;

pub use builder::TransactionBuilder;

use crate::types::{Params, Reference, TransformerKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Handle to an operation staged earlier in the same builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpHandle(pub(crate) usize);

impl OpHandle {
    /// Position of the operation within its transaction.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a staged operation attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Anchor {
    /// A node that existed when the transaction was built
    Node(Reference),
    /// The node produced by an earlier operation of the same transaction
    Staged(OpHandle),
}

impl From<Reference> for Anchor {
    fn from(reference: Reference) -> Self {
        Anchor::Node(reference)
    }
}

impl From<OpHandle> for Anchor {
    fn from(handle: OpHandle) -> Self {
        Anchor::Staged(handle)
    }
}

/// Extra node attributes set at creation or update time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOptions {
    pub tags: BTreeSet<String>,
    pub is_ghost: bool,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn ghost(mut self) -> Self {
        self.is_ghost = true;
        self
    }
}

/// One not-yet-applied graph operation.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedOp {
    Insert {
        anchor: Anchor,
        kind: TransformerKind,
        params: Params,
        options: NodeOptions,
    },
    UpsertTagged {
        anchor: Anchor,
        tag_key: String,
        kind: TransformerKind,
        params: Params,
        options: NodeOptions,
    },
    Delete {
        target: Reference,
    },
}

impl StagedOp {
    /// Short label used in logs and journal records.
    pub fn label(&self) -> &'static str {
        match self {
            StagedOp::Insert { .. } => "insert",
            StagedOp::UpsertTagged { .. } => "upsert",
            StagedOp::Delete { .. } => "delete",
        }
    }
}
