use super::{Anchor, NodeOptions, OpHandle, StagedOp};
use crate::types::{Params, Reference, TransformerKind};

/// Fluent, value-returning description of a graph mutation.
///
/// Usage:
/// ```rust,ignore
/// let tx = kernel
///     .begin(data_ref)
///     .insert(PARSE_BLOB, Params::empty())
///     .insert(TRAJECTORY_FROM_BLOB, Params::empty());
/// let selectors = kernel.commit(tx, CommitPolicy::FULL_REVERT).await?;
/// ```
///
/// `insert` and `upsert_tagged` move the anchor to the staged node, so chained
/// calls build a path. `delete` leaves the anchor where it is.
#[derive(Debug, Clone)]
#[must_use = "a transaction does nothing until committed"]
pub struct TransactionBuilder {
    ops: Vec<StagedOp>,
    anchor: Anchor,
}

impl TransactionBuilder {
    pub fn begin(anchor: impl Into<Anchor>) -> Self {
        Self {
            ops: Vec::new(),
            anchor: anchor.into(),
        }
    }

    pub fn insert(self, kind: impl Into<TransformerKind>, params: Params) -> Self {
        self.insert_with(kind, params, NodeOptions::default())
    }

    pub fn insert_with(
        mut self,
        kind: impl Into<TransformerKind>,
        params: Params,
        options: NodeOptions,
    ) -> Self {
        let anchor = self.anchor;
        self.stage(StagedOp::Insert {
            anchor,
            kind: kind.into(),
            params,
            options,
        })
    }

    /// Insert a child addressed by `tag_key`, or replace the params of the
    /// child already carrying it.
    pub fn upsert_tagged(
        self,
        tag_key: impl Into<String>,
        kind: impl Into<TransformerKind>,
        params: Params,
    ) -> Self {
        self.upsert_tagged_with(tag_key, kind, params, NodeOptions::default())
    }

    pub fn upsert_tagged_with(
        mut self,
        tag_key: impl Into<String>,
        kind: impl Into<TransformerKind>,
        params: Params,
        options: NodeOptions,
    ) -> Self {
        let anchor = self.anchor;
        self.stage(StagedOp::UpsertTagged {
            anchor,
            tag_key: tag_key.into(),
            kind: kind.into(),
            params,
            options,
        })
    }

    /// Remove `target` and its subtree.
    pub fn delete(mut self, target: Reference) -> Self {
        self.ops.push(StagedOp::Delete { target });
        self
    }

    /// Re-anchor subsequent operations.
    pub fn to(mut self, anchor: impl Into<Anchor>) -> Self {
        self.anchor = anchor.into();
        self
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// Handle of the most recently staged operation.
    pub fn last_op(&self) -> Option<OpHandle> {
        self.ops.len().checked_sub(1).map(OpHandle)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StagedOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<StagedOp> {
        self.ops
    }

    fn stage(mut self, op: StagedOp) -> Self {
        self.ops.push(op);
        self.anchor = Anchor::Staged(OpHandle(self.ops.len() - 1));
        self
    }
}
