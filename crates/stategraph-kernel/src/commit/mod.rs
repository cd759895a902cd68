//! Commit Engine
//!
//! Applies staged operations to a [`NodeStore`] in declaration order, running
//! each node's production step. The engine owns the transactional semantics
//! (snapshot, revert, partial failure); the [`KernelHandle`](crate::KernelHandle)
//! layers serialization and atomic publication on top.

use crate::error::{CommitError, OperationError};
use crate::store::{NodeDraft, NodeStore, StoreError};
use crate::transaction::{Anchor, NodeOptions, StagedOp};
use crate::transformer::{ProductionInput, TransformerRegistry};
use crate::types::{Lifecycle, Params, Payload, Reference, TransformerKind};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failure policy of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitPolicy {
    /// Restore the pre-transaction graph on the first failure
    pub revert_on_failure: bool,
}

impl CommitPolicy {
    /// All or nothing; required steps
    pub const FULL_REVERT: CommitPolicy = CommitPolicy {
        revert_on_failure: true,
    };

    /// Keep completed operations and errored nodes; optional steps
    pub const PARTIAL: CommitPolicy = CommitPolicy {
        revert_on_failure: false,
    };
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self::FULL_REVERT
    }
}

/// Result of one committed operation.
///
/// A read-only view, valid until the node is next mutated or deleted.
#[derive(Debug, Clone)]
pub struct Selector {
    /// The materialized node; `None` for deletes and for operations whose
    /// anchor could not be resolved
    pub reference: Option<Reference>,
    pub ok: bool,
    pub payload: Option<Payload>,
    pub error: Option<OperationError>,
}

impl Selector {
    fn succeeded(reference: Option<Reference>, payload: Option<Payload>) -> Self {
        Self {
            reference,
            ok: true,
            payload,
            error: None,
        }
    }

    fn failed(reference: Option<Reference>, error: OperationError) -> Self {
        Self {
            reference,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(Payload::downcast_ref)
    }
}

/// Selectors of a commit that was not reverted.
#[derive(Debug)]
pub(crate) struct Applied {
    pub(crate) selectors: Vec<Selector>,
    pub(crate) failed: Vec<usize>,
}

/// Per-commit execution context.
pub(crate) struct CommitEngine<'a> {
    pub(crate) registry: &'a TransformerRegistry,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) timeout: Option<Duration>,
}

impl CommitEngine<'_> {
    /// Apply `ops` to `store`.
    ///
    /// Under [`CommitPolicy::FULL_REVERT`] the store is restored to its
    /// pre-transaction snapshot on the first failure.
    pub(crate) async fn apply(
        &self,
        store: &mut NodeStore,
        ops: Vec<StagedOp>,
        policy: CommitPolicy,
    ) -> Result<Applied, CommitError> {
        let mut snapshot = policy.revert_on_failure.then(|| store.snapshot());
        let mut staged: Vec<Option<Reference>> = Vec::with_capacity(ops.len());
        let mut selectors = Vec::with_capacity(ops.len());
        let mut failed = Vec::new();

        for (index, op) in ops.into_iter().enumerate() {
            let label = op.label();
            let (reference, outcome) = self.apply_op(store, &staged, op).await;
            staged.push(reference);
            match outcome {
                Ok(payload) => {
                    debug!(operation = index, op = label, ?reference, "operation applied");
                    selectors.push(Selector::succeeded(reference, payload));
                }
                Err(source) => {
                    warn!(operation = index, op = label, ?reference, error = %source, "operation failed");
                    if let Some(snapshot) = snapshot.take() {
                        store.restore(snapshot);
                        return Err(CommitError {
                            operation: index,
                            source,
                        });
                    }
                    failed.push(index);
                    selectors.push(Selector::failed(reference, source));
                }
            }
        }

        Ok(Applied { selectors, failed })
    }

    async fn apply_op(
        &self,
        store: &mut NodeStore,
        staged: &[Option<Reference>],
        op: StagedOp,
    ) -> (Option<Reference>, Result<Option<Payload>, OperationError>) {
        match op {
            StagedOp::Insert {
                anchor,
                kind,
                params,
                options,
            } => {
                let parent = match resolve_anchor(store, staged, anchor) {
                    Ok(parent) => parent,
                    Err(e) => return (None, Err(e)),
                };
                self.insert(store, parent, draft(kind, params, options, None))
                    .await
            }
            StagedOp::UpsertTagged {
                anchor,
                tag_key,
                kind,
                params,
                options,
            } => {
                let parent = match resolve_anchor(store, staged, anchor) {
                    Ok(parent) => parent,
                    Err(e) => return (None, Err(e)),
                };
                match store.find_tagged(parent, &tag_key) {
                    None => {
                        self.insert(store, parent, draft(kind, params, options, Some(tag_key)))
                            .await
                    }
                    Some(existing) => {
                        let outcome = self
                            .update(store, existing, draft(kind, params, options, Some(tag_key)))
                            .await
                            .map(Some);
                        (Some(existing), outcome)
                    }
                }
            }
            StagedOp::Delete { target } => {
                let outcome = store
                    .remove_subtree(target)
                    .map(|removed| {
                        debug!(%target, removed = removed.len(), "subtree deleted");
                        None
                    })
                    .map_err(OperationError::from);
                (None, outcome)
            }
        }
    }

    async fn insert(
        &self,
        store: &mut NodeStore,
        parent: Reference,
        draft: NodeDraft,
    ) -> (Option<Reference>, Result<Option<Payload>, OperationError>) {
        let node = match store.insert_child(parent, draft) {
            Ok(node) => node,
            Err(e) => return (None, Err(e.into())),
        };
        (Some(node), self.produce(store, node).await.map(Some))
    }

    /// In-place update of an existing tagged node.
    async fn update(
        &self,
        store: &mut NodeStore,
        existing: Reference,
        draft: NodeDraft,
    ) -> Result<Payload, OperationError> {
        if let Some(payload) = unchanged_payload(store, existing, &draft) {
            debug!(reference = %existing, "tagged upsert unchanged, skipping production");
            return Ok(payload);
        }

        store.redefine(existing, draft)?;
        let produced = self.produce(store, existing).await;
        let cascaded = self.cascade(store, existing).await;
        let payload = produced?;
        cascaded?;
        Ok(payload)
    }

    /// Re-produce every descendant of `updated`, parents first. Descendants
    /// whose parent did not come back `Ok` are marked errored.
    async fn cascade(&self, store: &mut NodeStore, updated: Reference) -> Result<(), OperationError> {
        let descendants = store.descendants(updated);
        for node in &descendants {
            store.transition(*node, Lifecycle::Pending)?;
        }

        let mut first_error = None;
        for node in descendants {
            if parent_payload(store, node).is_none() {
                store.fail(node, "parent not ready".to_string())?;
                continue;
            }
            if let Err(e) = self.produce(store, node).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drive a `Pending` node through `Applying` to `Ok` or `Errored`.
    async fn produce(&self, store: &mut NodeStore, node: Reference) -> Result<Payload, OperationError> {
        let Some(parent) = parent_payload(store, node) else {
            store.fail(node, "parent not ready".to_string())?;
            return Err(OperationError::invalid(Some(node), "parent not ready"));
        };
        let (kind, params) = {
            let entry = store.get(node).ok_or(StoreError::UnknownReference(node))?;
            (entry.transformer_kind.clone(), entry.params.clone())
        };

        store.transition(node, Lifecycle::Applying)?;
        let input = ProductionInput {
            parent: &parent,
            params: &params,
            cancel: self.cancel,
        };
        match self.registry.produce(&kind, input, self.timeout).await {
            Ok(payload) => {
                store.complete(node, payload.clone())?;
                Ok(payload)
            }
            Err(source) => {
                store.fail(node, source.to_string())?;
                Err(OperationError::Production { kind, source })
            }
        }
    }
}

fn draft(kind: TransformerKind, params: Params, options: NodeOptions, tag_key: Option<String>) -> NodeDraft {
    NodeDraft {
        kind,
        params,
        tags: options.tags,
        tag_key,
        is_ghost: options.is_ghost,
    }
}

/// Resolve an anchor to a node that can accept children.
fn resolve_anchor(
    store: &NodeStore,
    staged: &[Option<Reference>],
    anchor: Anchor,
) -> Result<Reference, OperationError> {
    let reference = match anchor {
        Anchor::Node(reference) => reference,
        Anchor::Staged(handle) => staged.get(handle.index()).copied().flatten().ok_or_else(|| {
            OperationError::invalid(
                None,
                format!("staged operation #{} produced no node", handle.index()),
            )
        })?,
    };
    let node = store
        .get(reference)
        .ok_or_else(|| OperationError::invalid(Some(reference), "node does not exist"))?;
    if node.lifecycle != Lifecycle::Ok || node.payload.is_none() {
        return Err(OperationError::invalid(Some(reference), "parent is not ready"));
    }
    Ok(reference)
}

fn parent_payload(store: &NodeStore, node: Reference) -> Option<Payload> {
    let parent = store.get(node)?.parent?;
    let parent = store.get(parent)?;
    (parent.lifecycle == Lifecycle::Ok)
        .then(|| parent.payload.clone())
        .flatten()
}

/// The current payload when the staged definition matches the existing one.
fn unchanged_payload(store: &NodeStore, existing: Reference, draft: &NodeDraft) -> Option<Payload> {
    let node = store.get(existing)?;
    if node.lifecycle != Lifecycle::Ok {
        return None;
    }
    let mut tags = draft.tags.clone();
    if let Some(key) = &node.tag_key {
        tags.insert(key.clone());
    }
    let same = node.transformer_kind == draft.kind
        && node.params == draft.params
        && node.tags == tags
        && node.is_ghost == draft.is_ghost;
    if same {
        node.payload.clone()
    } else {
        None
    }
}
