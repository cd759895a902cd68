//! Pruning Policy
//!
//! Post-commit check that removes a node whose payload is domain-empty, or
//! which failed to produce one, turning "create" into "create or nothing".

use crate::commit::{CommitPolicy, Selector};
use crate::error::CommitError;
use crate::handle::KernelHandle;
use crate::transaction::StagedOp;
use crate::types::{Payload, Reference};
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl KernelHandle {
    /// Delete `reference` when it is errored or `is_empty` holds for its
    /// payload. Returns whether the node was deleted.
    ///
    /// The check and the deletion run inside one commit critical section, so
    /// a commit queued ahead of the prune is observed before deciding. A node
    /// that no longer exists is left alone and reported as not deleted.
    #[tracing::instrument(name = "prune", skip_all, fields(%reference))]
    pub async fn prune_if_empty<F>(&self, reference: Reference, is_empty: F) -> Result<bool, CommitError>
    where
        F: Fn(&Payload) -> bool,
    {
        let _guard = self.lock_commits().await;
        let Some(view) = self.resolve(reference) else {
            debug!("node already gone");
            return Ok(false);
        };
        let prune = match (view.is_ok(), &view.payload) {
            (true, Some(payload)) => is_empty(payload),
            _ => true,
        };
        if !prune {
            return Ok(false);
        }

        debug!(lifecycle = ?view.lifecycle, "pruning node");
        let delete = vec![StagedOp::Delete { target: reference }];
        self.apply_locked(delete, CommitPolicy::FULL_REVERT, &CancellationToken::new())
            .await?;
        Ok(true)
    }

    /// Collapse "commit then prune" into the surviving node, if any.
    pub async fn settle<F>(&self, selector: &Selector, is_empty: F) -> Result<Option<Reference>, CommitError>
    where
        F: Fn(&Payload) -> bool,
    {
        let Some(reference) = selector.reference else {
            return Ok(None);
        };
        if self.prune_if_empty(reference, is_empty).await? {
            Ok(None)
        } else {
            Ok(self.resolve(reference).map(|view| view.reference))
        }
    }
}
