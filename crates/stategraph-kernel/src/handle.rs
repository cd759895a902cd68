use crate::commit::{CommitEngine, CommitPolicy, Selector};
use crate::config::KernelConfig;
use crate::error::CommitError;
use crate::journal::{CommitJournal, CommitOutcome};
use crate::store::NodeStore;
use crate::transaction::{Anchor, StagedOp, TransactionBuilder};
use crate::transformer::TransformerRegistry;
use crate::types::{NodeView, Reference};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main kernel handle: owns the published graph and serializes commits.
///
/// Readers see the last published graph and never block on an in-flight
/// commit. Commits are applied one at a time in submission order; each works
/// on a private copy that replaces the published graph only once it has
/// settled.
pub struct KernelHandle {
    config: KernelConfig,
    registry: TransformerRegistry,
    published: RwLock<Arc<NodeStore>>,
    commit_lock: tokio::sync::Mutex<()>,
    journal: CommitJournal,
}

impl KernelHandle {
    /// Create a new kernel handle with default configuration
    pub fn new(registry: TransformerRegistry) -> Self {
        Self::with_config(KernelConfig::default(), registry)
    }

    /// Create a new kernel handle with custom configuration
    pub fn with_config(config: KernelConfig, registry: TransformerRegistry) -> Self {
        let store = NodeStore::new(config.root_kind.clone());
        Self {
            journal: CommitJournal::with_capacity(config.journal_capacity),
            published: RwLock::new(Arc::new(store)),
            commit_lock: tokio::sync::Mutex::new(()),
            registry,
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    pub fn journal(&self) -> &CommitJournal {
        &self.journal
    }

    /// The last published graph.
    pub fn graph(&self) -> Arc<NodeStore> {
        Arc::clone(&self.published.read())
    }

    pub fn root(&self) -> Reference {
        self.published.read().root()
    }

    pub fn resolve(&self, reference: Reference) -> Option<NodeView> {
        self.published.read().view(reference)
    }

    pub fn children(&self, reference: Reference) -> Vec<Reference> {
        self.published.read().children(reference)
    }

    pub fn find_tagged(&self, parent: Reference, tag_key: &str) -> Option<Reference> {
        self.published.read().find_tagged(parent, tag_key)
    }

    pub fn node_count(&self) -> usize {
        self.published.read().len()
    }

    /// Start a transaction anchored at `anchor`.
    pub fn begin(&self, anchor: impl Into<Anchor>) -> TransactionBuilder {
        TransactionBuilder::begin(anchor)
    }

    /// Commit a transaction with no external cancellation.
    pub async fn commit(
        &self,
        tx: TransactionBuilder,
        policy: CommitPolicy,
    ) -> Result<Vec<Selector>, CommitError> {
        self.commit_with_cancel(tx, policy, &CancellationToken::new())
            .await
    }

    /// Commit a transaction, threading `cancel` into every production step.
    ///
    /// # Errors
    /// Returns `CommitError` when a full-revert transaction fails; the
    /// published graph is then unchanged. Partial commits always succeed and
    /// report failures through their selectors.
    #[tracing::instrument(
        name = "commit",
        skip_all,
        fields(operations = tx.len(), revert = policy.revert_on_failure)
    )]
    pub async fn commit_with_cancel(
        &self,
        tx: TransactionBuilder,
        policy: CommitPolicy,
        cancel: &CancellationToken,
    ) -> Result<Vec<Selector>, CommitError> {
        let _guard = self.lock_commits().await;
        self.apply_locked(tx.into_ops(), policy, cancel).await
    }

    /// Wait for the commit critical section.
    pub(crate) async fn lock_commits(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.commit_lock.lock().await
    }

    /// Apply `ops` to a working copy of the published graph and publish it.
    /// Callers must hold the guard from [`lock_commits`](Self::lock_commits).
    pub(crate) async fn apply_locked(
        &self,
        ops: Vec<StagedOp>,
        policy: CommitPolicy,
        cancel: &CancellationToken,
    ) -> Result<Vec<Selector>, CommitError> {
        let operations = ops.len();
        let mut working = NodeStore::clone(&self.graph());
        let engine = CommitEngine {
            registry: &self.registry,
            cancel,
            timeout: self.config.production_timeout(),
        };

        match engine.apply(&mut working, ops, policy).await {
            Ok(applied) => {
                let nodes = working.len();
                *self.published.write() = Arc::new(working);
                let outcome = if applied.failed.is_empty() {
                    CommitOutcome::Applied
                } else {
                    CommitOutcome::PartiallyApplied {
                        failed: applied.failed.clone(),
                    }
                };
                let sequence = self.journal.record(operations, policy, outcome);
                info!(sequence, nodes, failed = applied.failed.len(), "commit published");
                Ok(applied.selectors)
            }
            Err(err) => {
                let sequence = self.journal.record(
                    operations,
                    policy,
                    CommitOutcome::Reverted {
                        operation: err.operation,
                        reason: err.source.to_string(),
                    },
                );
                warn!(sequence, operation = err.operation, error = %err.source, "commit reverted");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProductionError;
    use crate::transformer::{FnTransformer, ProductionInput};
    use crate::types::{Lifecycle, Params, Payload, TransformerKind};

    const LEAF: TransformerKind = TransformerKind::from_static("leaf");
    const BROKEN: TransformerKind = TransformerKind::from_static("broken");

    fn kernel() -> KernelHandle {
        let registry = TransformerRegistry::new()
            .with(FnTransformer::new(LEAF, |_: ProductionInput<'_>| {
                Ok(Payload::new("leaf"))
            }))
            .with(FnTransformer::new(BROKEN, |_: ProductionInput<'_>| {
                Err(ProductionError::failed("broken"))
            }));
        KernelHandle::new(registry)
    }

    #[tokio::test]
    async fn commit_publishes_settled_nodes() {
        let kernel = kernel();
        let selectors = kernel
            .commit(
                kernel.begin(kernel.root()).insert(LEAF, Params::empty()),
                CommitPolicy::FULL_REVERT,
            )
            .await
            .unwrap();

        let node = selectors[0].reference.unwrap();
        assert_eq!(kernel.resolve(node).unwrap().lifecycle, Lifecycle::Ok);
        assert_eq!(kernel.children(kernel.root()), vec![node]);
        assert_eq!(kernel.node_count(), 2);
        assert_eq!(kernel.journal().last().map(|r| r.outcome), Some(CommitOutcome::Applied));
    }

    #[tokio::test]
    async fn reverted_commit_is_journaled() {
        let kernel = kernel();
        let err = kernel
            .commit(
                kernel
                    .begin(kernel.root())
                    .insert(LEAF, Params::empty())
                    .insert(BROKEN, Params::empty()),
                CommitPolicy::FULL_REVERT,
            )
            .await
            .unwrap_err();

        assert_eq!(err.operation, 1);
        assert_eq!(kernel.node_count(), 1);
        assert!(matches!(
            kernel.journal().last().map(|r| r.outcome),
            Some(CommitOutcome::Reverted { operation: 1, .. })
        ));
    }

    #[tokio::test]
    async fn readers_keep_old_graph_until_publish() {
        let kernel = kernel();
        let before = kernel.graph();
        kernel
            .commit(
                kernel.begin(kernel.root()).insert(LEAF, Params::empty()),
                CommitPolicy::PARTIAL,
            )
            .await
            .unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(kernel.graph().len(), 2);
    }
}
