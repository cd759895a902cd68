//! Error types for the kernel
//!
//! - [`ProductionError`]: a transformer's production step failed, was
//!   cancelled or timed out
//! - [`OperationError`]: one staged operation could not be applied
//! - [`CommitError`]: a full-revert transaction was rolled back
//! - [`TaskError`]: the first unrecovered failure of a task

use crate::types::{Lifecycle, Reference, TransformerKind};
use std::time::Duration;

/// Failure of a production step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductionError {
    /// The transformer reported a failure
    #[error("{0}")]
    Failed(String),

    /// The cancellation token fired before the step completed
    #[error("production cancelled")]
    Cancelled,

    /// The step exceeded the configured production timeout
    #[error("production timed out after {0:?}")]
    TimedOut(Duration),

    /// No transformer is registered for the node's kind
    #[error("no transformer registered for kind '{0}'")]
    UnknownTransformer(TransformerKind),
}

impl ProductionError {
    #[inline]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Lifecycle transition rejected by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal lifecycle transition {from:?} -> {to:?}")]
pub struct LifecycleError {
    pub from: Lifecycle,
    pub to: Lifecycle,
}

/// Failure of a single staged operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// The operation targets a reference that does not resolve, or resolves
    /// to a node of the wrong shape (e.g. a parent without payload)
    #[error("invalid reference {}: {reason}", display_reference(.reference))]
    InvalidReference {
        reference: Option<Reference>,
        reason: String,
    },

    /// The node's production step failed
    #[error("transformer '{kind}' failed: {source}")]
    Production {
        kind: TransformerKind,
        source: ProductionError,
    },

    /// Internal lifecycle bookkeeping error
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl OperationError {
    pub(crate) fn invalid(reference: Option<Reference>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference,
            reason: reason.into(),
        }
    }

    /// True when the failure stems from cancellation rather than the
    /// transformer itself.
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Production {
                source: ProductionError::Cancelled,
                ..
            }
        )
    }

    #[inline]
    #[must_use]
    pub fn is_invalid_reference(&self) -> bool {
        matches!(self, Self::InvalidReference { .. })
    }
}

fn display_reference(reference: &Option<Reference>) -> String {
    reference.map_or_else(|| "<unmaterialized>".to_string(), |r| r.to_string())
}

/// A full-revert transaction failed and was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transaction reverted: operation #{operation} failed: {source}")]
pub struct CommitError {
    /// Index of the failing operation within the transaction
    pub operation: usize,
    /// The originating failure
    pub source: OperationError,
}

impl CommitError {
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.source.is_cancellation()
    }
}

/// Outcome of a task that did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task observed its cancellation token
    #[error("task cancelled")]
    Cancelled,

    /// A commit inside the task was reverted
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// Domain resolution (e.g. selection lookup) failed
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// The task's future panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    #[inline]
    pub fn resolution(reason: impl Into<String>) -> Self {
        Self::Resolution(reason.into())
    }

    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Commit(e) => e.is_cancellation(),
            _ => false,
        }
    }
}
