use stategraph_kernel::{CommitError, Reference, TaskError};

/// Pipeline step failures
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A required step was reverted
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// A task-driven step did not complete
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The step's input node does not exist
    #[error("node {0} does not exist")]
    MissingNode(Reference),

    /// The step's input node does not carry the expected payload
    #[error("node {reference} does not hold {expected}")]
    UnexpectedPayload {
        reference: Reference,
        expected: &'static str,
    },

    /// The step's transaction materialized no node
    #[error("step produced no node")]
    NoNode,

    /// Step params could not be encoded
    #[error("invalid params: {0}")]
    Params(#[from] serde_json::Error),
}

impl PipelineError {
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Commit(e) => e.is_cancellation(),
            Self::Task(e) => e.is_cancellation(),
            _ => false,
        }
    }
}

/// Step failures inside a task surface through the task's own error.
impl From<PipelineError> for TaskError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Task(e) => e,
            PipelineError::Commit(e) => TaskError::Commit(e),
            other => TaskError::resolution(other.to_string()),
        }
    }
}
