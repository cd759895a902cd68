//! Stategraph Kernel
//!
//! Transactional build protocol for a versioned, typed DAG of derived
//! artifacts:
//! 1. **Construction**: describe a mutation with a [`TransactionBuilder`]
//! 2. **Commit**: apply it through the [`KernelHandle`], running each node's
//!    asynchronous production step under a [`CommitPolicy`]
//! 3. **Settle**: optionally prune nodes whose payload is domain-empty
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use stategraph_kernel::prelude::*;
//!
//! let kernel = KernelHandle::new(registry);
//! let tx = kernel
//!     .begin(kernel.root())
//!     .insert(TRAJECTORY, Params::empty())
//!     .insert(MODEL, Params::new(json!({ "index": 0 })));
//!
//! let selectors = kernel.commit(tx, CommitPolicy::FULL_REVERT).await?;
//! ```

pub mod commit;
pub mod config;
pub mod error;
pub mod handle;
pub mod journal;
pub mod pruning;
pub mod state_machine;
pub mod store;
pub mod task;
pub mod transaction;
pub mod transformer;
pub mod types;

pub use commit::{CommitPolicy, Selector};
pub use config::KernelConfig;
pub use error::{CommitError, LifecycleError, OperationError, ProductionError, TaskError};
pub use handle::KernelHandle;
pub use journal::{CommitJournal, CommitOutcome, CommitRecord};
pub use store::{NodeStore, Snapshot, StoreError};
pub use task::{TaskContext, TaskHandle, TaskId, TaskRunner, TaskSummary};
pub use transaction::{Anchor, NodeOptions, OpHandle, StagedOp, TransactionBuilder};
pub use transformer::{FnTransformer, ProductionInput, Transformer, TransformerRegistry};
pub use types::{Lifecycle, NodeView, Params, Payload, Reference, TransformerKind};

/// Re-export of the cancellation primitive threaded through production steps.
pub use tokio_util::sync::CancellationToken;

/// Common imports for pipeline layers built on the kernel
pub mod prelude {
    pub use crate::{
        Anchor, CancellationToken, CommitError, CommitPolicy, FnTransformer, KernelConfig,
        KernelHandle, Lifecycle, NodeOptions, NodeView, OperationError, Params, Payload, ProductionError,
        ProductionInput, Reference, Selector, TaskContext, TaskError, TaskHandle, TaskRunner,
        TransactionBuilder, Transformer, TransformerKind, TransformerRegistry,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
