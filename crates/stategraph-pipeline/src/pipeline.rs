//! Structure pipeline steps
//!
//! Each step builds one transaction against the kernel and picks a commit
//! policy: required steps (ingestion, model, structure) revert on failure,
//! optional ones (unit cell, properties, components) keep what succeeded.

use crate::collaborators::{
    IndexSelectionResolver, SelectionResolver, SpacegroupSymmetry, SymmetryPredicate,
    TrajectoryProvider,
};
use crate::config::{PipelineConfig, StategraphConfig};
use crate::error::PipelineError;
use crate::transformers::{
    self, component_is_empty, ComponentParams, ModelParams, StructureParams, IMPORT_DATA,
    MODEL_FROM_TRAJECTORY, PARSE_BLOB, PARSE_TRAJECTORY, STRUCTURE_COMPONENT,
    STRUCTURE_FROM_MODEL, TRAJECTORY_FROM_BLOB, UNIT_CELL,
};
use crate::types::{DataKind, InputData, Model, Selection, Structure};
use stategraph_kernel::{
    CancellationToken, CommitPolicy, KernelHandle, NodeView, Params, Reference,
    Selector, TaskError, TaskHandle, TaskRunner, Transformer, TransformerKind,
};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// References created by [`StructurePipeline::create_model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelNodes {
    pub model: Reference,
    /// Present when the model has symmetry and the unit cell produced
    pub unit_cell: Option<Reference>,
}

/// References created by [`StructurePipeline::load_structure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedStructure {
    pub data: Reference,
    pub trajectory: Reference,
    pub model: ModelNodes,
    pub structure: Reference,
}

/// Domain steps for loading structures into a kernel graph.
#[derive(Clone)]
pub struct StructurePipeline {
    kernel: Arc<KernelHandle>,
    runner: TaskRunner,
    config: PipelineConfig,
    symmetry: Arc<dyn SymmetryPredicate>,
    resolver: Arc<dyn SelectionResolver>,
}

impl StructurePipeline {
    pub fn builder(provider: Arc<dyn TrajectoryProvider>) -> StructurePipelineBuilder {
        StructurePipelineBuilder::new(provider)
    }

    pub fn kernel(&self) -> &Arc<KernelHandle> {
        &self.kernel
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Import raw or blob data as a child of the root.
    pub async fn import_data(&self, data: &InputData) -> Result<Reference, PipelineError> {
        let params = Params::from_serializable(data)?;
        let kernel = &self.kernel;
        let selectors = kernel
            .commit(
                kernel.begin(kernel.root()).insert(IMPORT_DATA, params),
                CommitPolicy::FULL_REVERT,
            )
            .await?;
        last_reference(&selectors)
    }

    /// Parse a data node into a trajectory, dispatching on its data kind.
    #[tracing::instrument(skip(self))]
    pub async fn ingest_trajectory(&self, data: Reference) -> Result<Reference, PipelineError> {
        let kind = self.payload(data, "input data", |input: &InputData| input.kind())?;
        let tx = self.kernel.begin(data);
        let tx = match kind {
            DataKind::Raw => tx.insert(PARSE_TRAJECTORY, Params::empty()),
            DataKind::Blob => tx
                .insert(PARSE_BLOB, Params::empty())
                .insert(TRAJECTORY_FROM_BLOB, Params::empty()),
        };
        debug!(?kind, "ingesting trajectory");
        let selectors = self.kernel.commit(tx, CommitPolicy::FULL_REVERT).await?;
        last_reference(&selectors)
    }

    /// Create model `index` of a trajectory, plus a unit cell when the model
    /// has symmetry. A failed unit cell does not undo the model.
    #[tracing::instrument(skip(self))]
    pub async fn create_model(&self, trajectory: Reference, index: usize) -> Result<ModelNodes, PipelineError> {
        let params = Params::from_serializable(&ModelParams { index })?;
        let selectors = self
            .kernel
            .commit(
                self.kernel.begin(trajectory).insert(MODEL_FROM_TRAJECTORY, params),
                CommitPolicy::FULL_REVERT,
            )
            .await?;
        let model = last_reference(&selectors)?;

        let wants_cell = self.config.create_unit_cells
            && selectors
                .last()
                .and_then(|s| s.payload_as::<Model>())
                .is_some_and(|m| self.symmetry.has_symmetry(m));
        if !wants_cell {
            return Ok(ModelNodes {
                model,
                unit_cell: None,
            });
        }

        let unit_cell = match self
            .kernel
            .commit(
                self.kernel.begin(model).insert(UNIT_CELL, Params::empty()),
                CommitPolicy::FULL_REVERT,
            )
            .await
        {
            Ok(selectors) => selectors.last().and_then(|s| s.reference),
            Err(e) => {
                warn!(%model, error = %e, "unit cell not created");
                None
            }
        };
        Ok(ModelNodes { model, unit_cell })
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_structure(
        &self,
        model: Reference,
        params: StructureParams,
    ) -> Result<Reference, PipelineError> {
        let params = Params::from_serializable(&params)?;
        let selectors = self
            .kernel
            .commit(
                self.kernel.begin(model).insert(STRUCTURE_FROM_MODEL, params),
                CommitPolicy::FULL_REVERT,
            )
            .await?;
        last_reference(&selectors)
    }

    /// Attach auxiliary nodes to `parent` in one commit under the configured
    /// property policy. Selectors are returned in input order.
    pub async fn attach_properties(
        &self,
        parent: Reference,
        properties: Vec<(TransformerKind, Params)>,
    ) -> Result<Vec<Selector>, PipelineError> {
        let tx = properties
            .into_iter()
            .fold(self.kernel.begin(parent), |tx, (kind, params)| {
                tx.to(parent).insert(kind, params)
            });
        Ok(self.kernel.commit(tx, self.config.property_policy).await?)
    }

    /// Create or update component `key` under `structure`. Returns `None`
    /// when the component came out empty or failed and was pruned.
    pub async fn try_create_component(
        &self,
        structure: Reference,
        key: &str,
        atoms: Vec<usize>,
    ) -> Result<Option<Reference>, PipelineError> {
        self.component(structure, key, atoms, &CancellationToken::new())
            .await
    }

    /// Resolve `selection` against `structure` and create component `key`
    /// from it, as a cancellable task.
    pub fn try_create_component_from_selection(
        &self,
        structure: Reference,
        key: impl Into<String>,
        selection: Selection,
    ) -> TaskHandle<Option<Reference>> {
        let pipeline = self.clone();
        let key = key.into();
        self.runner.run(format!("component {key}"), move |ctx| async move {
            let target = ctx
                .resolve(structure)
                .and_then(|view| view.payload_as::<Structure>().cloned())
                .ok_or_else(|| TaskError::resolution(format!("{structure} is not a structure")))?;
            ctx.checkpoint()?;

            let atoms = pipeline
                .resolver
                .resolve(&target, &selection)
                .await
                .map_err(TaskError::resolution)?;
            ctx.checkpoint()?;

            // A cancellation during the commit fails and prunes the component;
            // once committed, the settled component is returned as is
            Ok(pipeline
                .component(structure, &key, atoms, ctx.cancellation())
                .await?)
        })
    }

    /// Import, ingest, and build model 0 and its structure.
    #[tracing::instrument(skip_all)]
    pub async fn load_structure(&self, data: &InputData) -> Result<LoadedStructure, PipelineError> {
        let data = self.import_data(data).await?;
        let trajectory = self.ingest_trajectory(data).await?;
        let model = self.create_model(trajectory, 0).await?;
        let structure = self
            .create_structure(model.model, StructureParams::default())
            .await?;
        info!(%structure, "structure loaded");
        Ok(LoadedStructure {
            data,
            trajectory,
            model,
            structure,
        })
    }

    async fn component(
        &self,
        structure: Reference,
        key: &str,
        atoms: Vec<usize>,
        cancel: &CancellationToken,
    ) -> Result<Option<Reference>, PipelineError> {
        let params = Params::from_serializable(&ComponentParams {
            key: key.to_string(),
            atoms,
        })?;
        let tx = self.kernel.begin(structure).upsert_tagged(
            self.config.component_tag(key),
            STRUCTURE_COMPONENT,
            params,
        );
        let selectors = self
            .kernel
            .commit_with_cancel(tx, self.config.component_policy, cancel)
            .await?;
        let Some(selector) = selectors.last() else {
            return Ok(None);
        };
        let settled = self.kernel.settle(selector, component_is_empty).await?;
        if settled.is_none() {
            debug!(key, error = ?selector.error, "component pruned");
        }
        Ok(settled)
    }

    fn payload<T: Any, R>(
        &self,
        reference: Reference,
        expected: &'static str,
        read: impl FnOnce(&T) -> R,
    ) -> Result<R, PipelineError> {
        let view: NodeView = self
            .kernel
            .resolve(reference)
            .ok_or(PipelineError::MissingNode(reference))?;
        view.payload_as::<T>()
            .map(read)
            .ok_or(PipelineError::UnexpectedPayload {
                reference,
                expected,
            })
    }
}

impl std::fmt::Debug for StructurePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructurePipeline")
            .field("kernel", &self.kernel)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn last_reference(selectors: &[Selector]) -> Result<Reference, PipelineError> {
    selectors
        .last()
        .and_then(|s| s.reference)
        .ok_or(PipelineError::NoNode)
}

/// Builder for [`StructurePipeline`].
pub struct StructurePipelineBuilder {
    provider: Arc<dyn TrajectoryProvider>,
    config: StategraphConfig,
    symmetry: Arc<dyn SymmetryPredicate>,
    resolver: Arc<dyn SelectionResolver>,
    extra: Vec<Arc<dyn Transformer>>,
}

impl StructurePipelineBuilder {
    fn new(provider: Arc<dyn TrajectoryProvider>) -> Self {
        Self {
            provider,
            config: StategraphConfig::default(),
            symmetry: Arc::new(SpacegroupSymmetry),
            resolver: Arc::new(IndexSelectionResolver),
            extra: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: StategraphConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn symmetry(mut self, symmetry: impl SymmetryPredicate + 'static) -> Self {
        self.symmetry = Arc::new(symmetry);
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: impl SelectionResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Register an additional transformer, e.g. a property kind for
    /// [`StructurePipeline::attach_properties`].
    #[must_use]
    pub fn transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.extra.push(Arc::new(transformer));
        self
    }

    pub fn build(self) -> StructurePipeline {
        let mut registry = transformers::builtin_registry(self.provider);
        for transformer in self.extra {
            registry.register(transformer);
        }
        let kernel = Arc::new(KernelHandle::with_config(self.config.kernel, registry));
        StructurePipeline {
            runner: TaskRunner::new(Arc::clone(&kernel)),
            kernel,
            config: self.config.pipeline,
            symmetry: self.symmetry,
            resolver: self.resolver,
        }
    }
}
