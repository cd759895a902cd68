//! Stategraph Pipeline
//!
//! Structure-loading steps layered on the stategraph kernel: data import,
//! trajectory ingestion (raw or blob), model and structure creation, optional
//! unit cells, auxiliary properties and tagged components. Format parsing,
//! symmetry detection and selection resolution are supplied by the caller
//! through [`TrajectoryProvider`], [`SymmetryPredicate`] and
//! [`SelectionResolver`].
//!
//! ```rust,ignore
//! let pipeline = StructurePipeline::builder(Arc::new(MyProvider)).build();
//! let loaded = pipeline.load_structure(&input).await?;
//! let water = pipeline
//!     .try_create_component(loaded.structure, "water", water_atoms)
//!     .await?;
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod transformers;
pub mod types;

pub use collaborators::{
    IndexSelectionResolver, SelectionResolver, SpacegroupSymmetry, SymmetryPredicate,
    TrajectoryProvider,
};
pub use config::{ConfigError, PipelineConfig, StategraphConfig};
pub use error::PipelineError;
pub use pipeline::{LoadedStructure, ModelNodes, StructurePipeline, StructurePipelineBuilder};
pub use transformers::{ComponentParams, ModelParams, PropertyParams, StructureParams};
pub use types::{
    Component, DataBlob, DataKind, InputData, Model, ModelFrame, ParsedBlob, Property, RawData,
    Selection, Structure, Trajectory, UnitCell,
};
