//! Production functions of the structure pipeline.

use crate::collaborators::TrajectoryProvider;
use crate::types::{
    Component, InputData, Model, ParsedBlob, Property, Structure, Trajectory, UnitCell,
};
use serde::{Deserialize, Serialize};
use stategraph_kernel::{
    Payload, ProductionError, ProductionInput, Transformer, TransformerKind, TransformerRegistry,
};
use std::sync::Arc;

pub const IMPORT_DATA: TransformerKind = TransformerKind::from_static("import-data");
pub const PARSE_TRAJECTORY: TransformerKind = TransformerKind::from_static("parse-trajectory");
pub const PARSE_BLOB: TransformerKind = TransformerKind::from_static("parse-blob");
pub const TRAJECTORY_FROM_BLOB: TransformerKind =
    TransformerKind::from_static("trajectory-from-blob");
pub const MODEL_FROM_TRAJECTORY: TransformerKind =
    TransformerKind::from_static("model-from-trajectory");
pub const UNIT_CELL: TransformerKind = TransformerKind::from_static("unit-cell");
pub const STRUCTURE_FROM_MODEL: TransformerKind =
    TransformerKind::from_static("structure-from-model");
pub const STRUCTURE_COMPONENT: TransformerKind =
    TransformerKind::from_static("structure-component");
pub const STRUCTURE_PROPERTY: TransformerKind =
    TransformerKind::from_static("structure-property");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParams {
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureParams {
    /// Overrides the model's label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentParams {
    pub key: String,
    pub atoms: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyParams {
    pub name: String,
    pub value: serde_json::Value,
}

/// All built-in transformers, parsing through `provider`.
pub fn builtin_registry(provider: Arc<dyn TrajectoryProvider>) -> TransformerRegistry {
    TransformerRegistry::new()
        .with(ImportData)
        .with(ParseTrajectory {
            provider: Arc::clone(&provider),
        })
        .with(ParseBlob { provider })
        .with(TrajectoryFromBlob)
        .with(ModelFromTrajectory)
        .with(UnitCellFromModel)
        .with(StructureFromModel)
        .with(StructureComponent)
        .with(StructureProperty)
}

fn parent<'a, T: 'static>(input: &ProductionInput<'a>, expected: &str) -> Result<&'a T, ProductionError> {
    input
        .parent
        .downcast_ref::<T>()
        .ok_or_else(|| ProductionError::failed(format!("parent is not {expected} (got {})", input.parent.type_name())))
}

fn params<T: serde::de::DeserializeOwned>(input: &ProductionInput<'_>) -> Result<T, ProductionError> {
    input
        .params
        .decode()
        .map_err(|e| ProductionError::failed(format!("invalid params: {e}")))
}

/// Decodes the imported data carried in params.
struct ImportData;

#[async_trait::async_trait]
impl Transformer for ImportData {
    fn kind(&self) -> TransformerKind {
        IMPORT_DATA
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let data: InputData = params(&input)?;
        Ok(Payload::new(data))
    }
}

struct ParseTrajectory {
    provider: Arc<dyn TrajectoryProvider>,
}

#[async_trait::async_trait]
impl Transformer for ParseTrajectory {
    fn kind(&self) -> TransformerKind {
        PARSE_TRAJECTORY
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let InputData::Raw(raw) = parent::<InputData>(&input, "input data")? else {
            return Err(ProductionError::failed("expected raw data, got a blob"));
        };
        let trajectory = self.provider.parse(raw, input.cancel).await?;
        Ok(Payload::new(trajectory))
    }
}

struct ParseBlob {
    provider: Arc<dyn TrajectoryProvider>,
}

#[async_trait::async_trait]
impl Transformer for ParseBlob {
    fn kind(&self) -> TransformerKind {
        PARSE_BLOB
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let InputData::Blob(blob) = parent::<InputData>(&input, "input data")? else {
            return Err(ProductionError::failed("expected a blob, got raw data"));
        };
        let mut trajectories = Vec::with_capacity(blob.entries.len());
        for entry in &blob.entries {
            input.checkpoint()?;
            let trajectory = self.provider.parse(entry, input.cancel).await.map_err(|e| match e {
                ProductionError::Failed(reason) => {
                    ProductionError::failed(format!("{}: {reason}", entry.label))
                }
                other => other,
            })?;
            trajectories.push(trajectory);
        }
        Ok(Payload::new(ParsedBlob { trajectories }))
    }
}

struct TrajectoryFromBlob;

#[async_trait::async_trait]
impl Transformer for TrajectoryFromBlob {
    fn kind(&self) -> TransformerKind {
        TRAJECTORY_FROM_BLOB
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let blob = parent::<ParsedBlob>(&input, "a parsed blob")?;
        let frames: Vec<_> = blob
            .trajectories
            .iter()
            .flat_map(|t| t.frames.iter().cloned())
            .collect();
        if frames.is_empty() {
            return Err(ProductionError::failed("blob contains no models"));
        }
        Ok(Payload::new(Trajectory { frames }))
    }
}

struct ModelFromTrajectory;

#[async_trait::async_trait]
impl Transformer for ModelFromTrajectory {
    fn kind(&self) -> TransformerKind {
        MODEL_FROM_TRAJECTORY
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let trajectory = parent::<Trajectory>(&input, "a trajectory")?;
        let ModelParams { index } = params(&input)?;
        let frame = trajectory.frames.get(index).cloned().ok_or_else(|| {
            ProductionError::failed(format!(
                "model index {index} out of range ({} models)",
                trajectory.len()
            ))
        })?;
        Ok(Payload::new(Model { index, frame }))
    }
}

struct UnitCellFromModel;

#[async_trait::async_trait]
impl Transformer for UnitCellFromModel {
    fn kind(&self) -> TransformerKind {
        UNIT_CELL
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let model = parent::<Model>(&input, "a model")?;
        let spacegroup = model
            .frame
            .spacegroup
            .clone()
            .ok_or_else(|| ProductionError::failed("model declares no spacegroup"))?;
        Ok(Payload::new(UnitCell { spacegroup }))
    }
}

struct StructureFromModel;

#[async_trait::async_trait]
impl Transformer for StructureFromModel {
    fn kind(&self) -> TransformerKind {
        STRUCTURE_FROM_MODEL
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let model = parent::<Model>(&input, "a model")?;
        let StructureParams { label } = params(&input)?;
        if model.frame.atom_count == 0 {
            return Err(ProductionError::failed(format!(
                "model '{}' has no atoms",
                model.frame.label
            )));
        }
        Ok(Payload::new(Structure {
            label: label.unwrap_or_else(|| model.frame.label.clone()),
            atom_count: model.frame.atom_count,
        }))
    }
}

struct StructureComponent;

#[async_trait::async_trait]
impl Transformer for StructureComponent {
    fn kind(&self) -> TransformerKind {
        STRUCTURE_COMPONENT
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        let structure = parent::<Structure>(&input, "a structure")?;
        let ComponentParams { key, atoms } = params(&input)?;
        if let Some(atom) = atoms.iter().find(|&&a| a >= structure.atom_count) {
            return Err(ProductionError::failed(format!(
                "component '{key}' references atom {atom} of {}",
                structure.atom_count
            )));
        }
        Ok(Payload::new(Component { key, atoms }))
    }
}

struct StructureProperty;

#[async_trait::async_trait]
impl Transformer for StructureProperty {
    fn kind(&self) -> TransformerKind {
        STRUCTURE_PROPERTY
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        parent::<Structure>(&input, "a structure")?;
        let PropertyParams { name, value } = params(&input)?;
        Ok(Payload::new(Property { name, value }))
    }
}

/// Emptiness test used when pruning components.
pub fn component_is_empty(payload: &Payload) -> bool {
    payload.downcast_ref::<Component>().map_or(true, Component::is_empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelFrame;
    use serde_json::json;
    use stategraph_kernel::{CancellationToken, Params};

    async fn run(
        transformer: &dyn Transformer,
        parent: Payload,
        params: Params,
    ) -> Result<Payload, ProductionError> {
        let cancel = CancellationToken::new();
        transformer
            .produce(ProductionInput {
                parent: &parent,
                params: &params,
                cancel: &cancel,
            })
            .await
    }

    fn model(atom_count: usize) -> Model {
        Model {
            index: 0,
            frame: ModelFrame {
                label: "1abc".into(),
                atom_count,
                spacegroup: None,
            },
        }
    }

    #[tokio::test]
    async fn structure_requires_atoms() {
        let err = run(&StructureFromModel, Payload::new(model(0)), Params::new(json!({})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no atoms"));

        let ok = run(&StructureFromModel, Payload::new(model(5)), Params::new(json!({})))
            .await
            .unwrap();
        assert_eq!(ok.downcast_ref::<Structure>().map(|s| s.atom_count), Some(5));
    }

    #[tokio::test]
    async fn model_index_out_of_range() {
        let trajectory = Trajectory {
            frames: vec![model(1).frame],
        };
        let err = run(
            &ModelFromTrajectory,
            Payload::new(trajectory),
            Params::new(json!({ "index": 3 })),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn component_rejects_foreign_atoms() {
        let structure = Structure {
            label: "s".into(),
            atom_count: 4,
        };
        let err = run(
            &StructureComponent,
            Payload::new(structure),
            Params::new(json!({ "key": "ligand", "atoms": [2, 9] })),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("atom 9"));
    }

    #[tokio::test]
    async fn empty_blob_has_no_trajectory() {
        let err = run(&TrajectoryFromBlob, Payload::new(ParsedBlob::default()), Params::empty())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no models"));
    }

    #[test]
    fn component_emptiness() {
        let empty = Payload::new(Component {
            key: "water".into(),
            atoms: vec![],
        });
        let full = Payload::new(Component {
            key: "water".into(),
            atoms: vec![1],
        });
        assert!(component_is_empty(&empty));
        assert!(!component_is_empty(&full));
        assert!(component_is_empty(&Payload::unit()));
    }
}
