//! Domain payloads produced by the pipeline's transformers.

use serde::{Deserialize, Serialize};

/// Declared kind of an imported data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    /// A single parseable item
    Raw,
    /// A container of several items parsed independently
    Blob,
}

/// One unparsed item as handed to a [`TrajectoryProvider`](crate::TrajectoryProvider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawData {
    pub label: String,
    pub format: String,
    pub bytes: Vec<u8>,
}

impl RawData {
    pub fn new(label: impl Into<String>, format: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            format: format.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBlob {
    pub entries: Vec<RawData>,
}

/// Payload of an imported data node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputData {
    Raw(RawData),
    Blob(DataBlob),
}

impl InputData {
    pub fn kind(&self) -> DataKind {
        match self {
            InputData::Raw(_) => DataKind::Raw,
            InputData::Blob(_) => DataKind::Blob,
        }
    }
}

/// One model of a trajectory, as reported by the format parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFrame {
    pub label: String,
    pub atom_count: usize,
    pub spacegroup: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trajectory {
    pub frames: Vec<ModelFrame>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Per-entry trajectories of a parsed blob, before they are combined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBlob {
    pub trajectories: Vec<Trajectory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub index: usize,
    pub frame: ModelFrame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCell {
    pub spacegroup: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    pub label: String,
    pub atom_count: usize,
}

/// A keyed subset of a structure's atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub key: String,
    pub atoms: Vec<usize>,
}

impl Component {
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

/// Auxiliary value attached to a structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: serde_json::Value,
}

/// Selection expression evaluated by a [`SelectionResolver`](crate::SelectionResolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub expression: String,
}

impl Selection {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}
