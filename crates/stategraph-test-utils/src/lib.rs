//! Testing utilities for the stategraph workspace
//!
//! Shared transformers, collaborators and fixtures for integration tests.

#![allow(missing_docs)]

use stategraph_kernel::{
    CancellationToken, KernelConfig, KernelHandle, Lifecycle, NodeStore, Params, Payload,
    ProductionError, ProductionInput, Reference, Transformer, TransformerKind,
    TransformerRegistry,
};
use stategraph_pipeline::{
    DataBlob, InputData, ModelFrame, RawData, Selection, SelectionResolver, Structure,
    Trajectory, TrajectoryProvider,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Transformer driven entirely by its params:
/// - `{"fail": true}` fails the production
/// - `{"delay_ms": n}` sleeps first, honouring cancellation
///
/// The payload is the params JSON value. Clones share the call counter.
#[derive(Debug, Clone)]
pub struct ScriptedTransformer {
    kind: TransformerKind,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTransformer {
    pub fn new(kind: impl Into<TransformerKind>) -> Self {
        Self {
            kind: kind.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of production steps run so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transformer for ScriptedTransformer {
    fn kind(&self) -> TransformerKind {
        self.kind.clone()
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = input.params.get("delay_ms").and_then(serde_json::Value::as_u64) {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(delay)) => {}
                () = input.cancel.cancelled() => return Err(ProductionError::Cancelled),
            }
        }
        if input.params.get("fail").and_then(serde_json::Value::as_bool) == Some(true) {
            return Err(ProductionError::failed(format!("{} asked to fail", self.kind)));
        }
        Ok(Payload::new(input.params.as_value().clone()))
    }
}

/// Params helpers for [`ScriptedTransformer`].
pub fn value(v: i64) -> Params {
    Params::new(serde_json::json!({ "value": v }))
}

pub fn failing() -> Params {
    Params::new(serde_json::json!({ "fail": true }))
}

pub fn delayed(ms: u64) -> Params {
    Params::new(serde_json::json!({ "delay_ms": ms }))
}

/// Kernel whose registry holds one [`ScriptedTransformer`] per kind.
pub fn scripted_kernel(kinds: &[&'static str]) -> (KernelHandle, HashMap<&'static str, ScriptedTransformer>) {
    scripted_kernel_with_config(KernelConfig::default(), kinds)
}

pub fn scripted_kernel_with_config(
    config: KernelConfig,
    kinds: &[&'static str],
) -> (KernelHandle, HashMap<&'static str, ScriptedTransformer>) {
    let mut registry = TransformerRegistry::new();
    let mut transformers = HashMap::new();
    for kind in kinds {
        let transformer = ScriptedTransformer::new(*kind);
        registry.register(Arc::new(transformer.clone()));
        transformers.insert(*kind, transformer);
    }
    (KernelHandle::with_config(config, registry), transformers)
}

/// Comparable projection of one node; payloads are compared by identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeShape {
    pub reference: Reference,
    pub kind: String,
    pub params: serde_json::Value,
    pub tags: BTreeSet<String>,
    pub parent: Option<Reference>,
    pub children: Vec<Reference>,
    pub lifecycle: Lifecycle,
    pub version: u64,
    pub error: Option<String>,
    pub payload_ptr: Option<usize>,
}

/// Every node of `graph`, in slot order.
pub fn graph_shape(graph: &NodeStore) -> Vec<NodeShape> {
    graph
        .views()
        .into_iter()
        .map(|view| NodeShape {
            reference: view.reference,
            kind: view.transformer_kind.to_string(),
            params: view.params.as_value().clone(),
            tags: view.tags,
            parent: view.parent,
            children: view.children,
            lifecycle: view.lifecycle,
            version: view.version,
            error: view.error,
            payload_ptr: view.payload.as_ref().map(Payload::addr),
        })
        .collect()
}

/// Provider parsing `RawData::bytes` as a JSON array of [`ModelFrame`]s.
#[derive(Debug, Clone, Default)]
pub struct JsonTrajectoryProvider {
    delay: Option<Duration>,
    parses: Arc<AtomicUsize>,
}

impl JsonTrajectoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every parse, honouring cancellation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TrajectoryProvider for JsonTrajectoryProvider {
    async fn parse(&self, data: &RawData, cancel: &CancellationToken) -> Result<Trajectory, ProductionError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(ProductionError::Cancelled),
            }
        }
        let frames: Vec<ModelFrame> = serde_json::from_slice(&data.bytes)
            .map_err(|e| ProductionError::failed(format!("cannot parse '{}': {e}", data.label)))?;
        Ok(Trajectory { frames })
    }
}

/// Resolver looking expressions up in a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticSelectionResolver {
    selections: HashMap<String, Vec<usize>>,
}

impl StaticSelectionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, expression: impl Into<String>, atoms: Vec<usize>) -> Self {
        self.selections.insert(expression.into(), atoms);
        self
    }
}

#[async_trait::async_trait]
impl SelectionResolver for StaticSelectionResolver {
    async fn resolve(&self, _structure: &Structure, selection: &Selection) -> Result<Vec<usize>, String> {
        self.selections
            .get(&selection.expression)
            .cloned()
            .ok_or_else(|| format!("unknown selection '{}'", selection.expression))
    }
}

pub fn frame(label: &str, atom_count: usize, spacegroup: Option<&str>) -> ModelFrame {
    ModelFrame {
        label: label.to_string(),
        atom_count,
        spacegroup: spacegroup.map(str::to_string),
    }
}

pub fn raw_data(label: &str, frames: &[ModelFrame]) -> RawData {
    RawData::new(label, "json", serde_json::to_vec(frames).unwrap())
}

pub fn raw_input(label: &str, frames: &[ModelFrame]) -> InputData {
    InputData::Raw(raw_data(label, frames))
}

pub fn blob_input(entries: &[(&str, &[ModelFrame])]) -> InputData {
    InputData::Blob(DataBlob {
        entries: entries
            .iter()
            .map(|(label, frames)| raw_data(label, frames))
            .collect(),
    })
}
