use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Opaque, generational address of a node in the [`NodeStore`](crate::NodeStore).
///
/// A reference is never minted twice: deleting a node retires its generation
/// for good, including references minted by reverted transactions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    slot: u32,
    generation: u32,
}

impl Reference {
    pub(crate) const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub(crate) fn slot(self) -> usize {
        self.slot as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({}v{})", self.slot, self.generation)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// Identifies the production function that creates and updates a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformerKind(Cow<'static, str>);

impl TransformerKind {
    /// Kind used for the store root unless configured otherwise.
    pub const ROOT: TransformerKind = TransformerKind::from_static("root");

    /// Create a kind from a static name (usable in `const` items).
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a kind from an owned name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransformerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TransformerKind {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Transformer-specific configuration of a node.
///
/// Params are compared structurally to decide whether a tagged upsert is a
/// no-op, so two params are equal exactly when their JSON values are.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(serde_json::Value);

impl Params {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Params carrying no configuration (`null`).
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }

    /// Serialize a typed params struct.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self)
    }

    /// Decode into a typed params struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Look up a top-level field of object params.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

impl From<serde_json::Value> for Params {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Opaque domain data produced for a node.
///
/// Cloning is cheap; snapshots and selectors share the underlying value.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The payload carried by the store root.
    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Name of the concrete type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// True when both payloads share the same allocation.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Address of the shared allocation, for identity comparisons.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.value).cast::<()>() as usize
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload<{}>", self.type_name)
    }
}

/// Node lifecycle.
///
/// `Pending` and `Applying` only exist inside an in-flight commit; the
/// published graph holds `Ok` and `Errored` nodes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Pending,
    Applying,
    Ok,
    Errored,
}

impl Lifecycle {
    /// Whether the lifecycle can appear in a published graph.
    pub fn is_settled(self) -> bool {
        matches!(self, Lifecycle::Ok | Lifecycle::Errored)
    }
}

/// Read-only copy of a node, detached from the store.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub reference: Reference,
    pub transformer_kind: TransformerKind,
    pub params: Params,
    pub tags: BTreeSet<String>,
    pub tag_key: Option<String>,
    pub parent: Option<Reference>,
    pub children: Vec<Reference>,
    pub lifecycle: Lifecycle,
    pub payload: Option<Payload>,
    pub error: Option<String>,
    pub is_ghost: bool,
    /// Incremented each time the payload is (re)produced.
    pub version: u64,
}

impl NodeView {
    pub fn is_ok(&self) -> bool {
        self.lifecycle == Lifecycle::Ok
    }

    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(Payload::downcast_ref)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_decode_typed() {
        #[derive(Deserialize, Serialize, PartialEq, Debug)]
        struct ModelParams {
            index: usize,
        }

        let params = Params::from_serializable(&ModelParams { index: 3 }).unwrap();
        assert_eq!(params.get("index"), Some(&json!(3)));
        assert_eq!(params.decode::<ModelParams>().unwrap(), ModelParams { index: 3 });
    }

    #[test]
    fn payload_downcast() {
        let payload = Payload::new(vec![1u32, 2, 3]);
        assert!(payload.is::<Vec<u32>>());
        assert_eq!(payload.downcast_ref::<Vec<u32>>().map(Vec::len), Some(3));
        assert!(payload.downcast_ref::<String>().is_none());
        assert!(payload.ptr_eq(&payload.clone()));
    }

    #[test]
    fn transformer_kind_equality_ignores_ownership() {
        assert_eq!(TransformerKind::from_static("model"), TransformerKind::new("model"));
        assert_eq!(TransformerKind::ROOT.as_str(), "root");
    }

    #[test]
    fn only_terminal_lifecycles_are_settled() {
        assert!(Lifecycle::Ok.is_settled());
        assert!(Lifecycle::Errored.is_settled());
        assert!(!Lifecycle::Pending.is_settled());
        assert!(!Lifecycle::Applying.is_settled());
    }
}
