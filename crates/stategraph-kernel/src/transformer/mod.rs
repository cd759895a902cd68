//! Transformers
//!
//! A transformer is the production function behind a [`TransformerKind`]: it
//! turns the parent's payload and the node's params into the node's payload.
//! Implementations should poll the cancellation token between expensive
//! stages; the commit engine additionally races every production against it.

use crate::error::ProductionError;
use crate::types::{Params, Payload, TransformerKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a production step may look at.
#[derive(Debug, Clone, Copy)]
pub struct ProductionInput<'a> {
    pub parent: &'a Payload,
    pub params: &'a Params,
    pub cancel: &'a CancellationToken,
}

impl ProductionInput<'_> {
    /// `Err(Cancelled)` once the token has fired.
    pub fn checkpoint(&self) -> Result<(), ProductionError> {
        if self.cancel.is_cancelled() {
            Err(ProductionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Production function for one kind of node.
#[async_trait::async_trait]
pub trait Transformer: Send + Sync {
    fn kind(&self) -> TransformerKind;

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError>;
}

/// Adapter turning a synchronous closure into a [`Transformer`].
pub struct FnTransformer<F> {
    kind: TransformerKind,
    f: F,
}

impl<F> FnTransformer<F>
where
    F: Fn(ProductionInput<'_>) -> Result<Payload, ProductionError> + Send + Sync,
{
    pub fn new(kind: impl Into<TransformerKind>, f: F) -> Self {
        Self {
            kind: kind.into(),
            f,
        }
    }
}

#[async_trait::async_trait]
impl<F> Transformer for FnTransformer<F>
where
    F: Fn(ProductionInput<'_>) -> Result<Payload, ProductionError> + Send + Sync,
{
    fn kind(&self) -> TransformerKind {
        self.kind.clone()
    }

    async fn produce(&self, input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
        (self.f)(input)
    }
}

/// Maps transformer kinds to their production functions.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: HashMap<TransformerKind, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transformer under its own kind, replacing any previous one.
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) -> &mut Self {
        self.transformers.insert(transformer.kind(), transformer);
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, transformer: impl Transformer + 'static) -> Self {
        self.register(Arc::new(transformer));
        self
    }

    pub fn get(&self, kind: &TransformerKind) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &TransformerKind) -> bool {
        self.transformers.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &TransformerKind> {
        self.transformers.keys()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Run the production step for `kind`, racing it against cancellation
    /// and the optional timeout.
    pub(crate) async fn produce(
        &self,
        kind: &TransformerKind,
        input: ProductionInput<'_>,
        timeout: Option<Duration>,
    ) -> Result<Payload, ProductionError> {
        let transformer = self
            .get(kind)
            .ok_or_else(|| ProductionError::UnknownTransformer(kind.clone()))?;
        input.checkpoint()?;

        let work = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, transformer.produce(input))
                    .await
                    .map_err(|_| ProductionError::TimedOut(limit))?,
                None => transformer.produce(input).await,
            }
        };

        tokio::select! {
            biased;
            () = input.cancel.cancelled() => Err(ProductionError::Cancelled),
            result = work => result,
        }
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.kinds().map(TransformerKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("TransformerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOUBLE: TransformerKind = TransformerKind::from_static("double");

    struct Stall;

    #[async_trait::async_trait]
    impl Transformer for Stall {
        fn kind(&self) -> TransformerKind {
            TransformerKind::from_static("stall")
        }

        async fn produce(&self, _input: ProductionInput<'_>) -> Result<Payload, ProductionError> {
            std::future::pending().await
        }
    }

    fn registry() -> TransformerRegistry {
        TransformerRegistry::new()
            .with(FnTransformer::new(DOUBLE, |input: ProductionInput<'_>| {
                let parent = input
                    .parent
                    .downcast_ref::<u32>()
                    .ok_or_else(|| ProductionError::failed("parent is not a number"))?;
                Ok(Payload::new(parent * 2))
            }))
            .with(Stall)
    }

    #[tokio::test]
    async fn produces_from_parent_payload() {
        let registry = registry();
        let parent = Payload::new(21u32);
        let params = Params::empty();
        let cancel = CancellationToken::new();
        let input = ProductionInput {
            parent: &parent,
            params: &params,
            cancel: &cancel,
        };

        let payload = registry.produce(&DOUBLE, input, None).await.unwrap();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&42));
    }

    #[tokio::test]
    async fn unknown_kind_fails() {
        let registry = registry();
        let parent = Payload::unit();
        let params = Params::empty();
        let cancel = CancellationToken::new();
        let input = ProductionInput {
            parent: &parent,
            params: &params,
            cancel: &cancel,
        };

        let err = registry
            .produce(&TransformerKind::from_static("missing"), input, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProductionError::UnknownTransformer(_)));
    }

    #[tokio::test]
    async fn stalled_production_times_out() {
        let registry = registry();
        let parent = Payload::unit();
        let params = Params::empty();
        let cancel = CancellationToken::new();
        let input = ProductionInput {
            parent: &parent,
            params: &params,
            cancel: &cancel,
        };

        let limit = Duration::from_millis(20);
        let err = registry
            .produce(&TransformerKind::from_static("stall"), input, Some(limit))
            .await
            .unwrap_err();
        assert_eq!(err, ProductionError::TimedOut(limit));
    }

    #[tokio::test]
    async fn cancellation_interrupts_stalled_production() {
        let registry = registry();
        let parent = Payload::unit();
        let params = Params::empty();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let input = ProductionInput {
            parent: &parent,
            params: &params,
            cancel: &cancel,
        };

        let err = registry
            .produce(&TransformerKind::from_static("stall"), input, None)
            .await
            .unwrap_err();
        assert_eq!(err, ProductionError::Cancelled);
    }
}
