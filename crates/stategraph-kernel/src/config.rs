use crate::types::TransformerKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kernel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Kind recorded on the root node
    pub root_kind: TransformerKind,
    /// Upper bound for a single production step, in milliseconds
    pub production_timeout_ms: Option<u64>,
    /// Number of commit records kept in the journal
    pub journal_capacity: usize,
}

impl KernelConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_root_kind(mut self, kind: impl Into<TransformerKind>) -> Self {
        self.root_kind = kind.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_production_timeout(mut self, timeout: Duration) -> Self {
        self.production_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }

    pub fn production_timeout(&self) -> Option<Duration> {
        self.production_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root_kind: TransformerKind::ROOT,
            production_timeout_ms: None,
            journal_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.root_kind, TransformerKind::ROOT);
        assert_eq!(config.production_timeout(), None);
        assert_eq!(config.journal_capacity, 256);
    }

    #[test]
    fn fluent_setters() {
        let config = KernelConfig::new()
            .with_production_timeout(Duration::from_secs(2))
            .with_journal_capacity(8)
            .with_root_kind("session");

        assert_eq!(config.production_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.journal_capacity, 8);
        assert_eq!(config.root_kind.as_str(), "session");
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: KernelConfig =
            serde_json::from_str(r#"{ "production_timeout_ms": 500 }"#).unwrap();
        assert_eq!(config.production_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.journal_capacity, 256);
    }
}
