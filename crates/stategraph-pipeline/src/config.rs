use serde::{Deserialize, Serialize};
use stategraph_kernel::{CommitPolicy, KernelConfig};
use std::path::{Path, PathBuf};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Policy knobs of the structure pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Policy of the component upsert; partial keeps sibling components
    pub component_policy: CommitPolicy,
    /// Policy of auxiliary property attachment
    pub property_policy: CommitPolicy,
    /// Prefix of the tag key that addresses a component under its structure
    pub component_tag_prefix: String,
    /// Create a unit-cell child for models with symmetry
    pub create_unit_cells: bool,
}

impl PipelineConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_component_policy(mut self, policy: CommitPolicy) -> Self {
        self.component_policy = policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_property_policy(mut self, policy: CommitPolicy) -> Self {
        self.property_policy = policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_unit_cells(mut self, enabled: bool) -> Self {
        self.create_unit_cells = enabled;
        self
    }

    /// Tag key addressing component `key`.
    pub fn component_tag(&self, key: &str) -> String {
        format!("{}{key}", self.component_tag_prefix)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            component_policy: CommitPolicy::PARTIAL,
            property_policy: CommitPolicy::PARTIAL,
            component_tag_prefix: "structure-component-".to_string(),
            create_unit_cells: true,
        }
    }
}

/// Top-level configuration file layout:
///
/// ```toml
/// [kernel]
/// production_timeout_ms = 30000
///
/// [pipeline]
/// create_unit_cells = false
///
/// [pipeline.component_policy]
/// revert_on_failure = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StategraphConfig {
    pub kernel: KernelConfig,
    pub pipeline: PipelineConfig,
}

impl StategraphConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}
