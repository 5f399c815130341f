//! Configuration for the memory substrate, usually loaded from
//! `~/.mindweave/config.toml`.

use crate::consolidation::ConsolidationOptions;
use crate::error::{MindweaveError, MindweaveResult};
use crate::index::BackendMode;
use crate::memory::{check_unit, GraphConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Defaults for new agent graphs.
    pub graph: GraphConfig,
    /// Consolidation pass settings.
    pub consolidation: ConsolidationSettings,
    /// Semantic index settings.
    pub index: IndexSettings,
    /// Embedding driver settings.
    pub embedding: EmbeddingSettings,
    /// Persistent vector store settings.
    pub vector_store: VectorStoreSettings,
}

impl MemoryConfig {
    /// Check every section, reporting the first problem as a `Config` error.
    pub fn validate(&self) -> MindweaveResult<()> {
        self.graph
            .validate()
            .map_err(|e| MindweaveError::Config(format!("[graph] {e}")))?;
        self.consolidation
            .validate()
            .map_err(|e| MindweaveError::Config(format!("[consolidation] {e}")))?;
        self.index
            .validate()
            .map_err(|e| MindweaveError::Config(format!("[index] {e}")))?;
        if self.embedding.dimensions == 0 {
            return Err(MindweaveError::Config(
                "[embedding] dimensions must be greater than zero".to_string(),
            ));
        }
        if self.index.backend.has_persistent() && self.vector_store.path.is_none() {
            tracing::debug!(
                backend = %self.index.backend,
                "No vector_store.path configured, persistent store will be in-memory"
            );
        }
        Ok(())
    }
}

/// Consolidation pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationSettings {
    /// Reinforce nodes accessed within this many hours (`0` disables).
    pub reinforce_window_hours: f64,
    /// Boost applied to recently accessed nodes.
    pub reinforce_boost: f32,
    /// Archive nodes before pruning them.
    pub archive: bool,
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        let options = ConsolidationOptions::default();
        Self {
            reinforce_window_hours: options.reinforce_window_hours,
            reinforce_boost: options.reinforce_boost,
            archive: options.archive,
        }
    }
}

impl ConsolidationSettings {
    /// Turn the settings into options for one pass.
    pub fn to_options(&self) -> ConsolidationOptions {
        ConsolidationOptions {
            reinforce_window_hours: self.reinforce_window_hours,
            reinforce_boost: self.reinforce_boost,
            archive: self.archive,
            now: None,
        }
    }

    fn validate(&self) -> MindweaveResult<()> {
        validate_options(&self.to_options())
    }
}

/// Check consolidation option ranges.
pub fn validate_options(options: &ConsolidationOptions) -> MindweaveResult<()> {
    if !options.reinforce_window_hours.is_finite() || options.reinforce_window_hours < 0.0 {
        return Err(MindweaveError::InvalidInput(format!(
            "reinforce_window_hours must be a non-negative number, got {}",
            options.reinforce_window_hours
        )));
    }
    check_unit("reinforce_boost", options.reinforce_boost)
}

/// Semantic index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Backend mode.
    pub backend: BackendMode,
    /// Ephemeral store capacity.
    pub max_entries: usize,
    /// Default minimum similarity for recall.
    pub default_threshold: f32,
    /// Default maximum recall results.
    pub default_limit: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: BackendMode::Ephemeral,
            max_entries: 10_000,
            default_threshold: 0.3,
            default_limit: 10,
        }
    }
}

impl IndexSettings {
    /// Check value ranges.
    pub fn validate(&self) -> MindweaveResult<()> {
        if self.max_entries == 0 {
            return Err(MindweaveError::InvalidInput(
                "max_entries must be greater than zero".to_string(),
            ));
        }
        if self.default_limit == 0 {
            return Err(MindweaveError::InvalidInput(
                "default_limit must be greater than zero".to_string(),
            ));
        }
        if !self.default_threshold.is_finite() || !(-1.0..=1.0).contains(&self.default_threshold)
        {
            return Err(MindweaveError::InvalidInput(format!(
                "default_threshold must be within [-1.0, 1.0], got {}",
                self.default_threshold
            )));
        }
        Ok(())
    }
}

/// Embedding driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `"local"` for the built-in hashing driver, otherwise an
    /// OpenAI-compatible provider name (openai, ollama, groq, ...).
    pub provider: String,
    /// Model name for remote providers.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Vector dimensions of the local driver.
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: String::new(),
            api_key_env: String::new(),
            dimensions: 256,
        }
    }
}

/// Persistent vector store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    /// SQLite database path; in-memory when unset.
    pub path: Option<PathBuf>,
}
