//! Semantic index and persistent vector store types.

use crate::agent::AgentId;
use crate::memory::NodeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of an entry in a semantic index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    /// Generate a fresh entry id.
    pub fn generate() -> Self {
        Self(format!("idx_{}", Uuid::new_v4().simple()))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Metadata attached to indexed content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Kind of memory, used by recall type filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<NodeType>,
    /// Producer of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Extension data.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EntryMetadata {
    /// Metadata carrying only a memory type.
    pub fn typed(memory_type: NodeType) -> Self {
        Self {
            memory_type: Some(memory_type),
            ..Default::default()
        }
    }
}

/// An entry in the ephemeral store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Entry id.
    pub id: EntryId,
    /// Indexed content.
    pub content: String,
    /// Metadata.
    pub metadata: EntryMetadata,
    /// Embedding, `None` until computed.
    pub embedding: Option<Vec<f32>>,
    /// When the entry was indexed.
    pub created_at: DateTime<Utc>,
    /// When the entry was last read.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of reads.
    pub access_count: u64,
}

/// Which stores back a semantic index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// In-process cache only.
    #[default]
    Ephemeral,
    /// Persistent store only, with a read cache.
    Persistent,
    /// Cache plus an asynchronously mirrored persistent store.
    Dual,
}

impl BackendMode {
    /// Whether a persistent store is part of this mode.
    pub fn has_persistent(&self) -> bool {
        !matches!(self, BackendMode::Ephemeral)
    }
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendMode::Ephemeral => write!(f, "ephemeral"),
            BackendMode::Persistent => write!(f, "persistent"),
            BackendMode::Dual => write!(f, "dual"),
        }
    }
}

/// Options for `index`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Precomputed embedding.
    pub embedding: Option<Vec<f32>>,
    /// Store without an embedding and compute it on first recall.
    pub defer_embedding: bool,
}

impl IndexOptions {
    /// Options with a precomputed embedding.
    pub fn with_embedding(embedding: Vec<f32>) -> Self {
        Self {
            embedding: Some(embedding),
            defer_embedding: false,
        }
    }
}

/// A recall query: text to embed, or an embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum RecallQuery {
    /// Free text.
    Text(String),
    /// A precomputed query embedding.
    Embedding(Vec<f32>),
}

impl From<&str> for RecallQuery {
    fn from(s: &str) -> Self {
        RecallQuery::Text(s.to_string())
    }
}

impl From<String> for RecallQuery {
    fn from(s: String) -> Self {
        RecallQuery::Text(s)
    }
}

impl From<Vec<f32>> for RecallQuery {
    fn from(v: Vec<f32>) -> Self {
        RecallQuery::Embedding(v)
    }
}

/// Options for `recall`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecallOptions {
    /// Only entries of this type.
    pub type_filter: Option<NodeType>,
    /// Only entries whose type is in this list (ignored when empty).
    pub types: Vec<NodeType>,
    /// Minimum similarity; the index default applies when `None`.
    pub threshold: Option<f32>,
    /// Maximum results; the index default applies when `None`.
    pub limit: Option<usize>,
}

impl RecallOptions {
    /// Whether an entry of the given type passes the type filters.
    pub fn accepts(&self, memory_type: Option<&NodeType>) -> bool {
        if let Some(ref wanted) = self.type_filter {
            if memory_type != Some(wanted) {
                return false;
            }
        }
        if !self.types.is_empty() {
            match memory_type {
                Some(t) => self.types.contains(t),
                None => false,
            }
        } else {
            true
        }
    }
}

/// Which backend answered a recall hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallSource {
    /// The ephemeral cache.
    Ephemeral,
    /// The persistent vector store.
    Persistent,
}

/// One recall result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallHit {
    /// Entry or record id.
    pub id: EntryId,
    /// Content.
    pub content: String,
    /// Metadata.
    pub metadata: EntryMetadata,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Backend that produced the hit.
    pub source: RecallSource,
}

/// Options for `warm_cache`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmOptions {
    /// Maximum records to load; the cache capacity applies when `None`.
    pub limit: Option<usize>,
}

/// Options for `sync_to_persistent`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Entries written per `store_batch` call.
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Result of `sync_to_persistent`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entries that were not yet confirmed persisted.
    pub attempted: u64,
    /// Entries written by this sync.
    pub stored: u64,
    /// Batches that failed.
    pub failed_batches: u64,
}

/// Snapshot of an index's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Owning agent.
    pub agent_id: AgentId,
    /// Entries in the ephemeral store.
    pub entry_count: usize,
    /// Ephemeral capacity.
    pub max_entries: usize,
    /// Default recall threshold.
    pub default_threshold: f32,
    /// Backend mode.
    pub backend: BackendMode,
    /// Entries not yet confirmed in the persistent store (dual mode).
    pub pending_persist: usize,
}

/// A durable record in the persistent vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentRecord {
    /// Record id, stable across upserts of the same content.
    pub id: EntryId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Hex SHA-256 of `content`.
    pub content_hash: String,
    /// Raw content.
    pub content: String,
    /// Embedding.
    pub embedding: Vec<f32>,
    /// Kind of memory.
    pub memory_type: Option<NodeType>,
    /// Producer.
    pub source: Option<String>,
    /// Extension data.
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the record was last written.
    pub indexed_at: DateTime<Utc>,
}

impl PersistentRecord {
    /// Metadata view used by index entries and recall hits.
    pub fn entry_metadata(&self) -> EntryMetadata {
        EntryMetadata {
            memory_type: self.memory_type.clone(),
            source: self.source.clone(),
            extra: self.metadata.clone(),
        }
    }
}

/// Input to `store_batch`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorWrite {
    /// Raw content.
    pub content: String,
    /// Embedding.
    pub embedding: Vec<f32>,
    /// Metadata.
    pub metadata: EntryMetadata,
}

/// Options for persistent similarity search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorSearchOptions {
    /// Minimum similarity.
    pub threshold: f32,
    /// Restrict to one memory type.
    pub type_filter: Option<NodeType>,
    /// Maximum results.
    pub limit: usize,
}

/// A scored persistent record.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// The record.
    pub record: PersistentRecord,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

/// Per-agent statistics of the persistent store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreStats {
    /// Total records.
    pub total: u64,
    /// Records per memory type (`"untyped"` for records without one).
    pub by_type: HashMap<String, u64>,
    /// Oldest `indexed_at`.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest `indexed_at`.
    pub newest: Option<DateTime<Utc>>,
}
