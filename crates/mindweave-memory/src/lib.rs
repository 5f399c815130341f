//! Memory substrate for Mindweave agents.
//!
//! Two cooperating subsystems:
//! - **Graph store**: an immutable, per-agent knowledge graph of typed nodes
//!   and relation edges, with relevance scoring, deduplication and per-type
//!   quotas. Periodic consolidation decays, reinforces, archives and prunes.
//! - **Semantic index**: a per-agent embedding cache with LRU eviction,
//!   optionally backed by a durable SQLite vector store (persistent or dual
//!   mode).
//!
//! Changes are announced through an `EventSink`, by default the in-process
//! `MemoryEventBus`.

pub mod archive;
pub mod config;
pub mod consolidation;
pub mod dedup;
pub mod embedding;
pub mod ephemeral;
pub mod events;
pub mod graph;
pub mod index;
pub mod migration;
pub mod query;
pub mod quota;
pub mod registry;
pub mod similarity;
pub mod store;
pub mod vector_store;

pub use archive::{ArchiveSink, MemoryArchive, SqliteArchive};
pub use consolidation::ConsolidationEngine;
pub use embedding::{create_embedding_driver, EmbeddingDriver, HashEmbeddingDriver};
pub use events::{EventSink, MemoryEventBus, NoopSink};
pub use graph::Graph;
pub use index::SemanticIndex;
pub use registry::IndexRegistry;
pub use store::GraphStore;
pub use vector_store::{PersistentVectorStore, SqliteVectorStore};
