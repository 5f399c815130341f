//! One semantic index per agent.

use crate::embedding::{create_embedding_driver, EmbeddingDriver};
use crate::events::{EventSink, NoopSink};
use crate::index::SemanticIndex;
use crate::vector_store::{PersistentVectorStore, SqliteVectorStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mindweave_types::agent::AgentId;
use mindweave_types::config::{IndexSettings, MemoryConfig};
use mindweave_types::error::{MindweaveError, MindweaveResult};
use std::sync::Arc;
use tracing::info;

/// Concurrent map of agent to semantic index. Indexes are created lazily
/// with shared settings, embedder and persistent store.
pub struct IndexRegistry {
    settings: IndexSettings,
    embedder: Arc<dyn EmbeddingDriver>,
    persistent: Option<Arc<dyn PersistentVectorStore>>,
    events: Arc<dyn EventSink>,
    indexes: DashMap<AgentId, Arc<SemanticIndex>>,
}

impl IndexRegistry {
    pub fn new(
        settings: IndexSettings,
        embedder: Arc<dyn EmbeddingDriver>,
        persistent: Option<Arc<dyn PersistentVectorStore>>,
    ) -> MindweaveResult<Self> {
        settings.validate()?;
        if settings.backend.has_persistent() && persistent.is_none() {
            return Err(MindweaveError::Config(format!(
                "[index] backend '{}' requires [vector_store] path",
                settings.backend
            )));
        }
        Ok(Self {
            settings,
            embedder,
            persistent,
            events: Arc::new(NoopSink),
            indexes: DashMap::new(),
        })
    }

    /// Build a registry from configuration: embedding driver from
    /// `[embedding]`, SQLite store from `[vector_store]` when the backend
    /// needs one (in-memory when no path is set).
    pub fn from_config(config: &MemoryConfig) -> MindweaveResult<Self> {
        config.validate()?;
        let embedder = create_embedding_driver(&config.embedding)?;
        let persistent: Option<Arc<dyn PersistentVectorStore>> =
            match (&config.vector_store.path, config.index.backend.has_persistent()) {
                (_, false) => None,
                (Some(path), true) => Some(Arc::new(SqliteVectorStore::open(path)?)),
                (None, true) => Some(Arc::new(SqliteVectorStore::open_in_memory()?)),
            };
        Self::new(config.index.clone(), embedder, persistent)
    }

    /// Attach an event sink to every index created from now on.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The agent's index, created on first use.
    pub fn get_or_create(&self, agent_id: &AgentId) -> MindweaveResult<Arc<SemanticIndex>> {
        match self.indexes.entry(agent_id.clone()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let index = SemanticIndex::new(
                    agent_id.clone(),
                    self.settings.clone(),
                    Arc::clone(&self.embedder),
                    self.persistent.clone(),
                )?
                .with_events(Arc::clone(&self.events));
                let index = Arc::new(index);
                e.insert(Arc::clone(&index));
                info!(agent = %agent_id, backend = %self.settings.backend, "Created semantic index");
                Ok(index)
            }
        }
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<SemanticIndex>> {
        self.indexes.get(agent_id).map(|r| Arc::clone(r.value()))
    }

    /// Drop the agent's index. Persistent records are kept.
    pub fn remove(&self, agent_id: &AgentId) -> Option<Arc<SemanticIndex>> {
        self.indexes.remove(agent_id).map(|(_, index)| index)
    }

    /// Agents with an index, sorted.
    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.indexes.iter().map(|r| r.key().clone()).collect();
        agents.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        agents
    }
}
