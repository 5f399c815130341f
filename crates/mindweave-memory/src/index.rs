//! Per-agent semantic index over an ephemeral LRU store, optionally backed
//! by a persistent vector store.
//!
//! - `ephemeral`: cache only.
//! - `persistent`: every write goes to the persistent store first and is
//!   awaited; the ephemeral store acts as a read cache keyed by record id.
//! - `dual`: writes land in the cache and are mirrored to the persistent
//!   store on a spawned task. Mirror failures are logged and emitted, never
//!   returned. Recall falls back to the persistent store when the cache
//!   yields fewer hits than requested.
//!
//! Every operation on one index is serialized through a single async mutex.

use crate::embedding::EmbeddingDriver;
use crate::ephemeral::EphemeralStore;
use crate::events::{EventSink, NoopSink};
use crate::similarity::{cosine_similarity, record_id};
use crate::vector_store::PersistentVectorStore;
use chrono::Utc;
use mindweave_types::agent::AgentId;
use mindweave_types::config::IndexSettings;
use mindweave_types::error::{MindweaveError, MindweaveResult};
use mindweave_types::event::{MemoryEvent, MemoryEventPayload};
use mindweave_types::index::{
    BackendMode, EntryId, EntryMetadata, IndexEntry, IndexOptions, IndexStats, PersistentRecord,
    RecallHit, RecallOptions, RecallQuery, RecallSource, ScoredRecord, SyncOptions, SyncReport,
    VectorSearchOptions, VectorWrite, WarmOptions,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct IndexState {
    store: EphemeralStore,
    /// Entries whose content is known to be in the persistent store.
    confirmed: HashSet<EntryId>,
    /// Entries with a mirror write in flight.
    in_flight: HashSet<EntryId>,
    /// In-flight entries deleted before their write landed.
    tombstones: HashSet<EntryId>,
    /// Record ids of dual-mode entries no longer cached, so they stay
    /// deletable after eviction or `clear`.
    uncached_records: HashMap<EntryId, EntryId>,
}

impl IndexState {
    fn mark_deleted(&mut self, id: &EntryId) {
        self.confirmed.remove(id);
        self.uncached_records.remove(id);
        if self.in_flight.contains(id) {
            self.tombstones.insert(id.clone());
        }
    }
}

/// A semantic index for one agent.
pub struct SemanticIndex {
    agent_id: AgentId,
    settings: IndexSettings,
    embedder: Arc<dyn EmbeddingDriver>,
    persistent: Option<Arc<dyn PersistentVectorStore>>,
    events: Arc<dyn EventSink>,
    state: Arc<Mutex<IndexState>>,
}

impl SemanticIndex {
    /// Create an index. Persistent and dual modes need a persistent store.
    pub fn new(
        agent_id: impl Into<AgentId>,
        settings: IndexSettings,
        embedder: Arc<dyn EmbeddingDriver>,
        persistent: Option<Arc<dyn PersistentVectorStore>>,
    ) -> MindweaveResult<Self> {
        settings.validate()?;
        if settings.backend.has_persistent() && persistent.is_none() {
            return Err(MindweaveError::InvalidInput(format!(
                "backend '{}' requires a persistent vector store",
                settings.backend
            )));
        }
        let persistent = if settings.backend.has_persistent() {
            persistent
        } else {
            None
        };
        Ok(Self {
            agent_id: agent_id.into(),
            state: Arc::new(Mutex::new(IndexState {
                store: EphemeralStore::new(settings.max_entries),
                confirmed: HashSet::new(),
                in_flight: HashSet::new(),
                tombstones: HashSet::new(),
                uncached_records: HashMap::new(),
            })),
            settings,
            embedder,
            persistent,
            events: Arc::new(NoopSink),
        })
    }

    /// Emit index events to this sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Owning agent.
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Backend mode.
    pub fn backend(&self) -> BackendMode {
        self.settings.backend
    }

    fn emit(&self, payload: MemoryEventPayload) {
        self.events
            .emit(MemoryEvent::new(self.agent_id.clone(), payload));
    }

    fn persist_failed(&self, operation: &str, error: &MindweaveError) {
        warn!(agent = %self.agent_id, operation, error = %error, "Persistent store operation failed");
        self.emit(MemoryEventPayload::PersistFailed {
            operation: operation.to_string(),
            error: error.to_string(),
        });
    }

    fn persistent_store(&self, operation: &str) -> MindweaveResult<&Arc<dyn PersistentVectorStore>> {
        self.persistent
            .as_ref()
            .ok_or_else(|| MindweaveError::backend_mismatch(operation, self.settings.backend))
    }

    fn insert_cached(&self, state: &mut IndexState, entry: IndexEntry) {
        for evicted in state.store.insert(entry) {
            state.confirmed.remove(&evicted.id);
            if self.settings.backend == BackendMode::Dual {
                state.uncached_records.insert(
                    evicted.id.clone(),
                    record_id(&self.agent_id, &evicted.content),
                );
            }
            debug!(agent = %self.agent_id, entry_id = %evicted.id, "Evicted entry from cache");
            self.emit(MemoryEventPayload::EntryEvicted {
                entry_id: evicted.id,
            });
        }
    }

    /// Index content and return its entry id.
    pub async fn index(
        &self,
        content: &str,
        metadata: EntryMetadata,
        options: IndexOptions,
    ) -> MindweaveResult<EntryId> {
        if content.trim().is_empty() {
            return Err(MindweaveError::InvalidInput(
                "content is required".to_string(),
            ));
        }
        let backend = self.settings.backend;
        let embedding = match options.embedding {
            Some(e) => Some(e),
            None if options.defer_embedding && backend != BackendMode::Persistent => None,
            None => Some(self.embedder.embed_one(content).await?),
        };

        let now = Utc::now();
        let mut state = self.state.lock().await;

        let id = if backend == BackendMode::Persistent {
            let store = self.persistent_store("index")?;
            let vector = embedding.as_deref().unwrap_or_default();
            store
                .store(&self.agent_id, content, vector, &metadata)
                .await?
        } else {
            EntryId::generate()
        };

        self.insert_cached(
            &mut state,
            IndexEntry {
                id: id.clone(),
                content: content.to_string(),
                metadata: metadata.clone(),
                embedding: embedding.clone(),
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
            },
        );

        if backend == BackendMode::Persistent {
            state.confirmed.insert(id.clone());
        }
        if let (BackendMode::Dual, Some(vector)) = (backend, embedding) {
            state.in_flight.insert(id.clone());
            self.spawn_mirror(id.clone(), content.to_string(), vector, metadata);
        }
        drop(state);

        self.emit(MemoryEventPayload::EntryIndexed {
            entry_id: id.clone(),
            backend,
        });
        Ok(id)
    }

    fn spawn_mirror(&self, id: EntryId, content: String, embedding: Vec<f32>, metadata: EntryMetadata) {
        let Some(store) = self.persistent.clone() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let events = Arc::clone(&self.events);
        let agent_id = self.agent_id.clone();
        tokio::spawn(async move {
            let result = store.store(&agent_id, &content, &embedding, &metadata).await;
            let mut st = state.lock().await;
            let tombstoned = st.tombstones.remove(&id);
            match result {
                Ok(record) if tombstoned => {
                    if let Err(e) = store.delete(&agent_id, &record).await {
                        warn!(agent = %agent_id, error = %e, "Failed to remove record of deleted entry");
                    }
                }
                Ok(_) => {
                    if st.store.contains(&id) {
                        st.confirmed.insert(id.clone());
                    }
                }
                Err(e) => {
                    warn!(agent = %agent_id, entry_id = %id, error = %e, "Mirror write failed");
                    events.emit(MemoryEvent::new(
                        agent_id.clone(),
                        MemoryEventPayload::PersistFailed {
                            operation: "index".to_string(),
                            error: e.to_string(),
                        },
                    ));
                }
            }
            st.in_flight.remove(&id);
        });
    }

    /// Most similar entries to a query, best first.
    pub async fn recall(
        &self,
        query: impl Into<RecallQuery>,
        options: &RecallOptions,
    ) -> MindweaveResult<Vec<RecallHit>> {
        let threshold = options.threshold.unwrap_or(self.settings.default_threshold);
        let limit = options.limit.unwrap_or(self.settings.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = match query.into() {
            RecallQuery::Embedding(e) => e,
            RecallQuery::Text(text) => {
                if text.trim().is_empty() {
                    return Err(MindweaveError::InvalidInput(
                        "query text is required".to_string(),
                    ));
                }
                self.embedder.embed_one(&text).await?
            }
        };
        let search = VectorSearchOptions {
            threshold,
            type_filter: options.type_filter.clone(),
            limit,
        };

        let mut state = self.state.lock().await;
        let now = Utc::now();

        if self.settings.backend == BackendMode::Persistent {
            let store = self.persistent_store("recall")?;
            let records = store.search(&self.agent_id, &query, &search).await?;
            let mut hits = Vec::new();
            for scored in records {
                if !options.accepts(scored.record.memory_type.as_ref()) {
                    continue;
                }
                let mut entry = entry_from_record(&scored.record);
                if let Some(cached) = state.store.peek(&entry.id) {
                    entry.created_at = cached.created_at;
                    entry.access_count = cached.access_count;
                }
                let id = entry.id.clone();
                self.insert_cached(&mut state, entry);
                state.store.touch(&id, now);
                state.confirmed.insert(id);
                hits.push(hit_from_record(scored));
            }
            hits.truncate(limit);
            self.emit(MemoryEventPayload::RecallCompleted {
                hits: hits.len(),
                used_persistent: true,
            });
            return Ok(hits);
        }

        self.fill_deferred_embeddings(&mut state).await?;

        let mut hits: Vec<RecallHit> = state
            .store
            .entries()
            .filter(|e| options.accepts(e.metadata.memory_type.as_ref()))
            .filter_map(|e| {
                let emb = e.embedding.as_deref()?;
                let similarity = cosine_similarity(&query, emb);
                (similarity >= threshold).then(|| RecallHit {
                    id: e.id.clone(),
                    content: e.content.clone(),
                    metadata: e.metadata.clone(),
                    similarity,
                    source: RecallSource::Ephemeral,
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        for hit in &hits {
            state.store.touch(&hit.id, now);
        }

        let mut used_persistent = false;
        if self.settings.backend == BackendMode::Dual && hits.len() < limit {
            let store = self.persistent_store("recall")?;
            match store.search(&self.agent_id, &query, &search).await {
                Ok(records) => {
                    used_persistent = true;
                    let seen: HashSet<String> = hits.iter().map(|h| h.content.clone()).collect();
                    hits.extend(
                        records
                            .into_iter()
                            .filter(|s| options.accepts(s.record.memory_type.as_ref()))
                            .filter(|s| !seen.contains(&s.record.content))
                            .map(hit_from_record),
                    );
                    sort_hits(&mut hits);
                    hits.truncate(limit);
                }
                Err(e) => self.persist_failed("recall", &e),
            }
        }
        drop(state);

        debug!(agent = %self.agent_id, hits = hits.len(), used_persistent, "Recall complete");
        self.emit(MemoryEventPayload::RecallCompleted {
            hits: hits.len(),
            used_persistent,
        });
        Ok(hits)
    }

    async fn fill_deferred_embeddings(&self, state: &mut IndexState) -> MindweaveResult<()> {
        let missing: Vec<(EntryId, String)> = state
            .store
            .entries()
            .filter(|e| e.embedding.is_none())
            .map(|e| (e.id.clone(), e.content.clone()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let texts: Vec<&str> = missing.iter().map(|(_, c)| c.as_str()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        for ((id, _), vector) in missing.iter().zip(vectors) {
            if let Some(entry) = state.store.peek_mut(id) {
                entry.embedding = Some(vector);
            }
        }
        debug!(agent = %self.agent_id, count = missing.len(), "Computed deferred embeddings");
        Ok(())
    }

    /// Fetch an entry, recording an access.
    ///
    /// Persistent and dual indexes fall back to the persistent store on a
    /// cache miss and cache what they find.
    pub async fn get(&self, id: &EntryId) -> MindweaveResult<IndexEntry> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some(entry) = state.store.touch(id, now) {
            return Ok(entry.clone());
        }

        let not_found = || MindweaveError::NotFound(format!("index entry {id}"));
        let Some(store) = self.persistent.as_ref() else {
            return Err(not_found());
        };
        let record = match store.get(&self.agent_id, id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(not_found()),
            Err(e) if self.settings.backend == BackendMode::Dual => {
                self.persist_failed("get", &e);
                return Err(not_found());
            }
            Err(e) => return Err(e),
        };

        self.insert_cached(&mut state, entry_from_record(&record));
        state.confirmed.insert(record.id.clone());
        state.store.touch(&record.id, now).cloned().ok_or_else(not_found)
    }

    /// Remove an entry. Persistent and dual indexes also delete the
    /// persistent record for the entry's content, including entries that
    /// were already evicted from the cache.
    pub async fn delete(&self, id: &EntryId) -> MindweaveResult<()> {
        let mut state = self.state.lock().await;
        let removed = state.store.remove(id);
        let uncached = state.uncached_records.get(id).cloned();
        state.mark_deleted(id);

        match self.settings.backend {
            BackendMode::Ephemeral => {
                removed.ok_or_else(|| MindweaveError::NotFound(format!("index entry {id}")))?;
                Ok(())
            }
            BackendMode::Persistent => {
                let store = self.persistent_store("delete")?;
                let existed = store.delete(&self.agent_id, id).await?;
                if removed.is_none() && !existed {
                    return Err(MindweaveError::NotFound(format!("index entry {id}")));
                }
                Ok(())
            }
            BackendMode::Dual => {
                let store = self.persistent_store("delete")?;
                let known = match removed {
                    Some(ref entry) => Some(record_id(&self.agent_id, &entry.content)),
                    None => uncached,
                };
                // Unknown ids may still name a record directly (warmed entries).
                let target = known.clone().unwrap_or_else(|| id.clone());
                match store.delete(&self.agent_id, &target).await {
                    Ok(existed) if known.is_none() && !existed => {
                        Err(MindweaveError::NotFound(format!("index entry {id}")))
                    }
                    Ok(_) => Ok(()),
                    Err(e) => {
                        self.persist_failed("delete", &e);
                        known
                            .map(|_| ())
                            .ok_or_else(|| MindweaveError::NotFound(format!("index entry {id}")))
                    }
                }
            }
        }
    }

    /// Empty the ephemeral store. Persistent records are untouched.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let cleared: Vec<(EntryId, String)> = state
            .store
            .entries()
            .map(|e| (e.id.clone(), e.content.clone()))
            .collect();
        state.store.clear();
        for (id, content) in &cleared {
            state.confirmed.remove(id);
            if self.settings.backend == BackendMode::Dual {
                state
                    .uncached_records
                    .insert(id.clone(), record_id(&self.agent_id, content));
            }
        }
        info!(agent = %self.agent_id, cleared = cleared.len(), "Cleared semantic index cache");
    }

    /// Load the most recent persistent records into the cache. Returns the
    /// number of loaded entries still cached when warming finishes.
    ///
    /// Warmed entries count as accessed at load time, so they displace
    /// stale cache entries rather than each other.
    pub async fn warm_cache(&self, options: WarmOptions) -> MindweaveResult<usize> {
        let store = self.persistent_store("warm_cache")?;
        let capacity = self.settings.max_entries;
        let limit = options.limit.unwrap_or(capacity).min(capacity);
        let records = store.list_recent(&self.agent_id, limit).await?;

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut inserted = Vec::new();
        for record in records.iter().rev() {
            let dup = state.store.contains(&record.id)
                || state.store.holds_content(&record.content, &record.id);
            if dup {
                continue;
            }
            let mut entry = entry_from_record(record);
            entry.last_accessed_at = now;
            self.insert_cached(&mut state, entry);
            state.confirmed.insert(record.id.clone());
            state.uncached_records.remove(&record.id);
            inserted.push(record.id.clone());
        }
        let loaded = inserted.iter().filter(|id| state.store.contains(id)).count();
        info!(agent = %self.agent_id, loaded, "Warmed semantic index cache");
        Ok(loaded)
    }

    /// Write every entry not yet confirmed in the persistent store, in
    /// batches. Dual mode only.
    pub async fn sync_to_persistent(&self, options: SyncOptions) -> MindweaveResult<SyncReport> {
        if self.settings.backend != BackendMode::Dual {
            return Err(MindweaveError::backend_mismatch(
                "sync_to_persistent",
                self.settings.backend,
            ));
        }
        if options.batch_size == 0 {
            return Err(MindweaveError::InvalidInput(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        let store = self.persistent_store("sync_to_persistent")?;

        let mut state = self.state.lock().await;
        self.fill_deferred_embeddings(&mut state).await?;

        let pending: Vec<(EntryId, VectorWrite)> = state
            .store
            .entries()
            .filter(|e| !state.confirmed.contains(&e.id))
            .filter_map(|e| {
                Some((
                    e.id.clone(),
                    VectorWrite {
                        content: e.content.clone(),
                        embedding: e.embedding.clone()?,
                        metadata: e.metadata.clone(),
                    },
                ))
            })
            .collect();

        let mut report = SyncReport {
            attempted: pending.len() as u64,
            ..Default::default()
        };
        for chunk in pending.chunks(options.batch_size) {
            let writes: Vec<VectorWrite> = chunk.iter().map(|(_, w)| w.clone()).collect();
            match store.store_batch(&self.agent_id, &writes).await {
                Ok(_) => {
                    report.stored += chunk.len() as u64;
                    for (id, _) in chunk {
                        state.confirmed.insert(id.clone());
                    }
                }
                Err(e) => {
                    report.failed_batches += 1;
                    self.persist_failed("sync_to_persistent", &e);
                }
            }
        }
        info!(
            agent = %self.agent_id,
            attempted = report.attempted,
            stored = report.stored,
            failed_batches = report.failed_batches,
            "Synced semantic index to persistent store"
        );
        Ok(report)
    }

    /// Snapshot of the index state.
    pub async fn stats(&self) -> IndexStats {
        let state = self.state.lock().await;
        let pending_persist = if self.settings.backend == BackendMode::Dual {
            state
                .store
                .entries()
                .filter(|e| !state.confirmed.contains(&e.id))
                .count()
        } else {
            0
        };
        IndexStats {
            agent_id: self.agent_id.clone(),
            entry_count: state.store.len(),
            max_entries: self.settings.max_entries,
            default_threshold: self.settings.default_threshold,
            backend: self.settings.backend,
            pending_persist,
        }
    }
}

fn entry_from_record(record: &PersistentRecord) -> IndexEntry {
    IndexEntry {
        id: record.id.clone(),
        content: record.content.clone(),
        metadata: record.entry_metadata(),
        embedding: Some(record.embedding.clone()),
        created_at: record.indexed_at,
        last_accessed_at: record.indexed_at,
        access_count: 0,
    }
}

fn hit_from_record(scored: ScoredRecord) -> RecallHit {
    RecallHit {
        metadata: scored.record.entry_metadata(),
        id: scored.record.id,
        content: scored.record.content,
        similarity: scored.similarity,
        source: RecallSource::Persistent,
    }
}

fn sort_hits(hits: &mut [RecallHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, HashEmbeddingDriver};
    use crate::events::MemoryEventBus;
    use crate::vector_store::SqliteVectorStore;
    use async_trait::async_trait;
    use mindweave_types::index::VectorStoreStats;
    use mindweave_types::memory::NodeType;
    use std::time::Duration;

    fn settings(backend: BackendMode, max_entries: usize) -> IndexSettings {
        IndexSettings {
            backend,
            max_entries,
            default_threshold: 0.3,
            default_limit: 10,
        }
    }

    fn embedder() -> Arc<dyn EmbeddingDriver> {
        Arc::new(HashEmbeddingDriver::new(64))
    }

    fn ephemeral(max_entries: usize) -> SemanticIndex {
        SemanticIndex::new(
            "agent-1",
            settings(BackendMode::Ephemeral, max_entries),
            embedder(),
            None,
        )
        .unwrap()
    }

    fn with_store(backend: BackendMode) -> (SemanticIndex, Arc<SqliteVectorStore>) {
        with_store_capacity(backend, 100)
    }

    fn with_store_capacity(
        backend: BackendMode,
        max_entries: usize,
    ) -> (SemanticIndex, Arc<SqliteVectorStore>) {
        let store = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let index = SemanticIndex::new(
            "agent-1",
            settings(backend, max_entries),
            embedder(),
            Some(store.clone()),
        )
        .unwrap();
        (index, store)
    }

    async fn wait_for_mirror(index: &SemanticIndex) {
        for _ in 0..200 {
            if index.state.lock().await.in_flight.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("mirror writes did not finish");
    }

    #[test]
    fn test_persistent_mode_requires_store() {
        let result = SemanticIndex::new(
            "agent-1",
            settings(BackendMode::Dual, 10),
            embedder(),
            None,
        );
        assert!(matches!(result, Err(MindweaveError::InvalidInput(_))));
        let zero = SemanticIndex::new(
            "agent-1",
            settings(BackendMode::Ephemeral, 0),
            embedder(),
            None,
        );
        assert!(zero.is_err());
    }

    #[tokio::test]
    async fn test_index_rejects_blank_content() {
        let index = ephemeral(10);
        let err = index
            .index("  ", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MindweaveError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_get_counts_accesses() {
        let index = ephemeral(10);
        let id = index
            .index("Hello", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(index.get(&id).await.unwrap().access_count, 1);
        assert_eq!(index.get(&id).await.unwrap().access_count, 2);
        assert!(index.get(&EntryId::from("idx_missing")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_recall_ranks_and_filters() {
        let index = ephemeral(10);
        index
            .index(
                "rust ownership and borrowing",
                EntryMetadata::typed(NodeType::Skill),
                IndexOptions::default(),
            )
            .await
            .unwrap();
        index
            .index(
                "rust ownership rules",
                EntryMetadata::typed(NodeType::Fact),
                IndexOptions::default(),
            )
            .await
            .unwrap();
        index
            .index("banana bread", EntryMetadata::typed(NodeType::Fact), IndexOptions::default())
            .await
            .unwrap();

        let hits = index
            .recall("rust ownership and borrowing", &RecallOptions::default())
            .await
            .unwrap();
        assert_eq!(hits[0].content, "rust ownership and borrowing");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(hits.iter().all(|h| h.source == RecallSource::Ephemeral));

        let facts = index
            .recall(
                "rust ownership and borrowing",
                &RecallOptions {
                    type_filter: Some(NodeType::Fact),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(facts
            .iter()
            .all(|h| h.metadata.memory_type == Some(NodeType::Fact)));
    }

    #[tokio::test]
    async fn test_recall_with_embedding_and_limit() {
        let index = ephemeral(10);
        for (content, v) in [("a", vec![1.0, 0.0]), ("b", vec![0.9, 0.1]), ("c", vec![0.0, 1.0])] {
            index
                .index(content, EntryMetadata::default(), IndexOptions::with_embedding(v))
                .await
                .unwrap();
        }
        let hits = index
            .recall(
                vec![1.0, 0.0],
                &RecallOptions {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "a");
    }

    #[tokio::test]
    async fn test_deferred_embedding_computed_on_recall() {
        let index = ephemeral(10);
        let id = index
            .index(
                "lazy content",
                EntryMetadata::default(),
                IndexOptions {
                    embedding: None,
                    defer_embedding: true,
                },
            )
            .await
            .unwrap();
        assert!(index.get(&id).await.unwrap().embedding.is_none());
        let hits = index
            .recall("lazy content", &RecallOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.get(&id).await.unwrap().embedding.is_some());
    }

    #[tokio::test]
    async fn test_lru_keeps_most_recent() {
        let index = ephemeral(3);
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                index
                    .index(&format!("entry {i}"), EntryMetadata::default(), IndexOptions::default())
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(index.stats().await.entry_count, 3);
        assert!(index.get(&ids[0]).await.is_err());
        assert!(index.get(&ids[1]).await.is_err());
        for id in &ids[2..] {
            assert!(index.get(id).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let index = ephemeral(10);
        let id = index
            .index("temp", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        index.delete(&id).await.unwrap();
        assert!(index.delete(&id).await.unwrap_err().is_not_found());

        index
            .index("kept?", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        index.clear().await;
        assert_eq!(index.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_ephemeral_rejects_persistent_operations() {
        let index = ephemeral(10);
        assert!(matches!(
            index.warm_cache(WarmOptions::default()).await,
            Err(MindweaveError::BackendMismatch { .. })
        ));
        assert!(matches!(
            index.sync_to_persistent(SyncOptions::default()).await,
            Err(MindweaveError::BackendMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_dual_same_content_one_record() {
        let (index, store) = with_store(BackendMode::Dual);
        let agent = AgentId::from("agent-1");
        let a = index
            .index("same content", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        let b = index
            .index("same content", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        assert_ne!(a, b);
        let report = index.sync_to_persistent(SyncOptions::default()).await.unwrap();
        assert_eq!(report.failed_batches, 0);
        assert_eq!(store.count(&agent).await.unwrap(), 1);
        wait_for_mirror(&index).await;
        assert_eq!(store.count(&agent).await.unwrap(), 1);
        assert_eq!(index.stats().await.pending_persist, 0);
    }

    #[tokio::test]
    async fn test_dual_recall_falls_back_to_persistent() {
        let (index, store) = with_store(BackendMode::Dual);
        let agent = AgentId::from("agent-1");
        store
            .store(&agent, "durable fact", &[1.0, 0.0], &EntryMetadata::default())
            .await
            .unwrap();
        index
            .index(
                "cached fact",
                EntryMetadata::default(),
                IndexOptions::with_embedding(vec![0.9, 0.1]),
            )
            .await
            .unwrap();
        wait_for_mirror(&index).await;

        let hits = index.recall(vec![1.0, 0.0], &RecallOptions::default()).await.unwrap();
        let contents: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["durable fact", "cached fact"]);
        assert_eq!(hits[0].source, RecallSource::Persistent);
        assert_eq!(hits[1].source, RecallSource::Ephemeral);
    }

    #[tokio::test]
    async fn test_dual_delete_removes_record() {
        let (index, store) = with_store(BackendMode::Dual);
        let agent = AgentId::from("agent-1");
        let id = index
            .index("forget me", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        index.delete(&id).await.unwrap();
        wait_for_mirror(&index).await;
        assert_eq!(store.count(&agent).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dual_eviction_keeps_mirrored_records() {
        let (index, store) = with_store_capacity(BackendMode::Dual, 1);
        let agent = AgentId::from("agent-1");
        index
            .index("alpha fact", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        index
            .index("beta fact", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        wait_for_mirror(&index).await;
        assert_eq!(index.stats().await.entry_count, 1);
        assert_eq!(store.count(&agent).await.unwrap(), 2);

        let hits = index.recall("alpha fact", &RecallOptions::default()).await.unwrap();
        assert_eq!(hits[0].content, "alpha fact");
        assert_eq!(hits[0].source, RecallSource::Persistent);
    }

    #[tokio::test]
    async fn test_dual_delete_after_eviction() {
        let (index, store) = with_store_capacity(BackendMode::Dual, 1);
        let agent = AgentId::from("agent-1");
        let secret = index
            .index("secret to forget", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        wait_for_mirror(&index).await;
        index
            .index("something else", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        wait_for_mirror(&index).await;
        assert_eq!(store.count(&agent).await.unwrap(), 2);

        index.delete(&secret).await.unwrap();
        assert_eq!(store.count(&agent).await.unwrap(), 1);
        let hits = index
            .recall("secret to forget", &RecallOptions::default())
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.content != "secret to forget"));
        assert!(index.delete(&secret).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_dual_delete_after_clear() {
        let (index, store) = with_store(BackendMode::Dual);
        let agent = AgentId::from("agent-1");
        let id = index
            .index("cleared but stored", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        wait_for_mirror(&index).await;
        index.clear().await;
        index.delete(&id).await.unwrap();
        assert_eq!(store.count(&agent).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_warm_cache_displaces_stale_entries() {
        let (index, store) = with_store_capacity(BackendMode::Dual, 2);
        let agent = AgentId::from("agent-1");
        let first = store
            .store(&agent, "older record", &[1.0, 0.0], &EntryMetadata::default())
            .await
            .unwrap();
        let second = store
            .store(&agent, "newer record", &[0.0, 1.0], &EntryMetadata::default())
            .await
            .unwrap();
        // Deferred, so nothing is mirrored.
        index
            .index(
                "cached before warming",
                EntryMetadata::default(),
                IndexOptions {
                    embedding: None,
                    defer_embedding: true,
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(index.warm_cache(WarmOptions::default()).await.unwrap(), 2);
        assert_eq!(index.stats().await.entry_count, 2);
        let state = index.state.lock().await;
        assert!(state.store.contains(&first));
        assert!(state.store.contains(&second));
    }

    #[tokio::test]
    async fn test_warm_cache_loads_recent_records() {
        let (index, store) = with_store(BackendMode::Dual);
        let agent = AgentId::from("agent-1");
        let record = store
            .store(&agent, "from disk", &[0.5, 0.5], &EntryMetadata::default())
            .await
            .unwrap();
        assert_eq!(index.warm_cache(WarmOptions::default()).await.unwrap(), 1);
        assert_eq!(index.warm_cache(WarmOptions::default()).await.unwrap(), 0);
        let entry = index.get(&record).await.unwrap();
        assert_eq!(entry.content, "from disk");
    }

    #[tokio::test]
    async fn test_get_falls_back_to_persistent() {
        let (index, store) = with_store(BackendMode::Dual);
        let agent = AgentId::from("agent-1");
        let record = store
            .store(&agent, "cold", &[1.0], &EntryMetadata::default())
            .await
            .unwrap();
        let entry = index.get(&record).await.unwrap();
        assert_eq!(entry.access_count, 1);
        assert_eq!(index.get(&record).await.unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn test_persistent_mode_round_trip() {
        let (index, store) = with_store(BackendMode::Persistent);
        let agent = AgentId::from("agent-1");
        let a = index
            .index("written through", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        let b = index
            .index("written through", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count(&agent).await.unwrap(), 1);

        index.clear().await;
        let hits = index
            .recall("written through", &RecallOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, RecallSource::Persistent);

        index.delete(&a).await.unwrap();
        assert_eq!(store.count(&agent).await.unwrap(), 0);
        assert!(index.delete(&a).await.unwrap_err().is_not_found());
        assert!(matches!(
            index.sync_to_persistent(SyncOptions::default()).await,
            Err(MindweaveError::BackendMismatch { .. })
        ));
    }

    struct BrokenStore;

    #[async_trait]
    impl PersistentVectorStore for BrokenStore {
        async fn store(
            &self,
            _agent_id: &AgentId,
            _content: &str,
            _embedding: &[f32],
            _metadata: &EntryMetadata,
        ) -> MindweaveResult<EntryId> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn search(
            &self,
            _agent_id: &AgentId,
            _query: &[f32],
            _options: &VectorSearchOptions,
        ) -> MindweaveResult<Vec<ScoredRecord>> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn delete(&self, _agent_id: &AgentId, _id: &EntryId) -> MindweaveResult<bool> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn delete_all(&self, _agent_id: &AgentId) -> MindweaveResult<u64> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn count(&self, _agent_id: &AgentId) -> MindweaveResult<u64> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn stats(&self, _agent_id: &AgentId) -> MindweaveResult<VectorStoreStats> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn store_batch(
            &self,
            _agent_id: &AgentId,
            _writes: &[VectorWrite],
        ) -> MindweaveResult<Vec<EntryId>> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn get(
            &self,
            _agent_id: &AgentId,
            _id: &EntryId,
        ) -> MindweaveResult<Option<PersistentRecord>> {
            Err(MindweaveError::Storage("offline".into()))
        }
        async fn list_recent(
            &self,
            _agent_id: &AgentId,
            _limit: usize,
        ) -> MindweaveResult<Vec<PersistentRecord>> {
            Err(MindweaveError::Storage("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_dual_degrades_when_store_unavailable() {
        let bus = Arc::new(MemoryEventBus::new());
        let index = SemanticIndex::new(
            "agent-1",
            settings(BackendMode::Dual, 10),
            embedder(),
            Some(Arc::new(BrokenStore)),
        )
        .unwrap()
        .with_events(bus.clone());

        index
            .index("still works", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap();
        wait_for_mirror(&index).await;
        let hits = index.recall("still works", &RecallOptions::default()).await.unwrap();
        assert_eq!(hits.len(), 1);

        let report = index.sync_to_persistent(SyncOptions::default()).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.stored, 0);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(index.stats().await.pending_persist, 1);
        assert!(bus
            .history(20)
            .iter()
            .any(|e| matches!(e.payload, MemoryEventPayload::PersistFailed { .. })));
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingDriver for FailingEmbedder {
        async fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Http("unreachable".into()))
        }
        fn dimensions(&self) -> usize {
            8
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let index = SemanticIndex::new(
            "agent-1",
            settings(BackendMode::Ephemeral, 10),
            Arc::new(FailingEmbedder),
            None,
        )
        .unwrap();
        let err = index
            .index("text", EntryMetadata::default(), IndexOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MindweaveError::Embedding(_)));
        assert!(index
            .index("text", EntryMetadata::default(), IndexOptions::with_embedding(vec![1.0]))
            .await
            .is_ok());
    }
}
