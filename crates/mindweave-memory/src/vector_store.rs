//! Persistent vector store: durable, upsert-by-content-hash records with
//! brute-force cosine search.
//!
//! Records are keyed by `(agent_id, content_hash)`. Embeddings are stored as
//! little-endian f32 BLOBs.

use crate::migration::run_migrations;
use crate::similarity::{content_hash, cosine_similarity, embedding_from_bytes, embedding_to_bytes, record_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindweave_types::agent::AgentId;
use mindweave_types::error::{MindweaveError, MindweaveResult};
use mindweave_types::index::{
    EntryId, EntryMetadata, PersistentRecord, ScoredRecord, VectorSearchOptions, VectorStoreStats,
    VectorWrite,
};
use mindweave_types::memory::NodeType;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Durable store backing persistent and dual semantic indexes.
#[async_trait]
pub trait PersistentVectorStore: Send + Sync {
    /// Insert or update the record for `content`. Returns its id, which is
    /// stable across upserts of the same content.
    async fn store(
        &self,
        agent_id: &AgentId,
        content: &str,
        embedding: &[f32],
        metadata: &EntryMetadata,
    ) -> MindweaveResult<EntryId>;

    /// Records most similar to `query`, best first.
    async fn search(
        &self,
        agent_id: &AgentId,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> MindweaveResult<Vec<ScoredRecord>>;

    /// Delete one record. Returns whether it existed.
    async fn delete(&self, agent_id: &AgentId, id: &EntryId) -> MindweaveResult<bool>;

    /// Delete every record of an agent. Returns the number removed.
    async fn delete_all(&self, agent_id: &AgentId) -> MindweaveResult<u64>;

    /// Number of records of an agent.
    async fn count(&self, agent_id: &AgentId) -> MindweaveResult<u64>;

    /// Per-agent statistics.
    async fn stats(&self, agent_id: &AgentId) -> MindweaveResult<VectorStoreStats>;

    /// Upsert several records in one transaction.
    async fn store_batch(
        &self,
        agent_id: &AgentId,
        writes: &[VectorWrite],
    ) -> MindweaveResult<Vec<EntryId>>;

    /// Fetch one record.
    async fn get(&self, agent_id: &AgentId, id: &EntryId)
        -> MindweaveResult<Option<PersistentRecord>>;

    /// Most recently written records, newest first.
    async fn list_recent(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> MindweaveResult<Vec<PersistentRecord>>;
}

const RECORD_COLUMNS: &str =
    "id, agent_id, content_hash, content, embedding, memory_type, source, metadata, indexed_at";

/// SQLite implementation of [`PersistentVectorStore`].
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorStore {
    /// Open (or create) a store at the given path.
    pub fn open(db_path: &Path) -> MindweaveResult<Self> {
        let conn = Connection::open(db_path).map_err(|e| MindweaveError::Storage(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| MindweaveError::Storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store.
    pub fn open_in_memory() -> MindweaveResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| MindweaveError::Storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> MindweaveResult<Self> {
        run_migrations(&conn).map_err(|e| MindweaveError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> MindweaveResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> MindweaveResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| MindweaveError::Internal(e.to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| MindweaveError::Internal(e.to_string()))?
    }
}

fn storage(e: rusqlite::Error) -> MindweaveError {
    MindweaveError::Storage(e.to_string())
}

fn upsert(
    conn: &Connection,
    agent_id: &AgentId,
    content: &str,
    embedding: &[f32],
    metadata: &EntryMetadata,
    now: &str,
) -> MindweaveResult<EntryId> {
    let id = record_id(agent_id, content);
    let meta_str = serde_json::to_string(&metadata.extra)
        .map_err(|e| MindweaveError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO vector_records (id, agent_id, content_hash, content, embedding, memory_type, source, metadata, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(agent_id, content_hash) DO UPDATE SET
            embedding = ?5, memory_type = ?6, source = ?7, metadata = ?8, indexed_at = ?9",
        rusqlite::params![
            id.as_str(),
            agent_id.as_str(),
            content_hash(content),
            content,
            embedding_to_bytes(embedding),
            metadata.memory_type.as_ref().map(|t| t.as_str().to_string()),
            metadata.source,
            meta_str,
            now,
        ],
    )
    .map_err(storage)?;
    Ok(id)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistentRecord> {
    let id: String = row.get(0)?;
    let agent: String = row.get(1)?;
    let content_hash: String = row.get(2)?;
    let content: String = row.get(3)?;
    let embedding: Vec<u8> = row.get(4)?;
    let memory_type: Option<String> = row.get(5)?;
    let source: Option<String> = row.get(6)?;
    let meta_str: String = row.get(7)?;
    let indexed_str: String = row.get(8)?;

    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&meta_str).unwrap_or_default();
    let indexed_at = DateTime::parse_from_rfc3339(&indexed_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(PersistentRecord {
        id: EntryId(id),
        agent_id: AgentId(agent),
        content_hash,
        content,
        embedding: embedding_from_bytes(&embedding),
        memory_type: memory_type.map(NodeType::from),
        source,
        metadata,
        indexed_at,
    })
}

#[async_trait]
impl PersistentVectorStore for SqliteVectorStore {
    async fn store(
        &self,
        agent_id: &AgentId,
        content: &str,
        embedding: &[f32],
        metadata: &EntryMetadata,
    ) -> MindweaveResult<EntryId> {
        let agent_id = agent_id.clone();
        let content = content.to_string();
        let embedding = embedding.to_vec();
        let metadata = metadata.clone();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            upsert(conn, &agent_id, &content, &embedding, &metadata, &now)
        })
        .await
    }

    async fn search(
        &self,
        agent_id: &AgentId,
        query: &[f32],
        options: &VectorSearchOptions,
    ) -> MindweaveResult<Vec<ScoredRecord>> {
        let agent_id = agent_id.clone();
        let query = query.to_vec();
        let options = options.clone();
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {RECORD_COLUMNS} FROM vector_records WHERE agent_id = ?1");
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(agent_id.as_str().to_string())];
            if let Some(ref t) = options.type_filter {
                sql.push_str(" AND memory_type = ?2");
                params.push(Box::new(t.as_str().to_string()));
            }
            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt
                .query_map(param_refs.as_slice(), row_to_record)
                .map_err(storage)?;

            let mut scored = Vec::new();
            for row in rows {
                let record = row.map_err(storage)?;
                let similarity = cosine_similarity(&query, &record.embedding);
                if similarity >= options.threshold {
                    scored.push(ScoredRecord { record, similarity });
                }
            }
            scored.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.record.id.cmp(&b.record.id))
            });
            scored.truncate(options.limit);
            debug!(agent = %agent_id, hits = scored.len(), "Persistent vector search");
            Ok(scored)
        })
        .await
    }

    async fn delete(&self, agent_id: &AgentId, id: &EntryId) -> MindweaveResult<bool> {
        let agent_id = agent_id.clone();
        let id = id.clone();
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM vector_records WHERE agent_id = ?1 AND id = ?2",
                    rusqlite::params![agent_id.as_str(), id.as_str()],
                )
                .map_err(storage)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_all(&self, agent_id: &AgentId) -> MindweaveResult<u64> {
        let agent_id = agent_id.clone();
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM vector_records WHERE agent_id = ?1",
                    rusqlite::params![agent_id.as_str()],
                )
                .map_err(storage)?;
            Ok(removed as u64)
        })
        .await
    }

    async fn count(&self, agent_id: &AgentId) -> MindweaveResult<u64> {
        let agent_id = agent_id.clone();
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM vector_records WHERE agent_id = ?1",
                    rusqlite::params![agent_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            Ok(count as u64)
        })
        .await
    }

    async fn stats(&self, agent_id: &AgentId) -> MindweaveResult<VectorStoreStats> {
        let agent_id = agent_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT COALESCE(memory_type, 'untyped'), COUNT(*), MIN(indexed_at), MAX(indexed_at)
                     FROM vector_records WHERE agent_id = ?1 GROUP BY 1",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(rusqlite::params![agent_id.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(storage)?;

            let parse = |s: &str| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            };
            let mut stats = VectorStoreStats::default();
            for row in rows {
                let (memory_type, count, oldest, newest) = row.map_err(storage)?;
                stats.total += count as u64;
                stats.by_type.insert(memory_type, count as u64);
                if let Some(o) = parse(&oldest) {
                    stats.oldest = Some(stats.oldest.map_or(o, |cur| cur.min(o)));
                }
                if let Some(n) = parse(&newest) {
                    stats.newest = Some(stats.newest.map_or(n, |cur| cur.max(n)));
                }
            }
            Ok(stats)
        })
        .await
    }

    async fn store_batch(
        &self,
        agent_id: &AgentId,
        writes: &[VectorWrite],
    ) -> MindweaveResult<Vec<EntryId>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let agent_id = agent_id.clone();
        let writes = writes.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage)?;
            let now = Utc::now().to_rfc3339();
            let mut ids = Vec::with_capacity(writes.len());
            for w in &writes {
                ids.push(upsert(&tx, &agent_id, &w.content, &w.embedding, &w.metadata, &now)?);
            }
            tx.commit().map_err(storage)?;
            debug!(agent = %agent_id, count = ids.len(), "Stored vector batch");
            Ok(ids)
        })
        .await
    }

    async fn get(
        &self,
        agent_id: &AgentId,
        id: &EntryId,
    ) -> MindweaveResult<Option<PersistentRecord>> {
        let agent_id = agent_id.clone();
        let id = id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM vector_records WHERE agent_id = ?1 AND id = ?2"),
                rusqlite::params![agent_id.as_str(), id.as_str()],
                row_to_record,
            )
            .optional()
            .map_err(storage)
        })
        .await
    }

    async fn list_recent(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> MindweaveResult<Vec<PersistentRecord>> {
        let agent_id = agent_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM vector_records WHERE agent_id = ?1
                     ORDER BY indexed_at DESC, id ASC LIMIT ?2"
                ))
                .map_err(storage)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![agent_id.as_str(), limit.min(i64::MAX as usize) as i64],
                    row_to_record,
                )
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::from("agent-1")
    }

    #[tokio::test]
    async fn test_store_upserts_by_content() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let meta = EntryMetadata::typed(NodeType::Fact);
        let a = store.store(&agent(), "Hello", &[1.0, 0.0], &meta).await.unwrap();
        let b = store.store(&agent(), "Hello", &[0.0, 1.0], &meta).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count(&agent()).await.unwrap(), 1);
        let record = store.get(&agent(), &a).await.unwrap().unwrap();
        assert_eq!(record.embedding, vec![0.0, 1.0]);
        assert_eq!(record.content_hash, content_hash("Hello"));
        assert_eq!(record.memory_type, Some(NodeType::Fact));
    }

    #[tokio::test]
    async fn test_records_scoped_by_agent() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let meta = EntryMetadata::default();
        store.store(&agent(), "shared", &[1.0], &meta).await.unwrap();
        store.store(&AgentId::from("agent-2"), "shared", &[1.0], &meta).await.unwrap();
        assert_eq!(store.count(&agent()).await.unwrap(), 1);
        assert_eq!(store.delete_all(&agent()).await.unwrap(), 1);
        assert_eq!(store.count(&AgentId::from("agent-2")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        store
            .store(&agent(), "exact", &[1.0, 0.0], &EntryMetadata::typed(NodeType::Fact))
            .await
            .unwrap();
        store
            .store(&agent(), "close", &[0.8, 0.2], &EntryMetadata::typed(NodeType::Skill))
            .await
            .unwrap();
        store
            .store(&agent(), "far", &[0.0, 1.0], &EntryMetadata::typed(NodeType::Fact))
            .await
            .unwrap();

        let options = VectorSearchOptions {
            threshold: 0.5,
            type_filter: None,
            limit: 10,
        };
        let hits = store.search(&agent(), &[1.0, 0.0], &options).await.unwrap();
        let contents: Vec<&str> = hits.iter().map(|h| h.record.content.as_str()).collect();
        assert_eq!(contents, vec!["exact", "close"]);

        let facts = VectorSearchOptions {
            type_filter: Some(NodeType::Fact),
            ..options
        };
        let hits = store.search(&agent(), &[1.0, 0.0], &facts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.content, "exact");
    }

    #[tokio::test]
    async fn test_delete_and_get() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let id = store
            .store(&agent(), "gone soon", &[1.0], &EntryMetadata::default())
            .await
            .unwrap();
        assert!(store.delete(&agent(), &id).await.unwrap());
        assert!(!store.delete(&agent(), &id).await.unwrap());
        assert!(store.get(&agent(), &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_batch_and_stats() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let writes = vec![
            VectorWrite {
                content: "a".into(),
                embedding: vec![1.0],
                metadata: EntryMetadata::typed(NodeType::Fact),
            },
            VectorWrite {
                content: "b".into(),
                embedding: vec![1.0],
                metadata: EntryMetadata::default(),
            },
            VectorWrite {
                content: "a".into(),
                embedding: vec![0.5],
                metadata: EntryMetadata::typed(NodeType::Fact),
            },
        ];
        let ids = store.store_batch(&agent(), &writes).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], ids[2]);

        let stats = store.stats(&agent()).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type.get("fact"), Some(&1));
        assert_eq!(stats.by_type.get("untyped"), Some(&1));
        assert!(stats.oldest.is_some() && stats.newest.is_some());
    }

    #[tokio::test]
    async fn test_list_recent_limit() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .store(&agent(), &format!("item {i}"), &[1.0], &EntryMetadata::default())
                .await
                .unwrap();
        }
        assert_eq!(store.list_recent(&agent(), 3).await.unwrap().len(), 3);
        assert_eq!(store.list_recent(&agent(), 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_metadata_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let mut meta = EntryMetadata::typed(NodeType::Insight);
        meta.source = Some("reflection".into());
        meta.extra.insert("score".into(), serde_json::json!(3));
        let id = {
            let store = SqliteVectorStore::open(&path).unwrap();
            store.store(&agent(), "insight", &[0.5, 0.5], &meta).await.unwrap()
        };
        let store = SqliteVectorStore::open(&path).unwrap();
        let record = store.get(&agent(), &id).await.unwrap().unwrap();
        assert_eq!(record.entry_metadata(), meta);
    }
}
