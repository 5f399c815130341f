//! Archival sinks for nodes about to be pruned.
//!
//! Archival is best effort: consolidation logs a failed archive and prunes
//! the node anyway.

use crate::migration::run_migrations;
use chrono::Utc;
use mindweave_types::agent::AgentId;
use mindweave_types::error::{MindweaveError, MindweaveResult};
use mindweave_types::memory::Node;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Receives nodes before they are pruned.
pub trait ArchiveSink: Send + Sync {
    /// Archive one node.
    fn archive(&self, agent_id: &AgentId, node: &Node) -> MindweaveResult<()>;
}

/// In-process archive, mostly useful in tests.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    nodes: Mutex<Vec<(AgentId, Node)>>,
}

impl MemoryArchive {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Archived nodes of one agent, in archival order.
    pub fn nodes_for(&self, agent_id: &AgentId) -> Vec<Node> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes
            .iter()
            .filter(|(a, _)| a == agent_id)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Total archived nodes.
    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing was archived.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArchiveSink for MemoryArchive {
    fn archive(&self, agent_id: &AgentId, node: &Node) -> MindweaveResult<()> {
        self.nodes
            .lock()
            .map_err(|e| MindweaveError::Internal(e.to_string()))?
            .push((agent_id.clone(), node.clone()));
        Ok(())
    }
}

/// SQLite-backed archive. Node snapshots are stored as MessagePack.
#[derive(Clone)]
pub struct SqliteArchive {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteArchive {
    /// Open (or create) an archive database at the given path.
    pub fn open(db_path: &Path) -> MindweaveResult<Self> {
        let conn = Connection::open(db_path).map_err(|e| MindweaveError::Storage(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| MindweaveError::Storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory archive.
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

    /// Archived nodes of one agent, oldest archive first.
    pub fn list(&self, agent_id: &AgentId) -> MindweaveResult<Vec<Node>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MindweaveError::Internal(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT snapshot FROM archived_nodes WHERE agent_id = ?1
                 ORDER BY archived_at ASC, node_id ASC",
            )
            .map_err(|e| MindweaveError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![agent_id.as_str()], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .map_err(|e| MindweaveError::Storage(e.to_string()))?;

        let mut nodes = Vec::new();
        for row in rows {
            let blob = row.map_err(|e| MindweaveError::Storage(e.to_string()))?;
            let node: Node = rmp_serde::from_slice(&blob)
                .map_err(|e| MindweaveError::Serialization(e.to_string()))?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Number of archived nodes of one agent.
    pub fn count(&self, agent_id: &AgentId) -> MindweaveResult<u64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MindweaveError::Internal(e.to_string()))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM archived_nodes WHERE agent_id = ?1",
                rusqlite::params![agent_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| MindweaveError::Storage(e.to_string()))?;
        Ok(count as u64)
    }
}

impl ArchiveSink for SqliteArchive {
    fn archive(&self, agent_id: &AgentId, node: &Node) -> MindweaveResult<()> {
        let snapshot =
            rmp_serde::to_vec_named(node).map_err(|e| MindweaveError::Serialization(e.to_string()))?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| MindweaveError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO archived_nodes (agent_id, node_id, node_type, relevance, snapshot, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(agent_id, node_id) DO UPDATE SET
                node_type = ?3, relevance = ?4, snapshot = ?5, archived_at = ?6",
            rusqlite::params![
                agent_id.as_str(),
                node.id.as_str(),
                node.node_type.as_str(),
                node.relevance as f64,
                snapshot,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| MindweaveError::Storage(e.to_string()))?;
        Ok(())
    }
}
