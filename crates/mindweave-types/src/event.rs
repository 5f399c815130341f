//! Notifications emitted by the memory substrate.
//!
//! Emission is fire-and-forget: nothing in the substrate depends on an event
//! being delivered.

use crate::agent::AgentId;
use crate::index::{BackendMode, EntryId};
use crate::memory::{NodeId, NodeType, RelationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Create a new random EventId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Event id.
    pub id: EventId,
    /// Agent whose memory changed.
    pub agent_id: AgentId,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: MemoryEventPayload,
}

impl MemoryEvent {
    /// Create an event stamped with the current time.
    pub fn new(agent_id: AgentId, payload: MemoryEventPayload) -> Self {
        Self {
            id: EventId::new(),
            agent_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The payload of a memory event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MemoryEventPayload {
    /// A node was created.
    NodeAdded {
        /// New node.
        node_id: NodeId,
        /// Its type.
        node_type: NodeType,
    },
    /// A node was reinforced, directly or through duplicate detection.
    NodeReinforced {
        /// Node.
        node_id: NodeId,
        /// Relevance after the boost.
        relevance: f32,
    },
    /// Two nodes were linked.
    NodesLinked {
        /// Source node.
        source_id: NodeId,
        /// Target node.
        target_id: NodeId,
        /// Relation.
        relation: RelationType,
    },
    /// A consolidation pass decayed nodes.
    NodesDecayed {
        /// Nodes decayed.
        count: u64,
    },
    /// A consolidation pass reinforced recently accessed nodes.
    NodesReinforced {
        /// Nodes reinforced.
        count: u64,
    },
    /// Nodes were handed to the archival sink.
    NodesArchived {
        /// Nodes archived.
        count: u64,
    },
    /// Nodes were pruned below the threshold.
    NodesPruned {
        /// Pruned node ids.
        node_ids: Vec<NodeId>,
    },
    /// Nodes were evicted to respect a type quota.
    NodesEvicted {
        /// Evicted node ids.
        node_ids: Vec<NodeId>,
    },
    /// A consolidation pass finished.
    ConsolidationCompleted {
        /// Nodes left.
        total_nodes: u64,
        /// Duration of the pass.
        duration_ms: u64,
    },
    /// Content was indexed.
    EntryIndexed {
        /// Entry id.
        entry_id: EntryId,
        /// Backend mode of the index.
        backend: BackendMode,
    },
    /// An entry left the ephemeral store to make room.
    EntryEvicted {
        /// Entry id.
        entry_id: EntryId,
    },
    /// A recall query completed.
    RecallCompleted {
        /// Results returned.
        hits: usize,
        /// Whether the persistent store was consulted.
        used_persistent: bool,
    },
    /// A write to the persistent store failed.
    PersistFailed {
        /// Operation that failed.
        operation: String,
        /// Error message.
        error: String,
    },
}
