//! Graph operations with a pluggable duplicate detector and event emission.
//!
//! `GraphStore` holds no graph; callers pass a snapshot in and keep the one
//! that comes back.

use crate::dedup::{DuplicateDetector, TextDuplicateDetector};
use crate::events::{EventSink, NoopSink};
use crate::graph::Graph;
use chrono::Utc;
use mindweave_types::error::MindweaveResult;
use mindweave_types::event::{MemoryEvent, MemoryEventPayload};
use mindweave_types::memory::{AddOutcome, LinkOutcome, NewNode, NodeId, RelationType};
use std::sync::Arc;

/// Agent-facing graph mutations.
#[derive(Clone)]
pub struct GraphStore {
    detector: Arc<dyn DuplicateDetector>,
    events: Arc<dyn EventSink>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(Arc::new(TextDuplicateDetector::default()), Arc::new(NoopSink))
    }
}

impl GraphStore {
    /// Create a store.
    pub fn new(detector: Arc<dyn DuplicateDetector>, events: Arc<dyn EventSink>) -> Self {
        Self { detector, events }
    }

    /// Replace the event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Add a node, emitting `NodeAdded` or `NodeReinforced`, plus
    /// `NodesEvicted` when the insertion pushed nodes out.
    pub fn add_node(&self, graph: &Graph, new: NewNode) -> MindweaveResult<(Graph, AddOutcome)> {
        let node_type = new.node_type.clone();
        let (next, report) = graph.add_node_detailed(new, self.detector.as_ref(), Utc::now())?;
        let agent = graph.agent_id().clone();
        if !report.evicted.is_empty() {
            self.events.emit(MemoryEvent::new(
                agent.clone(),
                MemoryEventPayload::NodesEvicted {
                    node_ids: report.evicted.clone(),
                },
            ));
        }
        let payload = match &report.outcome {
            AddOutcome::Inserted(id) => MemoryEventPayload::NodeAdded {
                node_id: id.clone(),
                node_type,
            },
            AddOutcome::Reinforced(id) => MemoryEventPayload::NodeReinforced {
                node_id: id.clone(),
                relevance: report.relevance,
            },
        };
        self.events.emit(MemoryEvent::new(agent, payload));
        Ok((next, report.outcome))
    }

    /// Reinforce a node and emit `NodeReinforced`.
    pub fn reinforce(
        &self,
        graph: &Graph,
        id: &NodeId,
        boost: Option<f32>,
    ) -> MindweaveResult<(Graph, f32)> {
        let (next, relevance) = graph.reinforce(id, boost)?;
        self.events.emit(MemoryEvent::new(
            graph.agent_id().clone(),
            MemoryEventPayload::NodeReinforced {
                node_id: id.clone(),
                relevance,
            },
        ));
        Ok((next, relevance))
    }

    /// Link two nodes, emitting `NodesLinked` only when an edge was created.
    pub fn link(
        &self,
        graph: &Graph,
        source: &NodeId,
        target: &NodeId,
        relation: RelationType,
    ) -> MindweaveResult<(Graph, LinkOutcome)> {
        let (next, outcome) = graph.link(source, target, relation.clone())?;
        if outcome == LinkOutcome::Created {
            self.events.emit(MemoryEvent::new(
                graph.agent_id().clone(),
                MemoryEventPayload::NodesLinked {
                    source_id: source.clone(),
                    target_id: target.clone(),
                    relation,
                },
            ));
        }
        Ok((next, outcome))
    }
}
