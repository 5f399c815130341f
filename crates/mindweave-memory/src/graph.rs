//! In-memory knowledge graph with copy-on-write snapshots.
//!
//! Every mutation returns a new `Graph`; the receiver is left untouched.
//! Node and edge storage sit behind `Arc`s, so cloning a graph is cheap and
//! a mutation copies the maps only while an older snapshot still shares them.

use crate::dedup::{DuplicateDetector, TextDuplicateDetector};
use crate::quota;
use chrono::{DateTime, Utc};
use mindweave_types::agent::AgentId;
use mindweave_types::error::{MindweaveError, MindweaveResult};
use mindweave_types::memory::{
    check_unit, clamp_relevance, AddOutcome, Edge, GraphConfig, LinkOutcome, NewNode, Node,
    NodeId, NodeUpdate, RelationType, DEFAULT_REINFORCE_BOOST,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// A single agent's knowledge graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    agent_id: AgentId,
    nodes: Arc<HashMap<NodeId, Node>>,
    edges: Arc<Vec<Edge>>,
    config: GraphConfig,
    last_consolidated_at: Option<DateTime<Utc>>,
}

/// Full result of an insertion, including quota evictions.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AddReport {
    pub outcome: AddOutcome,
    pub relevance: f32,
    pub evicted: Vec<NodeId>,
}

impl Graph {
    /// Create an empty graph with the default configuration.
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            nodes: Arc::new(HashMap::new()),
            edges: Arc::new(Vec::new()),
            config: GraphConfig::default(),
            last_consolidated_at: None,
        }
    }

    /// Create an empty graph with the given configuration.
    pub fn configured(agent_id: impl Into<AgentId>, config: GraphConfig) -> MindweaveResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(agent_id)
        })
    }

    /// Rebuild a graph from previously captured parts.
    ///
    /// No validation happens here; consolidation rejects malformed graphs
    /// before touching them.
    pub fn from_parts(
        agent_id: impl Into<AgentId>,
        nodes: impl IntoIterator<Item = Node>,
        edges: Vec<Edge>,
        config: GraphConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            nodes: Arc::new(nodes.into_iter().map(|n| (n.id.clone(), n)).collect()),
            edges: Arc::new(edges),
            config,
            last_consolidated_at: None,
        }
    }

    /// Owning agent.
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Configuration in effect.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Reference time of the last consolidation pass applied to this graph.
    pub fn last_consolidated_at(&self) -> Option<DateTime<Utc>> {
        self.last_consolidated_at
    }

    /// All nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.values()
    }

    /// All edges, in creation order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node exists.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up a node.
    pub fn get_node(&self, id: &NodeId) -> MindweaveResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| MindweaveError::NotFound(format!("node {id}")))
    }

    /// Replace the configuration. Quotas are not enforced retroactively; the
    /// next consolidation pass applies them.
    pub fn with_config(&self, config: GraphConfig) -> MindweaveResult<Graph> {
        config.validate()?;
        let mut next = self.clone();
        next.config = config;
        Ok(next)
    }

    /// Add a node using the default duplicate detector.
    pub fn add_node(&self, new: NewNode) -> MindweaveResult<(Graph, AddOutcome)> {
        self.add_node_with(new, &TextDuplicateDetector::default(), Utc::now())
    }

    /// Add a node with an explicit duplicate detector and clock.
    pub fn add_node_with(
        &self,
        new: NewNode,
        detector: &dyn DuplicateDetector,
        now: DateTime<Utc>,
    ) -> MindweaveResult<(Graph, AddOutcome)> {
        let (graph, report) = self.add_node_detailed(new, detector, now)?;
        Ok((graph, report.outcome))
    }

    pub(crate) fn add_node_detailed(
        &self,
        new: NewNode,
        detector: &dyn DuplicateDetector,
        now: DateTime<Utc>,
    ) -> MindweaveResult<(Graph, AddReport)> {
        if new.content.trim().is_empty() {
            return Err(MindweaveError::InvalidInput(
                "node content is required".to_string(),
            ));
        }
        if let Some(r) = new.relevance {
            if !r.is_finite() {
                return Err(MindweaveError::InvalidInput(format!(
                    "relevance must be a finite number, got {r}"
                )));
            }
        }

        if !new.skip_dedup {
            if let Some(existing) = detector.find_duplicate(self, &new) {
                let (graph, relevance) =
                    self.reinforce_at(&existing, Some(DEFAULT_REINFORCE_BOOST), now)?;
                debug!(agent = %self.agent_id, node_id = %existing, "Duplicate content reinforced existing node");
                return Ok((
                    graph,
                    AddReport {
                        outcome: AddOutcome::Reinforced(existing),
                        relevance,
                        evicted: Vec::new(),
                    },
                ));
            }
        }

        let mut next = self.clone();
        let mut evicted = Vec::new();
        if let Some(max) = self.config.quota_for(&new.node_type) {
            if max == 0 {
                return Err(MindweaveError::InvalidInput(format!(
                    "quota for type '{}' is zero",
                    new.node_type
                )));
            }
            let same_type: Vec<&Node> = self
                .nodes
                .values()
                .filter(|n| n.node_type == new.node_type)
                .collect();
            if same_type.len() >= max {
                let needed = same_type.len() + 1 - max;
                evicted = quota::select_evictions(same_type, needed);
                if evicted.len() < needed {
                    warn!(
                        agent = %self.agent_id,
                        node_type = %new.node_type,
                        quota = max,
                        "Quota exceeded by pinned nodes, inserting anyway"
                    );
                }
                let victims: HashSet<NodeId> = evicted.iter().cloned().collect();
                next.remove_nodes(&victims);
            }
        }

        let relevance = clamp_relevance(new.relevance.unwrap_or(self.config.default_relevance));
        let id = NodeId::generate(&new.node_type);
        let node = Node {
            id: id.clone(),
            node_type: new.node_type,
            content: new.content,
            relevance,
            pinned: new.pinned,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            referenced_date: new.referenced_date,
            metadata: new.metadata,
        };
        next.nodes_mut().insert(id.clone(), node);
        Ok((
            next,
            AddReport {
                outcome: AddOutcome::Inserted(id),
                relevance,
                evicted,
            },
        ))
    }

    /// Boost a node's relevance (default 0.1, clamped to 1.0) and record an
    /// access. Returns the new relevance.
    pub fn reinforce(&self, id: &NodeId, boost: Option<f32>) -> MindweaveResult<(Graph, f32)> {
        self.reinforce_at(id, boost, Utc::now())
    }

    /// `reinforce` with an explicit clock.
    pub fn reinforce_at(
        &self,
        id: &NodeId,
        boost: Option<f32>,
        now: DateTime<Utc>,
    ) -> MindweaveResult<(Graph, f32)> {
        let boost = boost.unwrap_or(DEFAULT_REINFORCE_BOOST);
        if !boost.is_finite() || boost < 0.0 {
            return Err(MindweaveError::InvalidInput(format!(
                "boost must be a non-negative number, got {boost}"
            )));
        }
        self.get_node(id)?;
        let mut next = self.clone();
        let node = next
            .nodes_mut()
            .get_mut(id)
            .ok_or_else(|| MindweaveError::NotFound(format!("node {id}")))?;
        node.set_relevance(node.relevance + boost);
        node.touch(now);
        let relevance = node.relevance;
        Ok((next, relevance))
    }

    /// Apply a partial update.
    pub fn update_node(&self, id: &NodeId, update: NodeUpdate) -> MindweaveResult<Graph> {
        self.get_node(id)?;
        if let Some(ref content) = update.content {
            if content.trim().is_empty() {
                return Err(MindweaveError::InvalidInput(
                    "node content is required".to_string(),
                ));
            }
        }
        if let Some(r) = update.relevance {
            if !r.is_finite() {
                return Err(MindweaveError::InvalidInput(format!(
                    "relevance must be a finite number, got {r}"
                )));
            }
        }

        let mut next = self.clone();
        let node = next
            .nodes_mut()
            .get_mut(id)
            .ok_or_else(|| MindweaveError::NotFound(format!("node {id}")))?;
        if let Some(content) = update.content {
            node.content = content;
        }
        if let Some(relevance) = update.relevance {
            node.set_relevance(relevance);
        }
        if let Some(pinned) = update.pinned {
            node.pinned = pinned;
        }
        if let Some(referenced_date) = update.referenced_date {
            node.referenced_date = referenced_date;
        }
        if let Some(metadata) = update.metadata {
            node.metadata = metadata;
        }
        Ok(next)
    }

    /// Pin a node.
    pub fn pin(&self, id: &NodeId) -> MindweaveResult<Graph> {
        self.update_node(
            id,
            NodeUpdate {
                pinned: Some(true),
                ..Default::default()
            },
        )
    }

    /// Unpin a node.
    pub fn unpin(&self, id: &NodeId) -> MindweaveResult<Graph> {
        self.update_node(
            id,
            NodeUpdate {
                pinned: Some(false),
                ..Default::default()
            },
        )
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&self, id: &NodeId) -> MindweaveResult<(Graph, Node)> {
        let node = self.get_node(id)?.clone();
        let mut next = self.clone();
        let victims: HashSet<NodeId> = std::iter::once(id.clone()).collect();
        next.remove_nodes(&victims);
        Ok((next, node))
    }

    /// Link two nodes. An identical (source, target, relation) edge is never
    /// duplicated.
    pub fn link(
        &self,
        source: &NodeId,
        target: &NodeId,
        relation: RelationType,
    ) -> MindweaveResult<(Graph, LinkOutcome)> {
        self.link_at(source, target, relation, Utc::now())
    }

    /// `link` with an explicit clock.
    pub fn link_at(
        &self,
        source: &NodeId,
        target: &NodeId,
        relation: RelationType,
        now: DateTime<Utc>,
    ) -> MindweaveResult<(Graph, LinkOutcome)> {
        self.get_node(source)?;
        self.get_node(target)?;
        if self.edges.iter().any(|e| e.is_same(source, target, &relation)) {
            return Ok((self.clone(), LinkOutcome::AlreadyLinked));
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.edges).push(Edge {
            source_id: source.clone(),
            target_id: target.clone(),
            relation,
            created_at: now,
        });
        Ok((next, LinkOutcome::Created))
    }

    /// Outgoing edges of a node.
    pub fn edges_from(&self, id: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.source_id == id).collect()
    }

    /// Incoming edges of a node.
    pub fn edges_to(&self, id: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.target_id == id).collect()
    }

    /// Nodes connected to `id` in either direction, each listed once.
    pub fn neighbors(&self, id: &NodeId) -> Vec<&Node> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for edge in self.edges.iter().filter(|e| e.touches(id)) {
            let other = if &edge.source_id == id {
                &edge.target_id
            } else {
                &edge.source_id
            };
            if other != id && seen.insert(other) {
                if let Some(node) = self.nodes.get(other) {
                    out.push(node);
                }
            }
        }
        out
    }

    /// Reject graphs consolidation cannot process safely.
    pub(crate) fn validate(&self) -> MindweaveResult<()> {
        self.config.validate()?;
        for node in self.nodes.values() {
            check_unit(&format!("relevance of node {}", node.id), node.relevance)?;
        }
        for edge in self.edges.iter() {
            for endpoint in [&edge.source_id, &edge.target_id] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(MindweaveError::InvalidInput(format!(
                        "edge {} -[{}]-> {} references missing node {endpoint}",
                        edge.source_id, edge.relation, edge.target_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn mark_consolidated(&mut self, now: DateTime<Utc>) {
        self.last_consolidated_at = Some(now);
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut HashMap<NodeId, Node> {
        Arc::make_mut(&mut self.nodes)
    }

    /// Drop nodes and their incident edges in place.
    pub(crate) fn remove_nodes(&mut self, ids: &HashSet<NodeId>) {
        if ids.is_empty() {
            return;
        }
        self.nodes_mut().retain(|id, _| !ids.contains(id));
        if self
            .edges
            .iter()
            .any(|e| ids.contains(&e.source_id) || ids.contains(&e.target_id))
        {
            Arc::make_mut(&mut self.edges)
                .retain(|e| !ids.contains(&e.source_id) && !ids.contains(&e.target_id));
        }
    }
}
