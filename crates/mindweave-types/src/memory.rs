//! Knowledge graph types: nodes, edges, graph configuration and the inputs
//! and outcomes of graph mutations.

use crate::error::{MindweaveError, MindweaveResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Default decay applied per consolidation pass.
pub const DEFAULT_DECAY_RATE: f32 = 0.10;
/// Default relevance below which nodes are pruned.
pub const DEFAULT_PRUNE_THRESHOLD: f32 = 0.10;
/// Default relevance of a freshly created node.
pub const DEFAULT_RELEVANCE: f32 = 0.5;
/// Default boost applied by `reinforce` when none is given.
pub const DEFAULT_REINFORCE_BOOST: f32 = 0.1;

/// Clamp a relevance score into `[0.0, 1.0]`.
pub fn clamp_relevance(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Stable identifier of a graph node, prefixed with its type (`fact_…`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Generate a fresh id for a node of the given type.
    pub fn generate(node_type: &NodeType) -> Self {
        Self(format!("{}_{}", node_type.id_prefix(), Uuid::new_v4().simple()))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kinds of knowledge a node can hold.
///
/// Serialized as a plain lowercase string so it can key TOML tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// A stated fact.
    Fact,
    /// A derived insight.
    Insight,
    /// Something the agent went through.
    Experience,
    /// A learned skill.
    Skill,
    /// A raw observation.
    Observation,
    /// A goal the agent pursues.
    Goal,
    /// An abstract concept.
    Concept,
    /// A person the agent knows about.
    Person,
    /// Any other kind.
    Custom(String),
}

impl NodeType {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Fact => "fact",
            NodeType::Insight => "insight",
            NodeType::Experience => "experience",
            NodeType::Skill => "skill",
            NodeType::Observation => "observation",
            NodeType::Goal => "goal",
            NodeType::Concept => "concept",
            NodeType::Person => "person",
            NodeType::Custom(name) => name,
        }
    }

    /// Prefix used for generated node ids. Custom names are reduced to
    /// alphanumerics so ids stay shell- and URL-safe.
    fn id_prefix(&self) -> String {
        match self {
            NodeType::Custom(name) => {
                let cleaned: String = name
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase();
                if cleaned.is_empty() {
                    "node".to_string()
                } else {
                    cleaned
                }
            }
            other => other.as_str().to_string(),
        }
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "fact" => NodeType::Fact,
            "insight" => NodeType::Insight,
            "experience" => NodeType::Experience,
            "skill" => NodeType::Skill,
            "observation" => NodeType::Observation,
            "goal" => NodeType::Goal,
            "concept" => NodeType::Concept,
            "person" => NodeType::Person,
            _ => NodeType::Custom(s),
        }
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        NodeType::from(s.to_string())
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node metadata: a few well-known fields plus an open extension map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Where the knowledge came from (conversation, tool, user, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Extraction confidence reported by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Embedding of the content, used by duplicate detection when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Extension data.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A vertex of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id.
    pub id: NodeId,
    /// Kind of knowledge.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Textual content.
    pub content: String,
    /// Current importance in `[0.0, 1.0]`.
    pub relevance: f32,
    /// Pinned nodes never decay and are never pruned or evicted.
    #[serde(default)]
    pub pinned: bool,
    /// When the node was recorded.
    pub created_at: DateTime<Utc>,
    /// When the node was last read or reinforced.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of accesses.
    #[serde(default)]
    pub access_count: u64,
    /// The date the content refers to, e.g. when an event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_date: Option<DateTime<Utc>>,
    /// Metadata.
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl Node {
    /// Set relevance, clamping into range.
    pub fn set_relevance(&mut self, value: f32) {
        self.relevance = clamp_relevance(value);
    }

    /// Record an access at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }
}

/// Fields supplied when adding a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    /// Kind of knowledge (required).
    pub node_type: NodeType,
    /// Content (required, must not be blank).
    pub content: String,
    /// Initial relevance; the graph default applies when `None`.
    pub relevance: Option<f32>,
    /// Whether the node starts pinned.
    pub pinned: bool,
    /// The date the content refers to.
    pub referenced_date: Option<DateTime<Utc>>,
    /// Metadata.
    pub metadata: NodeMetadata,
    /// Bypass duplicate detection.
    pub skip_dedup: bool,
}

impl NewNode {
    /// Start describing a node of the given type.
    pub fn new(node_type: NodeType, content: impl Into<String>) -> Self {
        Self {
            node_type,
            content: content.into(),
            relevance: None,
            pinned: false,
            referenced_date: None,
            metadata: NodeMetadata::default(),
            skip_dedup: false,
        }
    }

    /// Set the initial relevance.
    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = Some(relevance);
        self
    }

    /// Start pinned.
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Set the referenced date.
    pub fn with_referenced_date(mut self, date: DateTime<Utc>) -> Self {
        self.referenced_date = Some(date);
        self
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Skip duplicate detection for this insertion.
    pub fn skip_dedup(mut self) -> Self {
        self.skip_dedup = true;
        self
    }
}

/// Partial update of an existing node. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    /// New content.
    pub content: Option<String>,
    /// New relevance (clamped).
    pub relevance: Option<f32>,
    /// New pinned flag.
    pub pinned: Option<bool>,
    /// New referenced date; `Some(None)` clears it.
    pub referenced_date: Option<Option<DateTime<Utc>>>,
    /// Replacement metadata.
    pub metadata: Option<NodeMetadata>,
}

/// What `add_node` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new node was created.
    Inserted(NodeId),
    /// The content duplicated an existing node, which was reinforced instead.
    Reinforced(NodeId),
}

impl AddOutcome {
    /// The id of the created or reinforced node.
    pub fn id(&self) -> &NodeId {
        match self {
            AddOutcome::Inserted(id) | AddOutcome::Reinforced(id) => id,
        }
    }

    /// Whether a new node was created.
    pub fn is_inserted(&self) -> bool {
        matches!(self, AddOutcome::Inserted(_))
    }
}

/// Types of relations between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    /// Source supports target.
    Supports,
    /// Source contradicts target.
    Contradicts,
    /// Generic association.
    RelatesTo,
    /// Source was derived from target.
    DerivedFrom,
    /// Source is part of target.
    PartOf,
    /// Source happened before target.
    Precedes,
    /// Any other relation.
    Custom(String),
}

impl RelationType {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &str {
        match self {
            RelationType::Supports => "supports",
            RelationType::Contradicts => "contradicts",
            RelationType::RelatesTo => "relates_to",
            RelationType::DerivedFrom => "derived_from",
            RelationType::PartOf => "part_of",
            RelationType::Precedes => "precedes",
            RelationType::Custom(name) => name,
        }
    }
}

impl From<String> for RelationType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "supports" => RelationType::Supports,
            "contradicts" => RelationType::Contradicts,
            "relates_to" => RelationType::RelatesTo,
            "derived_from" => RelationType::DerivedFrom,
            "part_of" => RelationType::PartOf,
            "precedes" => RelationType::Precedes,
            _ => RelationType::Custom(s),
        }
    }
}

impl From<RelationType> for String {
    fn from(r: RelationType) -> Self {
        r.as_str().to_string()
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node.
    pub source_id: NodeId,
    /// Target node.
    pub target_id: NodeId,
    /// Relation type.
    pub relation: RelationType,
    /// When the edge was created.
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Whether this edge expresses the given relationship.
    pub fn is_same(&self, source: &NodeId, target: &NodeId, relation: &RelationType) -> bool {
        &self.source_id == source && &self.target_id == target && &self.relation == relation
    }

    /// Whether the edge touches the given node.
    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source_id == id || &self.target_id == id
    }
}

/// What `link` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new edge was appended.
    Created,
    /// The relationship already existed; nothing changed.
    AlreadyLinked,
}

/// Per-agent graph configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Relevance subtracted from every non-pinned node per consolidation.
    pub decay_rate: f32,
    /// Nodes strictly below this relevance are pruned.
    pub prune_threshold: f32,
    /// Relevance given to nodes added without one.
    pub default_relevance: f32,
    /// Maximum node count per type. Types without an entry are unlimited.
    pub max_nodes_per_type: HashMap<NodeType, usize>,
    /// Node count above which consolidation is due.
    pub size_threshold: usize,
    /// Minimum minutes between consolidation passes.
    pub min_interval_minutes: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            decay_rate: DEFAULT_DECAY_RATE,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            default_relevance: DEFAULT_RELEVANCE,
            max_nodes_per_type: HashMap::new(),
            size_threshold: 100,
            min_interval_minutes: 60,
        }
    }
}

impl GraphConfig {
    /// Set the quota for one type.
    pub fn with_quota(mut self, node_type: NodeType, max: usize) -> Self {
        self.max_nodes_per_type.insert(node_type, max);
        self
    }

    /// Quota for a type, `None` when unlimited.
    pub fn quota_for(&self, node_type: &NodeType) -> Option<usize> {
        self.max_nodes_per_type.get(node_type).copied()
    }

    /// Check value ranges.
    pub fn validate(&self) -> MindweaveResult<()> {
        check_unit("decay_rate", self.decay_rate)?;
        check_unit("prune_threshold", self.prune_threshold)?;
        check_unit("default_relevance", self.default_relevance)?;
        let mut zero: Vec<&NodeType> = self
            .max_nodes_per_type
            .iter()
            .filter(|(_, max)| **max == 0)
            .map(|(t, _)| t)
            .collect();
        zero.sort();
        if let Some(node_type) = zero.first() {
            return Err(MindweaveError::InvalidInput(format!(
                "max_nodes_per_type for '{node_type}' must be greater than zero"
            )));
        }
        Ok(())
    }
}

/// Ensure a value is finite and within `[0.0, 1.0]`.
pub fn check_unit(name: &str, value: f32) -> MindweaveResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(MindweaveError::InvalidInput(format!(
            "{name} must be within [0.0, 1.0], got {value}"
        )));
    }
    Ok(())
}
