//! Read-only graph queries.

use crate::graph::Graph;
use chrono::{DateTime, Utc};
use mindweave_types::memory::{Node, NodeType};
use std::cmp::Ordering;

/// Which timestamp a date range applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateField {
    /// The date the content refers to. Nodes without one never match.
    #[default]
    Referenced,
    /// When the node was recorded.
    Created,
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrder {
    /// Lowest relevance first.
    RelevanceAsc,
    /// Highest relevance first.
    RelevanceDesc,
    /// Oldest first.
    CreatedAsc,
    /// Newest first.
    CreatedDesc,
}

/// Node filter. Every set field must match; an empty query matches all nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeQuery {
    /// Accepted types (any type when empty).
    pub types: Vec<NodeType>,
    /// Inclusive lower relevance bound.
    pub min_relevance: Option<f32>,
    /// Inclusive upper relevance bound.
    pub max_relevance: Option<f32>,
    /// Required pinned flag.
    pub pinned: Option<bool>,
    /// Field the date bounds apply to.
    pub date_field: DateField,
    /// Inclusive lower date bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper date bound.
    pub until: Option<DateTime<Utc>>,
    /// Ordering; unspecified order when `None`.
    pub order: Option<QueryOrder>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl NodeQuery {
    /// Query matching every node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one type.
    pub fn of_type(mut self, node_type: NodeType) -> Self {
        self.types.push(node_type);
        self
    }

    /// Restrict relevance to `[min, max]`.
    pub fn relevance_between(mut self, min: f32, max: f32) -> Self {
        self.min_relevance = Some(min);
        self.max_relevance = Some(max);
        self
    }

    /// Restrict to pinned or unpinned nodes.
    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    /// Restrict `field` to `[from, until)`.
    pub fn between(
        mut self,
        field: DateField,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_field = field;
        self.from = from;
        self.until = until;
        self
    }

    /// Order results.
    pub fn ordered(mut self, order: QueryOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Cap the result count.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a node passes every filter.
    pub fn matches(&self, node: &Node) -> bool {
        if !self.types.is_empty() && !self.types.contains(&node.node_type) {
            return false;
        }
        if self.min_relevance.is_some_and(|min| node.relevance < min) {
            return false;
        }
        if self.max_relevance.is_some_and(|max| node.relevance > max) {
            return false;
        }
        if self.pinned.is_some_and(|p| node.pinned != p) {
            return false;
        }
        if self.from.is_some() || self.until.is_some() {
            let date = match self.date_field {
                DateField::Referenced => match node.referenced_date {
                    Some(d) => d,
                    None => return false,
                },
                DateField::Created => node.created_at,
            };
            if self.from.is_some_and(|from| date < from) {
                return false;
            }
            if self.until.is_some_and(|until| date >= until) {
                return false;
            }
        }
        true
    }
}

fn compare(order: QueryOrder, a: &Node, b: &Node) -> Ordering {
    let by_relevance = || {
        a.relevance
            .partial_cmp(&b.relevance)
            .unwrap_or(Ordering::Equal)
    };
    match order {
        QueryOrder::RelevanceAsc => by_relevance().then_with(|| a.id.cmp(&b.id)),
        QueryOrder::RelevanceDesc => by_relevance().reverse().then_with(|| a.id.cmp(&b.id)),
        QueryOrder::CreatedAsc => a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)),
        QueryOrder::CreatedDesc => b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)),
    }
}

impl Graph {
    /// Nodes matching a query.
    pub fn query(&self, query: &NodeQuery) -> Vec<&Node> {
        let mut out: Vec<&Node> = self.nodes().filter(|n| query.matches(n)).collect();
        if let Some(order) = query.order {
            out.sort_by(|a, b| compare(order, a, b));
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        out
    }

    /// Nodes whose referenced date lies strictly after `now`, soonest first.
    pub fn upcoming(&self, now: DateTime<Utc>) -> Vec<&Node> {
        let mut out: Vec<&Node> = self
            .nodes()
            .filter(|n| n.referenced_date.is_some_and(|d| d > now))
            .collect();
        out.sort_by(|a, b| {
            a.referenced_date
                .cmp(&b.referenced_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }
}
