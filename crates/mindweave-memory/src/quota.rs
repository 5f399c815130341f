//! Per-type quota enforcement.
//!
//! `add_node` and consolidation both pick eviction victims here so they
//! always agree on the order: ascending relevance, then least recently
//! accessed, then oldest, then id.

use mindweave_types::memory::{GraphConfig, Node, NodeId, NodeType};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Ordering of eviction candidates, first to go first.
pub fn eviction_order(a: &Node, b: &Node) -> Ordering {
    a.relevance
        .partial_cmp(&b.relevance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Pick up to `count` non-pinned nodes to evict, in eviction order.
pub fn select_evictions<'a>(nodes: impl IntoIterator<Item = &'a Node>, count: usize) -> Vec<NodeId> {
    if count == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<&Node> = nodes.into_iter().filter(|n| !n.pinned).collect();
    candidates.sort_by(|a, b| eviction_order(a, b));
    candidates
        .into_iter()
        .take(count)
        .map(|n| n.id.clone())
        .collect()
}

/// Nodes to evict so every type with a quota is at or under it.
///
/// Pinned nodes are never selected, so a type whose pinned nodes alone
/// exceed the quota stays over it.
pub fn over_quota_victims<'a>(
    config: &GraphConfig,
    nodes: impl IntoIterator<Item = &'a Node>,
) -> Vec<NodeId> {
    let mut by_type: HashMap<&NodeType, Vec<&Node>> = HashMap::new();
    for node in nodes {
        by_type.entry(&node.node_type).or_default().push(node);
    }

    let mut types: Vec<&NodeType> = by_type.keys().copied().collect();
    types.sort();

    let mut victims = Vec::new();
    for node_type in types {
        let Some(max) = config.quota_for(node_type) else {
            continue;
        };
        let members = &by_type[node_type];
        if members.len() > max {
            let excess = members.len() - max;
            victims.extend(select_evictions(members.iter().copied(), excess));
        }
    }
    victims
}
