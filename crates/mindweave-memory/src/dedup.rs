//! Duplicate detection run by `add_node` before a node is created.
//!
//! A detected duplicate turns the insertion into a reinforcement of the
//! existing node.

use crate::graph::Graph;
use crate::similarity::{cosine_similarity, normalize_content, word_overlap};
use mindweave_types::memory::{NewNode, NodeId};
use tracing::debug;

/// Decides whether a candidate node duplicates an existing one.
pub trait DuplicateDetector: Send + Sync {
    /// Return the id of the existing node the candidate duplicates, if any.
    fn find_duplicate(&self, graph: &Graph, candidate: &NewNode) -> Option<NodeId>;
}

/// Detector that never reports duplicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDedup;

impl DuplicateDetector for NoDedup {
    fn find_duplicate(&self, _graph: &Graph, _candidate: &NewNode) -> Option<NodeId> {
        None
    }
}

/// Text-based detector, scoped to nodes of the candidate's type.
///
/// Checks, in order: exact match after normalisation, word overlap, and
/// embedding similarity when both sides carry an embedding.
#[derive(Debug, Clone)]
pub struct TextDuplicateDetector {
    /// Minimum Jaccard word overlap to count as a duplicate.
    pub word_overlap_threshold: f32,
    /// Minimum cosine similarity of embeddings to count as a duplicate.
    pub embedding_threshold: f32,
}

impl Default for TextDuplicateDetector {
    fn default() -> Self {
        Self {
            word_overlap_threshold: 0.85,
            embedding_threshold: 0.95,
        }
    }
}

impl DuplicateDetector for TextDuplicateDetector {
    fn find_duplicate(&self, graph: &Graph, candidate: &NewNode) -> Option<NodeId> {
        let normalized = normalize_content(&candidate.content);
        let same_type = || {
            graph
                .nodes()
                .filter(move |n| n.node_type == candidate.node_type)
        };

        if let Some(node) = same_type().find(|n| normalize_content(&n.content) == normalized) {
            debug!(node_id = %node.id, "Exact duplicate");
            return Some(node.id.clone());
        }

        let best_overlap = same_type()
            .map(|n| (word_overlap(&n.content, &candidate.content), n))
            .filter(|(score, _)| *score >= self.word_overlap_threshold)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((score, node)) = best_overlap {
            debug!(node_id = %node.id, score, "Word-overlap duplicate");
            return Some(node.id.clone());
        }

        let query = candidate.metadata.embedding.as_deref()?;
        let best_embedding = same_type()
            .filter_map(|n| {
                let emb = n.metadata.embedding.as_deref()?;
                Some((cosine_similarity(query, emb), n))
            })
            .filter(|(score, _)| *score >= self.embedding_threshold)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        best_embedding.map(|(score, node)| {
            debug!(node_id = %node.id, score, "Embedding duplicate");
            node.id.clone()
        })
    }
}
