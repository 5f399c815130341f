//! Similarity and scoring helpers shared by the graph, the consolidation
//! engine and the semantic index.

use mindweave_types::agent::AgentId;
use mindweave_types::index::EntryId;
use mindweave_types::memory::Node;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1.0, 1.0]. Mismatched lengths, empty vectors and zero
/// vectors all score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// Lowercase word set of a text. Words are maximal runs of alphanumerics.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard overlap of the word sets of two texts, in [0.0, 1.0].
pub fn word_overlap(a: &str, b: &str) -> f32 {
    let wa = word_set(a);
    let wb = word_set(b);
    if wa.is_empty() && wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    intersection as f32 / union as f32
}

/// Lowercase, whitespace-collapsed form used for exact-match comparisons.
pub fn normalize_content(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic digest of raw content: lowercase hex SHA-256.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Id of the persistent record holding `content` for `agent_id`.
///
/// Derived from the agent and the content hash, so repeated upserts of the
/// same content keep the same id.
pub fn record_id(agent_id: &AgentId, content: &str) -> EntryId {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(content_hash(content).as_bytes());
    let digest = hex::encode(hasher.finalize());
    EntryId(format!("vec_{}", &digest[..32]))
}

/// Mean relevance of a set of nodes, `0.0` when empty.
pub fn average_relevance<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> f32 {
    let (sum, count) = nodes
        .into_iter()
        .fold((0.0f64, 0u64), |(sum, count), n| {
            (sum + n.relevance as f64, count + 1)
        });
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Serialize an embedding vector to bytes (for SQLite BLOB storage).
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding vector from bytes.
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![0.3, -1.2, 4.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = vec![0.1, 0.2, 0.3, 0.4];
        let b = vec![0.4, 0.3, 0.2, 0.1];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        let sim = cosine_similarity(&a, &b);
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&zero, &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_word_overlap() {
        assert_eq!(word_overlap("the cat sat", "The cat sat!"), 1.0);
        let partial = word_overlap("rust is fast", "rust is safe");
        assert!((partial - 0.5).abs() < 1e-6);
        assert_eq!(word_overlap("", ""), 0.0);
        assert_eq!(word_overlap("alpha", "beta"), 0.0);
    }

    #[test]
    fn test_normalize_content() {
        assert_eq!(normalize_content("  Hello \n  World "), "hello world");
    }

    #[test]
    fn test_content_hash_deterministic() {
        let a = content_hash("Hello");
        assert_eq!(a, content_hash("Hello"));
        assert_ne!(a, content_hash("hello"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_record_id_scoped_by_agent() {
        let a = AgentId::from("a");
        let b = AgentId::from("b");
        assert_eq!(record_id(&a, "x"), record_id(&a, "x"));
        assert_ne!(record_id(&a, "x"), record_id(&b, "x"));
        assert!(record_id(&a, "x").as_str().starts_with("vec_"));
    }

    #[test]
    fn test_embedding_roundtrip() {
        let embedding = vec![0.1, -0.5, 1.23456, 0.0, -1e10, 1e10];
        let recovered = embedding_from_bytes(&embedding_to_bytes(&embedding));
        assert_eq!(embedding, recovered);
        assert!(embedding_from_bytes(&[]).is_empty());
    }
}
