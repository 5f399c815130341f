//! Shared error types for the Mindweave memory substrate.

use thiserror::Error;

/// Top-level error type for Mindweave operations.
#[derive(Error, Debug)]
pub enum MindweaveError {
    /// The requested node, edge endpoint or index entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing required fields or out-of-range values.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation is not supported by the configured index backend.
    #[error("Operation '{operation}' is not supported by the '{backend}' backend")]
    BackendMismatch {
        /// The operation that was attempted.
        operation: String,
        /// The backend the index is configured with.
        backend: String,
    },

    /// An operation was attempted too soon after the previous one.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Computing an embedding failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The persistent vector store or archive failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MindweaveError {
    /// Build a `BackendMismatch` error.
    pub fn backend_mismatch(operation: impl Into<String>, backend: impl ToString) -> Self {
        Self::BackendMismatch {
            operation: operation.into(),
            backend: backend.to_string(),
        }
    }

    /// Whether this error reports a missing node or entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Alias for Result with MindweaveError.
pub type MindweaveResult<T> = Result<T, MindweaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_mismatch_message() {
        let err = MindweaveError::backend_mismatch("warm_cache", "ephemeral");
        assert_eq!(
            err.to_string(),
            "Operation 'warm_cache' is not supported by the 'ephemeral' backend"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(MindweaveError::NotFound("fact_1".into()).is_not_found());
        assert!(!MindweaveError::InvalidInput("x".into()).is_not_found());
    }
}
