//! Conversation indexer error types

use thiserror::Error;

/// Errors raised while building or querying the conversation index
#[derive(Error, Debug)]
pub enum IndexError {
    /// Session directory could not be walked
    #[error("Failed to scan sessions: {0}")]
    Scan(String),

    /// The embedding service could not be reached or refused the request
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    /// The embedding service returned something unusable
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    /// A vector does not match the dimension of the index
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of vectors already in the index
        expected: usize,
        /// Dimension of the rejected vector
        actual: usize,
    },
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        IndexError::Embedding(err.to_string())
    }
}
