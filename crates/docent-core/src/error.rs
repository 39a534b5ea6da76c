//! Typed failures for the retrieval and generation pipeline.
//!
//! Every fallible core operation returns [`RagError`]. The variants map
//! one-to-one onto how a caller should react: fix the request
//! ([`RagError::InvalidInput`]), report an infrastructure fault
//! ([`RagError::Storage`], [`RagError::Embedding`]), or report that the
//! text-generation backend failed ([`RagError::Generation`]).

use thiserror::Error;

/// Result alias used throughout `docent-core`.
pub type Result<T> = std::result::Result<T, RagError>;

/// Failure taxonomy of the RAG core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RagError {
    /// Empty question or user id, blank text to embed, wrong vector
    /// dimension, out-of-range parameter. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The vector store or database is unreachable or returned malformed data.
    #[error("storage error: {0}")]
    Storage(String),

    /// The embedding backend failed (unreachable, malformed response).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The generation backend was unreachable, timed out, or returned a
    /// blank completion.
    #[error("generation error: {0}")]
    Generation(String),
}

impl RagError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RagError::InvalidInput(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        RagError::Storage(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        RagError::Embedding(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        RagError::Generation(message.into())
    }

    /// Short machine-readable code, used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::InvalidInput(_) => "bad_request",
            RagError::Storage(_) => "storage_error",
            RagError::Embedding(_) => "embedding_error",
            RagError::Generation(_) => "generation_error",
        }
    }
}
