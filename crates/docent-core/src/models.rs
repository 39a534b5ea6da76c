//! Core data models used throughout Docent.
//!
//! These types represent the documents, chunks, embeddings, and query audit
//! records that flow through the ingestion and retrieval pipeline. Every
//! constructor that can observe an invariant violation validates eagerly and
//! returns [`RagError::InvalidInput`] instead of producing a bad value.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{RagError, Result};

/// File types accepted for upload.
pub const ALLOWED_FILE_TYPES: &[&str] = &["pdf", "docx", "txt", "md"];

/// Maximum length of a document title, in characters.
pub const MAX_TITLE_CHARS: usize = 255;

/// Maximum length of free-text feedback on a query, in characters.
pub const MAX_FEEDBACK_CHARS: usize = 500;

/// Optional metadata describing the file a document was uploaded from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMetadata {
    pub path: Option<String>,
    pub file_type: Option<String>,
    pub size: Option<i64>,
}

impl FileMetadata {
    /// Normalize and validate: file type is lower-cased and must be one of
    /// [`ALLOWED_FILE_TYPES`]; size must be positive.
    pub fn validated(self) -> Result<Self> {
        let file_type = match self.file_type {
            Some(ft) => {
                let ft = ft.trim().trim_start_matches('.').to_lowercase();
                if !ALLOWED_FILE_TYPES.contains(&ft.as_str()) {
                    return Err(RagError::invalid(format!(
                        "unsupported file type: {} (allowed: {})",
                        ft,
                        ALLOWED_FILE_TYPES.join(", ")
                    )));
                }
                Some(ft)
            }
            None => None,
        };
        if let Some(size) = self.size {
            if size <= 0 {
                return Err(RagError::invalid("file size must be > 0"));
            }
        }
        Ok(Self {
            path: self.path,
            file_type,
            size: self.size,
        })
    }
}

/// An uploaded document, exclusively owned by `user_id`.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub file: Option<FileMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Build a new document with a fresh UUID. Title and content are trimmed
    /// and must be non-empty.
    pub fn new(
        user_id: &str,
        title: &str,
        content: &str,
        file: Option<FileMetadata>,
    ) -> Result<Self> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(RagError::invalid("user_id must not be empty"));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(RagError::invalid("document title must not be empty"));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(RagError::invalid(format!(
                "document title exceeds {} characters",
                MAX_TITLE_CHARS
            )));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(RagError::invalid("document content must not be empty"));
        }
        let file = file.map(FileMetadata::validated).transpose()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            file,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A contiguous slice of a document's text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    /// 0-based position within the document; defines reconstruction order.
    pub chunk_index: i64,
    pub content: String,
    /// Length of `content` in characters.
    pub chunk_size: i64,
    pub created_at: DateTime<Utc>,
}

/// An embedding vector attached 1:1 to a [`DocumentChunk`].
///
/// The vector is private so that the only way to obtain an `Embedding` is
/// through [`Embedding::new`], which enforces the configured dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub id: String,
    pub chunk_id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    vector: Vec<f32>,
}

impl Embedding {
    /// Create an embedding, failing when `vector.len() != expected_dims`.
    pub fn new(chunk_id: &str, vector: Vec<f32>, model: &str, expected_dims: usize) -> Result<Self> {
        if vector.is_empty() {
            return Err(RagError::invalid("embedding vector must not be empty"));
        }
        if vector.len() != expected_dims {
            return Err(RagError::invalid(format!(
                "embedding dimension mismatch: expected {}, got {}",
                expected_dims,
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(RagError::invalid("embedding vector contains non-finite values"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            chunk_id: chunk_id.to_string(),
            model: model.to_string(),
            created_at: Utc::now(),
            vector,
        })
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn dims(&self) -> usize {
        self.vector.len()
    }
}

/// A retrieved chunk together with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub similarity_score: f64,
}

/// Lightweight listing entry for a user's documents.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub file_type: Option<String>,
    pub chunk_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Audit record of one question/answer transaction.
///
/// Write-once except for `confidence_score` and `feedback`, which are
/// attached later through [`QueryFeedback`].
#[derive(Debug, Clone, Serialize)]
pub struct RagQueryRecord {
    pub id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    /// Referenced document IDs; may be empty (fallback answers).
    pub context_documents: Vec<String>,
    /// User-assigned score on a 1–10 scale.
    pub confidence_score: Option<u8>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RagQueryRecord {
    pub fn new(user_id: &str, question: &str, answer: &str, context_documents: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            context_documents,
            confidence_score: None,
            feedback: None,
            created_at: Utc::now(),
        }
    }
}

/// Feedback attached to a [`RagQueryRecord`] after the fact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFeedback {
    pub confidence_score: Option<u8>,
    pub feedback: Option<String>,
}

impl QueryFeedback {
    /// Validate ranges and blank out whitespace-only feedback.
    pub fn validated(self) -> Result<Self> {
        if let Some(score) = self.confidence_score {
            if !(1..=10).contains(&score) {
                return Err(RagError::invalid("confidence_score must be between 1 and 10"));
            }
        }
        let feedback = match self.feedback {
            Some(text) => {
                let text = text.trim();
                if text.chars().count() > MAX_FEEDBACK_CHARS {
                    return Err(RagError::invalid(format!(
                        "feedback exceeds {} characters",
                        MAX_FEEDBACK_CHARS
                    )));
                }
                (!text.is_empty()).then(|| text.to_string())
            }
            None => None,
        };
        if self.confidence_score.is_none() && feedback.is_none() {
            return Err(RagError::invalid("feedback requires a confidence_score or text"));
        }
        Ok(Self {
            confidence_score: self.confidence_score,
            feedback,
        })
    }
}
