//! Storage abstraction for Docent.
//!
//! The [`VectorStore`] trait defines every persistence operation the
//! ingestion and retrieval pipeline needs, so the pipeline runs unchanged
//! over SQLite (in the `docent` crate) or the [`memory::InMemoryStore`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes and
//! report backend failures as [`RagError::Storage`](crate::error::RagError).

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    Document, DocumentChunk, DocumentSummary, Embedding, QueryFeedback, RagQueryRecord,
    ScoredChunk,
};
use crate::search::SimilarityQuery;

/// Population status of the vector store, optionally scoped to one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseStatus {
    pub document_count: i64,
    pub embedding_count: i64,
    pub has_documents: bool,
    pub has_embeddings: bool,
    /// True when both documents and embeddings exist.
    pub is_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatabaseStatus {
    pub fn from_counts(document_count: i64, embedding_count: i64) -> Self {
        let has_documents = document_count > 0;
        let has_embeddings = embedding_count > 0;
        Self {
            document_count,
            embedding_count,
            has_documents,
            has_embeddings,
            is_ready: has_documents && has_embeddings,
            error: None,
        }
    }

    /// Status used when the store could not be queried at all.
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Operator-facing advice for the current state.
    pub fn recommendation(&self) -> String {
        if self.error.is_some() {
            return "The database connection has a problem. Contact a system administrator."
                .to_string();
        }
        if !self.has_documents {
            return "No documents have been uploaded. Upload documents before using RAG queries."
                .to_string();
        }
        if !self.has_embeddings {
            return "No embeddings have been generated. Wait for document processing to finish or contact an administrator.".to_string();
        }
        format!(
            "System is operating normally. {} documents and {} embeddings are ready.",
            self.document_count, self.embedding_count
        )
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](VectorStore::insert_document) | Persist a new document with its chunks |
/// | [`upsert_embedding`](VectorStore::upsert_embedding) | Store the vector for a chunk |
/// | [`similarity_search`](VectorStore::similarity_search) | Owner-filtered cosine search |
/// | [`database_status`](VectorStore::database_status) | Document/embedding counts |
/// | [`record_query`](VectorStore::record_query) | Write a query audit record |
/// | [`attach_feedback`](VectorStore::attach_feedback) | Update feedback on an audit record |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimension every stored embedding must have.
    fn dims(&self) -> usize;

    /// Persist a document together with its chunks. Either everything is
    /// written or nothing is. Every chunk must belong to `doc` and chunk
    /// indices must be unique.
    async fn insert_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()>;

    /// Store or replace the embedding of a chunk.
    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()>;

    /// Fetch a document if it exists and is owned by `user_id`.
    async fn get_document(&self, id: &str, user_id: &str) -> Result<Option<Document>>;

    /// All documents owned by `user_id`, newest first.
    async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentSummary>>;

    /// Delete a document with its chunks and embeddings. Returns `false`
    /// when no document with that id is owned by `user_id`.
    async fn delete_document(&self, id: &str, user_id: &str) -> Result<bool>;

    /// Delete every document owned by `user_id`. Returns the count removed.
    async fn purge_user(&self, user_id: &str) -> Result<u64>;

    /// Ranked chunks owned by `query.user_id` scoring at least
    /// `query.threshold`. An empty result is not an error.
    async fn similarity_search(&self, query: &SimilarityQuery<'_>) -> Result<Vec<ScoredChunk>>;

    /// Counts for one user, or across all users when `user_id` is `None`.
    async fn database_status(&self, user_id: Option<&str>) -> Result<DatabaseStatus>;

    async fn record_query(&self, record: &RagQueryRecord) -> Result<()>;

    /// Attach feedback to a query owned by `user_id`. Returns `false` when the
    /// query does not exist for that user.
    async fn attach_feedback(
        &self,
        query_id: &str,
        user_id: &str,
        feedback: &QueryFeedback,
    ) -> Result<bool>;

    /// Fetch one query audit record owned by `user_id`.
    async fn get_query(&self, query_id: &str, user_id: &str) -> Result<Option<RagQueryRecord>>;
}
