//! In-memory [`VectorStore`] implementation for tests and embedding callers
//! that do not need persistence.
//!
//! All state lives behind a single `std::sync::RwLock`. Similarity search is
//! brute-force cosine similarity over every stored vector owned by the
//! requesting user.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{
    Document, DocumentChunk, DocumentSummary, Embedding, QueryFeedback, RagQueryRecord,
    ScoredChunk,
};
use crate::search::{self, Candidate, SimilarityQuery};

use super::{DatabaseStatus, VectorStore};

#[derive(Default)]
struct Inner {
    next_seq: i64,
    docs: HashMap<String, (i64, Document)>,
    chunks: Vec<(i64, DocumentChunk)>,
    embeddings: HashMap<String, Embedding>,
    queries: HashMap<String, RagQueryRecord>,
}

impl Inner {
    fn seq(&mut self) -> i64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn owner_of_chunk(&self, chunk: &DocumentChunk) -> Option<&str> {
        self.docs
            .get(&chunk.document_id)
            .map(|(_, d)| d.user_id.as_str())
    }

    fn remove_document(&mut self, id: &str) {
        self.docs.remove(id);
        let removed: Vec<String> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.document_id == id)
            .map(|(_, c)| c.id.clone())
            .collect();
        self.chunks.retain(|(_, c)| c.document_id != id);
        for chunk_id in removed {
            self.embeddings.remove(&chunk_id);
        }
    }
}

/// In-memory store with a fixed embedding dimension.
pub struct InMemoryStore {
    dims: usize,
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            inner: RwLock::new(Inner::default()),
        }
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RagError {
    RagError::storage("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.docs.contains_key(&doc.id) {
            return Err(RagError::storage(format!("document {} already exists", doc.id)));
        }
        // Validate the whole batch before touching state.
        let mut indices = HashSet::new();
        for c in chunks {
            if c.document_id != doc.id {
                return Err(RagError::storage(format!(
                    "chunk {} references document {}, expected {}",
                    c.id, c.document_id, doc.id
                )));
            }
            if !indices.insert(c.chunk_index) {
                return Err(RagError::storage(format!(
                    "duplicate chunk index {} for document {}",
                    c.chunk_index, c.document_id
                )));
            }
        }

        let seq = inner.seq();
        inner.docs.insert(doc.id.clone(), (seq, doc.clone()));
        for c in chunks {
            let seq = inner.seq();
            inner.chunks.push((seq, c.clone()));
        }
        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        if embedding.dims() != self.dims {
            return Err(RagError::invalid(format!(
                "embedding dimension mismatch: store expects {}, got {}",
                self.dims,
                embedding.dims()
            )));
        }
        let mut inner = self.inner.write().map_err(poisoned)?;
        if !inner.chunks.iter().any(|(_, c)| c.id == embedding.chunk_id) {
            return Err(RagError::storage(format!(
                "embedding references missing chunk {}",
                embedding.chunk_id
            )));
        }
        inner
            .embeddings
            .insert(embedding.chunk_id.clone(), embedding.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str, user_id: &str) -> Result<Option<Document>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .docs
            .get(id)
            .filter(|(_, d)| d.user_id == user_id)
            .map(|(_, d)| d.clone()))
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentSummary>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut owned: Vec<&(i64, Document)> = inner
            .docs
            .values()
            .filter(|(_, d)| d.user_id == user_id)
            .collect();
        owned.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at).then(b.0.cmp(&a.0)));
        Ok(owned
            .into_iter()
            .map(|(_, d)| DocumentSummary {
                id: d.id.clone(),
                title: d.title.clone(),
                file_type: d.file.as_ref().and_then(|f| f.file_type.clone()),
                chunk_count: inner
                    .chunks
                    .iter()
                    .filter(|(_, c)| c.document_id == d.id)
                    .count() as i64,
                created_at: d.created_at,
            })
            .collect())
    }

    async fn delete_document(&self, id: &str, user_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let owned = matches!(inner.docs.get(id), Some((_, d)) if d.user_id == user_id);
        if owned {
            inner.remove_document(id);
        }
        Ok(owned)
    }

    async fn purge_user(&self, user_id: &str) -> Result<u64> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let ids: Vec<String> = inner
            .docs
            .values()
            .filter(|(_, d)| d.user_id == user_id)
            .map(|(_, d)| d.id.clone())
            .collect();
        for id in &ids {
            inner.remove_document(id);
        }
        Ok(ids.len() as u64)
    }

    async fn similarity_search(&self, query: &SimilarityQuery<'_>) -> Result<Vec<ScoredChunk>> {
        query.validate(self.dims)?;
        let inner = self.inner.read().map_err(poisoned)?;
        let candidates = inner
            .chunks
            .iter()
            .filter(|(_, c)| inner.owner_of_chunk(c) == Some(query.user_id))
            .filter_map(|(seq, c)| {
                inner.embeddings.get(&c.id).map(|e| Candidate {
                    seq: *seq,
                    hit: ScoredChunk {
                        chunk_id: c.id.clone(),
                        document_id: c.document_id.clone(),
                        chunk_index: c.chunk_index,
                        content: c.content.clone(),
                        similarity_score: search::score(query.vector, e.vector()),
                    },
                })
            });
        Ok(search::rank(candidates, query.threshold, query.limit))
    }

    async fn database_status(&self, user_id: Option<&str>) -> Result<DatabaseStatus> {
        let inner = self.inner.read().map_err(poisoned)?;
        let in_scope = |owner: &str| user_id.map_or(true, |u| u == owner);
        let documents = inner
            .docs
            .values()
            .filter(|(_, d)| in_scope(&d.user_id))
            .count() as i64;
        let embeddings = inner
            .chunks
            .iter()
            .filter(|(_, c)| inner.embeddings.contains_key(&c.id))
            .filter(|(_, c)| inner.owner_of_chunk(c).map_or(false, &in_scope))
            .count() as i64;
        Ok(DatabaseStatus::from_counts(documents, embeddings))
    }

    async fn record_query(&self, record: &RagQueryRecord) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.queries.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn attach_feedback(
        &self,
        query_id: &str,
        user_id: &str,
        feedback: &QueryFeedback,
    ) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        match inner.queries.get_mut(query_id) {
            Some(record) if record.user_id == user_id => {
                if feedback.confidence_score.is_some() {
                    record.confidence_score = feedback.confidence_score;
                }
                if feedback.feedback.is_some() {
                    record.feedback = feedback.feedback.clone();
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_query(&self, query_id: &str, user_id: &str) -> Result<Option<RagQueryRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .queries
            .get(query_id)
            .filter(|r| r.user_id == user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;

    async fn seed(store: &InMemoryStore, user: &str, text: &str, vector: Vec<f32>) -> Document {
        let doc = Document::new(user, "doc", text, None).unwrap();
        let chunks = chunk_text(&doc.id, text, 1000, 0);
        store.insert_document(&doc, &chunks).await.unwrap();
        let emb = Embedding::new(&chunks[0].id, vector, "test", 2).unwrap();
        store.upsert_embedding(&emb).await.unwrap();
        doc
    }

    #[tokio::test]
    async fn test_search_is_owner_filtered() {
        let store = InMemoryStore::new(2);
        seed(&store, "alice", "alice text", vec![1.0, 0.0]).await;
        seed(&store, "bob", "bob text", vec![1.0, 0.0]).await;

        let q = [1.0f32, 0.0];
        let hits = store
            .similarity_search(&SimilarityQuery {
                vector: &q,
                threshold: 0.0,
                limit: 10,
                user_id: "alice",
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "alice text");
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = InMemoryStore::new(2);
        let doc = seed(&store, "alice", "alice text", vec![1.0, 0.0]).await;

        assert!(!store.delete_document(&doc.id, "bob").await.unwrap());
        assert!(store.delete_document(&doc.id, "alice").await.unwrap());

        let status = store.database_status(Some("alice")).await.unwrap();
        assert_eq!(status.document_count, 0);
        assert_eq!(status.embedding_count, 0);
    }

    #[tokio::test]
    async fn test_status_scoped_by_user() {
        let store = InMemoryStore::new(2);
        seed(&store, "alice", "a", vec![1.0, 0.0]).await;
        seed(&store, "alice", "b", vec![0.0, 1.0]).await;
        seed(&store, "bob", "c", vec![1.0, 1.0]).await;

        let alice = store.database_status(Some("alice")).await.unwrap();
        assert_eq!((alice.document_count, alice.embedding_count), (2, 2));
        let all = store.database_status(None).await.unwrap();
        assert_eq!((all.document_count, all.embedding_count), (3, 3));
        let carol = store.database_status(Some("carol")).await.unwrap();
        assert!(!carol.is_ready);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_index_writes_nothing() {
        let store = InMemoryStore::new(2);
        let doc = Document::new("alice", "doc", "text", None).unwrap();
        let mut chunks = chunk_text(&doc.id, "text", 1000, 0);
        chunks.extend(chunk_text(&doc.id, "other text", 1000, 0));
        let err = store.insert_document(&doc, &chunks).await.unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));

        assert!(store.get_document(&doc.id, "alice").await.unwrap().is_none());
        assert!(store.list_documents("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_chunk_rejected() {
        let store = InMemoryStore::new(2);
        let doc = Document::new("alice", "doc", "text", None).unwrap();
        let chunks = chunk_text("some-other-document", "text", 1000, 0);
        let err = store.insert_document(&doc, &chunks).await.unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
        assert!(store.list_documents("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feedback_requires_owner() {
        let store = InMemoryStore::new(2);
        let record = RagQueryRecord::new("alice", "q", "a", vec![]);
        store.record_query(&record).await.unwrap();
        let fb = QueryFeedback {
            confidence_score: Some(8),
            feedback: Some("good".to_string()),
        };
        assert!(!store.attach_feedback(&record.id, "bob", &fb).await.unwrap());
        assert!(store.attach_feedback(&record.id, "alice", &fb).await.unwrap());
        let stored = store.get_query(&record.id, "alice").await.unwrap().unwrap();
        assert_eq!(stored.confidence_score, Some(8));
        assert_eq!(stored.feedback.as_deref(), Some("good"));
    }
}
