//! SQLite-backed [`VectorStore`].
//!
//! Vectors are stored as little-endian `f32` BLOBs in the `embeddings` table
//! and scored in Rust with cosine similarity. The owner filter is applied in
//! SQL by joining chunks to their documents, so another user's chunks never
//! reach the scorer. Ties in the ranking are broken by `document_chunks.rowid`
//! (insertion order).
//!
//! Every `sqlx::Error` is mapped to [`RagError::Storage`] with the name of the
//! operation that failed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use docent_core::embedding::{blob_to_vec, vec_to_blob};
use docent_core::error::{RagError, Result};
use docent_core::models::{
    Document, DocumentChunk, DocumentSummary, Embedding, FileMetadata, QueryFeedback,
    RagQueryRecord, ScoredChunk,
};
use docent_core::search::{self, Candidate, SimilarityQuery};
use docent_core::store::{DatabaseStatus, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn storage_err(operation: &'static str) -> impl Fn(sqlx::Error) -> RagError {
    move |e| RagError::storage(format!("{} failed: {}", operation, e))
}

fn to_datetime(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| RagError::storage(format!("invalid timestamp in database: {}", ts)))
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let get = storage_err("decode document");
    let file_path: Option<String> = row.try_get("file_path").map_err(&get)?;
    let file_type: Option<String> = row.try_get("file_type").map_err(&get)?;
    let file_size: Option<i64> = row.try_get("file_size").map_err(&get)?;
    let file = if file_path.is_some() || file_type.is_some() || file_size.is_some() {
        Some(FileMetadata {
            path: file_path,
            file_type,
            size: file_size,
        })
    } else {
        None
    };
    Ok(Document {
        id: row.try_get("id").map_err(&get)?,
        user_id: row.try_get("user_id").map_err(&get)?,
        title: row.try_get("title").map_err(&get)?,
        content: row.try_get("content").map_err(&get)?,
        file,
        created_at: to_datetime(row.try_get("created_at").map_err(&get)?)?,
        updated_at: to_datetime(row.try_get("updated_at").map_err(&get)?)?,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()> {
        let file = doc.file.as_ref();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_err("begin transaction"))?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, title, content, file_path, file_type, file_size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.user_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(file.and_then(|f| f.path.as_deref()))
        .bind(file.and_then(|f| f.file_type.as_deref()))
        .bind(file.and_then(|f| f.size))
        .bind(doc.created_at.timestamp())
        .bind(doc.updated_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(storage_err("insert document"))?;

        for chunk in chunks {
            if chunk.document_id != doc.id {
                return Err(RagError::storage(format!(
                    "chunk {} references document {}, expected {}",
                    chunk.id, chunk.document_id, doc.id
                )));
            }
            sqlx::query(
                r#"
                INSERT INTO document_chunks (id, document_id, chunk_index, content, chunk_size, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.chunk_size)
            .bind(chunk.created_at.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(storage_err("insert chunk"))?;
        }

        // Dropping the transaction on any early return rolls it back.
        tx.commit().await.map_err(storage_err("commit document"))?;
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
        sqlx::query(
            r#"
            INSERT INTO embeddings (id, chunk_id, model, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(&embedding.id)
        .bind(&embedding.chunk_id)
        .bind(&embedding.model)
        .bind(embedding.dims() as i64)
        .bind(vec_to_blob(embedding.vector()))
        .bind(embedding.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err("upsert embedding"))?;
        Ok(())
    }

    async fn get_document(&self, id: &str, user_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("get document"))?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.title, d.file_type, d.created_at, COUNT(c.id) AS chunk_count
            FROM documents d
            LEFT JOIN document_chunks c ON c.document_id = d.id
            WHERE d.user_id = ?
            GROUP BY d.id
            ORDER BY d.created_at DESC, d.rowid DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("list documents"))?;

        let get = storage_err("decode document summary");
        rows.iter()
            .map(|row| -> Result<DocumentSummary> {
                Ok(DocumentSummary {
                    id: row.try_get("id").map_err(&get)?,
                    title: row.try_get("title").map_err(&get)?,
                    file_type: row.try_get("file_type").map_err(&get)?,
                    chunk_count: row.try_get("chunk_count").map_err(&get)?,
                    created_at: to_datetime(row.try_get("created_at").map_err(&get)?)?,
                })
            })
            .collect()
    }

    async fn delete_document(&self, id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err("delete document"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_user(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err("purge documents"))?;
        Ok(result.rows_affected())
    }

    async fn similarity_search(&self, query: &SimilarityQuery<'_>) -> Result<Vec<ScoredChunk>> {
        query.validate(self.dims)?;

        let rows = sqlx::query(
            r#"
            SELECT c.rowid AS seq, c.id, c.document_id, c.chunk_index, c.content, e.vector
            FROM document_chunks c
            JOIN embeddings e ON e.chunk_id = c.id
            JOIN documents d ON d.id = c.document_id
            WHERE d.user_id = ?
            "#,
        )
        .bind(query.user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("similarity search"))?;

        let get = storage_err("decode search row");
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("vector").map_err(&get)?;
            if blob.len() != self.dims * 4 {
                return Err(RagError::storage(format!(
                    "malformed vector BLOB: {} bytes, expected {}",
                    blob.len(),
                    self.dims * 4
                )));
            }
            let stored = blob_to_vec(&blob);
            candidates.push(Candidate {
                seq: row.try_get("seq").map_err(&get)?,
                hit: ScoredChunk {
                    chunk_id: row.try_get("id").map_err(&get)?,
                    document_id: row.try_get("document_id").map_err(&get)?,
                    chunk_index: row.try_get("chunk_index").map_err(&get)?,
                    content: row.try_get("content").map_err(&get)?,
                    similarity_score: search::score(query.vector, &stored),
                },
            });
        }

        Ok(search::rank(candidates, query.threshold, query.limit))
    }

    async fn database_status(&self, user_id: Option<&str>) -> Result<DatabaseStatus> {
        let documents: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE ?1 IS NULL OR user_id = ?1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(storage_err("count documents"))?;

        let embeddings: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM embeddings e
            JOIN document_chunks c ON c.id = e.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE ?1 IS NULL OR d.user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err("count embeddings"))?;

        Ok(DatabaseStatus::from_counts(documents, embeddings))
    }

    async fn record_query(&self, record: &RagQueryRecord) -> Result<()> {
        let context_documents = serde_json::to_string(&record.context_documents)
            .map_err(|e| RagError::storage(format!("encode context documents: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO rag_queries (id, user_id, question, answer, context_documents, confidence_score, feedback, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(context_documents)
        .bind(record.confidence_score.map(i64::from))
        .bind(record.feedback.as_deref())
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err("record query"))?;
        Ok(())
    }

    async fn attach_feedback(
        &self,
        query_id: &str,
        user_id: &str,
        feedback: &QueryFeedback,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rag_queries
            SET confidence_score = COALESCE(?, confidence_score),
                feedback = COALESCE(?, feedback)
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(feedback.confidence_score.map(i64::from))
        .bind(feedback.feedback.as_deref())
        .bind(query_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err("attach feedback"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_query(&self, query_id: &str, user_id: &str) -> Result<Option<RagQueryRecord>> {
        let row = sqlx::query("SELECT * FROM rag_queries WHERE id = ? AND user_id = ?")
            .bind(query_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("get query"))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let get = storage_err("decode query");
        let context_json: String = row.try_get("context_documents").map_err(&get)?;
        let context_documents: Vec<String> = serde_json::from_str(&context_json)
            .map_err(|e| RagError::storage(format!("decode context documents: {}", e)))?;
        let confidence: Option<i64> = row.try_get("confidence_score").map_err(&get)?;
        let confidence_score = confidence
            .map(|c| {
                u8::try_from(c)
                    .map_err(|_| RagError::storage(format!("confidence out of range: {}", c)))
            })
            .transpose()?;

        Ok(Some(RagQueryRecord {
            id: row.try_get("id").map_err(&get)?,
            user_id: row.try_get("user_id").map_err(&get)?,
            question: row.try_get("question").map_err(&get)?,
            answer: row.try_get("answer").map_err(&get)?,
            context_documents,
            confidence_score,
            feedback: row.try_get("feedback").map_err(&get)?,
            created_at: to_datetime(row.try_get("created_at").map_err(&get)?)?,
        }))
    }
}
