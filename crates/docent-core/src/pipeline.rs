//! End-to-end RAG coordinator.
//!
//! [`RagPipeline`] composes the [`Embedder`], a [`VectorStore`], the
//! retrieval state machine, and the [`AnswerGenerator`]. It is an explicitly
//! constructed service object: the app builds one at startup and shares it
//! (it is cheap to clone) between CLI commands or HTTP handlers.
//!
//! # Query flow
//!
//! 1. Validate the request and resolve defaults.
//! 2. Embed the question and run [`retrieve`] (timed as `search_time_ms`).
//! 3. Generate a grounded or fallback answer (timed as `generation_time_ms`).
//! 4. Build source attributions and the confidence score.
//! 5. Optionally write a [`RagQueryRecord`] audit row.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chunk::chunk_text;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::generation::{AnswerGenerator, GenerationOptions, GenerationRequest};
use crate::models::{
    Document, Embedding, FileMetadata, QueryFeedback, RagQueryRecord, ScoredChunk,
};
use crate::retrieval::{
    retrieve, FallbackReason, RetrievalOutcome, DEFAULT_MAX_DOCUMENTS,
    DEFAULT_SIMILARITY_THRESHOLD,
};
use crate::search::SimilarityQuery;
use crate::store::{DatabaseStatus, VectorStore};

/// Maximum question length, in characters.
pub const MAX_QUESTION_CHARS: usize = 1000;
/// Upper bound for a caller-supplied `max_documents`.
pub const MAX_DOCUMENTS_LIMIT: usize = 20;
/// Characters of chunk content shown in a source preview.
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// Answer returned when fallback generation itself fails.
pub const DEGRADED_ANSWER: &str = "Sorry, no documents related to your question could be found and an answer cannot be generated right now. Please contact a system administrator.";

const LOG_QUESTION_CHARS: usize = 100;

/// Pipeline-wide defaults, normally loaded from the `[retrieval]`,
/// `[chunking]`, `[embedding]` and `[generation]` config sections.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub similarity_threshold: f64,
    pub max_documents: usize,
    pub preview_chars: usize,
    pub record_queries: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub generation: GenerationOptions,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_documents: DEFAULT_MAX_DOCUMENTS,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            record_queries: true,
            chunk_size: 1000,
            chunk_overlap: 200,
            embed_batch_size: 32,
            generation: GenerationOptions::default(),
        }
    }
}

/// Caller-facing query parameters. `None` fields take the pipeline defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub user_id: String,
    #[serde(default)]
    pub max_documents: Option<usize>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

struct ResolvedQuery<'a> {
    question: &'a str,
    user_id: &'a str,
    max_documents: usize,
    threshold: f64,
    options: GenerationOptions,
}

/// One retrieved chunk as shown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceAttribution {
    pub document_id: String,
    pub chunk_index: i64,
    /// Content preview, truncated with `...`.
    pub content: String,
    pub similarity_score: f64,
}

/// Structured result of [`RagPipeline::process_query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceAttribution>,
    pub confidence_score: f64,
    pub search_time_ms: u64,
    pub generation_time_ms: u64,
    pub fallback_mode: bool,
    pub retry_attempted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_threshold: Option<f64>,
    /// Set on the degraded response when fallback generation failed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    /// Store status, included when the user had nothing indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_status: Option<DatabaseStatus>,
    /// Audit record id, when the query was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

/// Input for [`RagPipeline::ingest`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub file: Option<FileMetadata>,
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub title: String,
    pub chunk_count: usize,
    pub embedded: usize,
    /// Chunks stored without an embedding because the backend failed or is
    /// disabled.
    pub pending_embeddings: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorHealth {
    pub status: &'static str,
    pub model: String,
    pub info: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorDatabaseHealth {
    pub status: &'static str,
    #[serde(flatten)]
    pub details: DatabaseStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingHealth {
    pub status: &'static str,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthComponents {
    pub generator: GeneratorHealth,
    pub vector_database: VectorDatabaseHealth,
    pub embedding_service: EmbeddingHealth,
}

/// Aggregated component health. Building it never fails.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub service: &'static str,
    pub status: HealthStatus,
    pub components: HealthComponents,
}

/// The RAG service object.
#[derive(Clone)]
pub struct RagPipeline {
    embedder: Embedder,
    store: Arc<dyn VectorStore>,
    generator: AnswerGenerator,
    settings: PipelineSettings,
}

impl RagPipeline {
    pub fn new(
        embedder: Embedder,
        store: Arc<dyn VectorStore>,
        generator: AnswerGenerator,
        settings: PipelineSettings,
    ) -> Result<Self> {
        if embedder.dims() != store.dims() {
            return Err(RagError::invalid(format!(
                "embedder produces {}-dim vectors but the store expects {}",
                embedder.dims(),
                store.dims()
            )));
        }
        Ok(Self {
            embedder,
            store,
            generator,
            settings,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn generator(&self) -> &AnswerGenerator {
        &self.generator
    }

    fn resolve<'a>(&self, request: &'a QueryRequest) -> Result<ResolvedQuery<'a>> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RagError::invalid("question must not be empty"));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(RagError::invalid(format!(
                "question exceeds {} characters",
                MAX_QUESTION_CHARS
            )));
        }
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(RagError::invalid("user_id must not be empty"));
        }

        let max_documents = request.max_documents.unwrap_or(self.settings.max_documents);
        if !(1..=MAX_DOCUMENTS_LIMIT).contains(&max_documents) {
            return Err(RagError::invalid(format!(
                "max_documents must be between 1 and {}",
                MAX_DOCUMENTS_LIMIT
            )));
        }
        let threshold = request
            .similarity_threshold
            .unwrap_or(self.settings.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RagError::invalid(
                "similarity_threshold must be between 0 and 1",
            ));
        }
        let temperature = request
            .temperature
            .unwrap_or(self.settings.generation.temperature);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(RagError::invalid("temperature must be between 0 and 1"));
        }

        Ok(ResolvedQuery {
            question,
            user_id,
            max_documents,
            threshold,
            options: GenerationOptions {
                temperature,
                ..self.settings.generation
            },
        })
    }

    /// Answer a question over the user's documents.
    ///
    /// Invalid input, storage, and embedding failures propagate. A failed
    /// grounded generation propagates as [`RagError::Generation`]. A failed
    /// fallback generation is absorbed into a degraded response with
    /// `error = true` and `confidence_score = 0.0`.
    pub async fn process_query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let q = self.resolve(request)?;
        info!(
            user_id = q.user_id,
            question = %truncate_chars(q.question, LOG_QUESTION_CHARS),
            threshold = q.threshold,
            max_documents = q.max_documents,
            "processing RAG query"
        );

        let search_start = Instant::now();
        let vector = self.embedder.encode(q.question).await?;
        let outcome = retrieve(
            self.store.as_ref(),
            &SimilarityQuery {
                vector: &vector,
                threshold: q.threshold,
                limit: q.max_documents,
                user_id: q.user_id,
            },
        )
        .await?;
        let search_time_ms = elapsed_ms(search_start);

        let generation_request = match &outcome {
            RetrievalOutcome::Grounded { hits, .. } => GenerationRequest::Grounded {
                question: q.question.to_string(),
                passages: hits.iter().map(|h| h.content.clone()).collect(),
            },
            RetrievalOutcome::Fallback(_) => GenerationRequest::Fallback {
                question: q.question.to_string(),
            },
        };

        let generation_start = Instant::now();
        let generated = self
            .generator
            .generate(&generation_request, &q.options)
            .await;
        let generation_time_ms = elapsed_ms(generation_start);

        let answer = match (generated, outcome.is_fallback()) {
            (Ok(answer), _) => answer,
            (Err(e), false) => {
                error!(error = %e, "grounded answer generation failed");
                return Err(e);
            }
            (Err(e), true) => {
                error!(error = %e, "fallback answer generation failed");
                return Ok(QueryResponse {
                    question: q.question.to_string(),
                    answer: DEGRADED_ANSWER.to_string(),
                    sources: Vec::new(),
                    confidence_score: 0.0,
                    search_time_ms,
                    generation_time_ms: 0,
                    fallback_mode: true,
                    retry_attempted: outcome.retry_attempted(),
                    retry_threshold: outcome.retry_threshold(),
                    error: true,
                    db_status: None,
                    query_id: None,
                });
            }
        };

        let sources = outcome
            .hits()
            .iter()
            .map(|h| self.attribution(h))
            .collect();
        let db_status = match &outcome {
            RetrievalOutcome::Fallback(FallbackReason::EmptyStore { status }) => {
                Some(status.clone())
            }
            _ => None,
        };

        let mut response = QueryResponse {
            question: q.question.to_string(),
            answer,
            sources,
            confidence_score: outcome.confidence(),
            search_time_ms,
            generation_time_ms,
            fallback_mode: outcome.is_fallback(),
            retry_attempted: outcome.retry_attempted(),
            retry_threshold: outcome.retry_threshold(),
            error: false,
            db_status,
            query_id: None,
        };

        if self.settings.record_queries {
            response.query_id = self.record(q.user_id, &response, outcome.hits()).await;
        }

        info!(
            fallback = response.fallback_mode,
            retry = response.retry_attempted,
            sources = response.sources.len(),
            confidence = response.confidence_score,
            search_time_ms,
            generation_time_ms,
            "RAG query complete"
        );
        Ok(response)
    }

    fn attribution(&self, hit: &ScoredChunk) -> SourceAttribution {
        SourceAttribution {
            document_id: hit.document_id.clone(),
            chunk_index: hit.chunk_index,
            content: preview(&hit.content, self.settings.preview_chars),
            similarity_score: hit.similarity_score,
        }
    }

    async fn record(
        &self,
        user_id: &str,
        response: &QueryResponse,
        hits: &[ScoredChunk],
    ) -> Option<String> {
        let mut documents: Vec<String> = Vec::new();
        for hit in hits {
            if !documents.contains(&hit.document_id) {
                documents.push(hit.document_id.clone());
            }
        }
        let record = RagQueryRecord::new(user_id, &response.question, &response.answer, documents);
        match self.store.record_query(&record).await {
            Ok(()) => Some(record.id),
            Err(e) => {
                warn!(error = %e, "failed to record query audit row");
                None
            }
        }
    }

    /// Generate a grounded answer over caller-supplied passages, without
    /// retrieval.
    pub async fn answer_with_context(
        &self,
        question: &str,
        passages: &[String],
        temperature: Option<f64>,
    ) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::invalid("question must not be empty"));
        }
        let passages: Vec<String> = passages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if passages.is_empty() {
            return Err(RagError::invalid("at least one context passage is required"));
        }
        let temperature = temperature.unwrap_or(self.settings.generation.temperature);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(RagError::invalid("temperature must be between 0 and 1"));
        }
        let options = GenerationOptions {
            temperature,
            ..self.settings.generation
        };
        self.generator
            .generate(
                &GenerationRequest::Grounded {
                    question: question.to_string(),
                    passages,
                },
                &options,
            )
            .await
    }

    /// Chunk, embed, and store a document.
    ///
    /// Embedding failures are not fatal: the document and its chunks are kept
    /// and the missing vectors are reported as pending. A storage failure
    /// while writing vectors removes the document again and returns the error.
    pub async fn ingest(&self, new: NewDocument) -> Result<IngestReport> {
        let doc = Document::new(&new.user_id, &new.title, &new.content, new.file)?;
        let chunks = chunk_text(
            &doc.id,
            &doc.content,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        );

        self.store.insert_document(&doc, &chunks).await?;

        let mut embedded = 0usize;
        for batch in chunks.chunks(self.settings.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = match self.embedder.encode_batch(&texts).await {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    warn!(
                        expected = batch.len(),
                        got = v.len(),
                        "embedding batch size mismatch, leaving chunks pending"
                    );
                    break;
                }
                Err(e) => {
                    warn!(document_id = %doc.id, error = %e, "embedding failed, chunks stored without vectors");
                    break;
                }
            };
            for (chunk, vector) in batch.iter().zip(vectors) {
                if let Err(e) = self.store_embedding(&chunk.id, vector).await {
                    self.discard(&doc).await;
                    return Err(e);
                }
                embedded += 1;
            }
        }

        info!(
            document_id = %doc.id,
            chunks = chunks.len(),
            embedded,
            "document ingested"
        );
        Ok(IngestReport {
            document_id: doc.id,
            title: doc.title,
            chunk_count: chunks.len(),
            embedded,
            pending_embeddings: chunks.len() - embedded,
        })
    }

    async fn store_embedding(&self, chunk_id: &str, vector: Vec<f32>) -> Result<()> {
        let embedding =
            Embedding::new(chunk_id, vector, self.embedder.model_name(), self.store.dims())?;
        self.store.upsert_embedding(&embedding).await
    }

    /// Remove a partially ingested document. The delete cascades to chunks
    /// and any embeddings already written.
    async fn discard(&self, doc: &Document) {
        if let Err(e) = self.store.delete_document(&doc.id, &doc.user_id).await {
            warn!(document_id = %doc.id, error = %e, "failed to remove partially ingested document");
        }
    }

    /// Attach user feedback to a recorded query. Returns `false` when the
    /// query is unknown for that user.
    pub async fn attach_feedback(
        &self,
        query_id: &str,
        user_id: &str,
        feedback: QueryFeedback,
    ) -> Result<bool> {
        let feedback = feedback.validated()?;
        self.store.attach_feedback(query_id, user_id, &feedback).await
    }

    pub async fn database_status(&self, user_id: Option<&str>) -> Result<DatabaseStatus> {
        self.store.database_status(user_id).await
    }

    /// Aggregate generator, store, and embedder health.
    pub async fn health(&self) -> HealthReport {
        let generator_up = self.generator.health_check().await;
        let db = match self.store.database_status(None).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "database status check failed");
                DatabaseStatus::unavailable(e.to_string())
            }
        };

        let status = if generator_up && db.error.is_none() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            service: "RAG",
            status,
            components: HealthComponents {
                generator: GeneratorHealth {
                    status: if generator_up { "healthy" } else { "unhealthy" },
                    model: self.generator.model_name().to_string(),
                    info: self.generator.model_info(),
                },
                vector_database: VectorDatabaseHealth {
                    status: if db.error.is_some() {
                        "error"
                    } else if db.is_ready {
                        "ready"
                    } else {
                        "not_ready"
                    },
                    details: db,
                },
                embedding_service: EmbeddingHealth {
                    status: if self.embedder.is_loaded() {
                        "ready"
                    } else {
                        "loading"
                    },
                    model: self.embedder.model_name().to_string(),
                    dimension: self.embedder.dims(),
                },
            },
        }
    }
}

/// First `max_chars` characters of `content`, with `...` appended when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
        None => content.to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
