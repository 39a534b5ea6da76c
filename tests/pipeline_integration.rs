//! End-to-end pipeline tests over a real SQLite store in a temp directory,
//! with deterministic embedding and generation stubs.

use async_trait::async_trait;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use docent::config::{load_config, Config};
use docent::sqlite_store::SqliteStore;
use docent::{db, migrate};
use docent_core::embedding::{Embedder, EmbeddingBackend};
use docent_core::error::RagError;
use docent_core::generation::{
    AnswerGenerator, GenerationBackend, GenerationOptions, Prompt, FALLBACK_NOTICE,
};
use docent_core::chunk::chunk_text;
use docent_core::models::{Document, QueryFeedback};
use docent_core::pipeline::{
    NewDocument, QueryRequest, RagPipeline, DEGRADED_ANSWER,
};
use docent_core::search::SimilarityQuery;
use docent_core::store::VectorStore;

const VACATION: &str = "Employees receive twenty vacation days per year.";
const PARKING: &str = "Parking permits are issued by the facilities team.";

/// Maps text to a fixed direction by keyword so similarities are known
/// exactly: "vacation" and "parking" are orthogonal, "bonus" sits at 0.6
/// from "vacation", anything else is orthogonal to both.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingBackend for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed_raw(&self, texts: &[String]) -> docent_core::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if t.contains("vacation") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("parking") {
                    vec![0.0, 1.0, 0.0]
                } else if t.contains("bonus") {
                    vec![0.6, 0.0, 0.8]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

/// Records prompts and answers with a fixed string, or fails on demand.
#[derive(Default)]
struct StubGenerator {
    prompts: Mutex<Vec<Prompt>>,
    fail: bool,
}

#[async_trait]
impl GenerationBackend for StubGenerator {
    fn model_name(&self) -> &str {
        "stub-llm"
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        _options: &GenerationOptions,
    ) -> docent_core::Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if self.fail {
            return Err(RagError::generation("model unavailable"));
        }
        Ok("Twenty days.".to_string())
    }

    async fn health_check(&self) -> bool {
        !self.fail
    }
}

struct Harness {
    _tmp: TempDir,
    config: Config,
    pipeline: RagPipeline,
    generator: Arc<StubGenerator>,
}

async fn harness_with(generator: StubGenerator) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("docent.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/data/docent.sqlite\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    let config = load_config(&config_path).unwrap();
    migrate::run_migrations(&config).await.unwrap();

    let pool = db::connect(&config).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool, 3));
    let generator = Arc::new(generator);
    let pipeline = RagPipeline::new(
        Embedder::new(Arc::new(KeywordEmbedder)),
        store,
        AnswerGenerator::new(generator.clone()),
        config.pipeline_settings(),
    )
    .unwrap();

    Harness {
        _tmp: tmp,
        config,
        pipeline,
        generator,
    }
}

async fn harness() -> Harness {
    harness_with(StubGenerator::default()).await
}

async fn ingest(h: &Harness, user: &str, title: &str, content: &str) -> String {
    let report = h
        .pipeline
        .ingest(NewDocument {
            user_id: user.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            file: None,
        })
        .await
        .unwrap();
    assert_eq!(report.pending_embeddings, 0);
    report.document_id
}

#[tokio::test]
async fn test_grounded_answer_with_sources() {
    let h = harness().await;
    let doc = ingest(&h, "alice", "Handbook", VACATION).await;
    ingest(&h, "alice", "Facilities", PARKING).await;

    let response = h
        .pipeline
        .process_query(&QueryRequest::new("How many vacation days?", "alice"))
        .await
        .unwrap();

    assert!(!response.fallback_mode);
    assert!(!response.retry_attempted);
    assert_eq!(response.answer, "Twenty days.");
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].document_id, doc);
    assert!((response.sources[0].similarity_score - 1.0).abs() < 1e-6);
    assert!((response.confidence_score - 1.0).abs() < 1e-6);
    assert!(response.query_id.is_some());

    let prompts = h.generator.prompts.lock().unwrap();
    assert!(prompts[0].user.contains("[Reference document 1]"));
    assert!(prompts[0].user.contains(VACATION));
    assert!(!prompts[0].user.contains(PARKING));
}

#[tokio::test]
async fn test_retry_at_lowered_threshold_finds_match() {
    let h = harness().await;
    ingest(&h, "alice", "Handbook", VACATION).await;
    ingest(&h, "alice", "Facilities", PARKING).await;

    let response = h
        .pipeline
        .process_query(&QueryRequest::new("Is there a bonus?", "alice"))
        .await
        .unwrap();

    assert!(!response.fallback_mode);
    assert!(response.retry_attempted);
    assert_eq!(response.retry_threshold, Some(0.5));
    assert_eq!(response.sources.len(), 1);
    assert!((response.sources[0].similarity_score - 0.6).abs() < 1e-5);
}

#[tokio::test]
async fn test_no_match_after_retry_falls_back() {
    let h = harness().await;
    ingest(&h, "alice", "Handbook", VACATION).await;

    let response = h
        .pipeline
        .process_query(&QueryRequest::new("What is the weather?", "alice"))
        .await
        .unwrap();

    assert!(response.fallback_mode);
    assert!(response.retry_attempted);
    assert!(response.sources.is_empty());
    assert!((response.confidence_score - 0.2).abs() < 1e-9);
    assert!(response.answer.starts_with(FALLBACK_NOTICE));
    assert!(response.answer.contains("Twenty days."));
    assert!(response.db_status.is_none());
}

#[tokio::test]
async fn test_empty_store_falls_back_without_retry() {
    let h = harness().await;

    let response = h
        .pipeline
        .process_query(&QueryRequest::new("How many vacation days?", "alice"))
        .await
        .unwrap();

    assert!(response.fallback_mode);
    assert!(!response.retry_attempted);
    assert!((response.confidence_score - 0.3).abs() < 1e-9);
    let status = response.db_status.unwrap();
    assert_eq!(status.document_count, 0);
    assert!(!status.is_ready);
}

#[tokio::test]
async fn test_other_users_documents_are_invisible() {
    let h = harness().await;
    ingest(&h, "alice", "Handbook", VACATION).await;

    let response = h
        .pipeline
        .process_query(&QueryRequest::new("How many vacation days?", "bob"))
        .await
        .unwrap();

    assert!(response.fallback_mode);
    assert!(response.sources.is_empty());
    assert_eq!(response.db_status.unwrap().document_count, 0);
}

#[tokio::test]
async fn test_fallback_generation_failure_is_degraded() {
    let h = harness_with(StubGenerator {
        fail: true,
        ..StubGenerator::default()
    })
    .await;

    let response = h
        .pipeline
        .process_query(&QueryRequest::new("How many vacation days?", "alice"))
        .await
        .unwrap();

    assert!(response.error);
    assert!(response.fallback_mode);
    assert_eq!(response.answer, DEGRADED_ANSWER);
    assert_eq!(response.confidence_score, 0.0);
    assert_eq!(response.generation_time_ms, 0);
}

#[tokio::test]
async fn test_grounded_generation_failure_propagates() {
    let h = harness_with(StubGenerator {
        fail: true,
        ..StubGenerator::default()
    })
    .await;
    ingest(&h, "alice", "Handbook", VACATION).await;

    let err = h
        .pipeline
        .process_query(&QueryRequest::new("How many vacation days?", "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));
}

#[tokio::test]
async fn test_invalid_queries_rejected() {
    let h = harness().await;
    for request in [
        QueryRequest::new("   ", "alice"),
        QueryRequest::new("x".repeat(1001), "alice"),
        QueryRequest::new("vacation?", ""),
        QueryRequest {
            max_documents: Some(21),
            ..QueryRequest::new("vacation?", "alice")
        },
        QueryRequest {
            similarity_threshold: Some(1.5),
            ..QueryRequest::new("vacation?", "alice")
        },
    ] {
        let err = h.pipeline.process_query(&request).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)), "{:?}", err);
    }
}

#[tokio::test]
async fn test_delete_cascades_to_chunks_and_embeddings() {
    let h = harness().await;
    let doc = ingest(&h, "alice", "Handbook", VACATION).await;
    let store = h.pipeline.store();

    let status = store.database_status(Some("alice")).await.unwrap();
    assert_eq!(status.embedding_count, 1);

    assert!(!store.delete_document(&doc, "bob").await.unwrap());
    assert!(store.delete_document(&doc, "alice").await.unwrap());

    let status = store.database_status(None).await.unwrap();
    assert_eq!(status.document_count, 0);
    assert_eq!(status.embedding_count, 0);

    let pool = db::connect(&h.config).await.unwrap();
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(chunks, 0);
}

#[tokio::test]
async fn test_list_and_purge_documents() {
    let h = harness().await;
    ingest(&h, "alice", "First", VACATION).await;
    ingest(&h, "alice", "Second", PARKING).await;
    ingest(&h, "bob", "Other", PARKING).await;
    let store = h.pipeline.store();

    let docs = store.list_documents("alice").await.unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d.chunk_count == 1));
    assert_eq!(docs[0].title, "Second");

    assert_eq!(store.purge_user("alice").await.unwrap(), 2);
    assert!(store.list_documents("alice").await.unwrap().is_empty());
    assert_eq!(store.list_documents("bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_query_audit_and_feedback() {
    let h = harness().await;
    let doc = ingest(&h, "alice", "Handbook", VACATION).await;

    let response = h
        .pipeline
        .process_query(&QueryRequest::new("How many vacation days?", "alice"))
        .await
        .unwrap();
    let query_id = response.query_id.unwrap();

    let stored = h
        .pipeline
        .store()
        .get_query(&query_id, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.context_documents, vec![doc]);
    assert_eq!(stored.answer, "Twenty days.");
    assert_eq!(stored.confidence_score, None);

    let feedback = QueryFeedback {
        confidence_score: Some(8),
        feedback: Some("helpful".to_string()),
    };
    assert!(h
        .pipeline
        .attach_feedback(&query_id, "alice", feedback.clone())
        .await
        .unwrap());
    assert!(!h
        .pipeline
        .attach_feedback(&query_id, "bob", feedback)
        .await
        .unwrap());

    let stored = h
        .pipeline
        .store()
        .get_query(&query_id, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.confidence_score, Some(8));
    assert_eq!(stored.feedback.as_deref(), Some("helpful"));

    let err = h
        .pipeline
        .attach_feedback(
            &query_id,
            "alice",
            QueryFeedback {
                confidence_score: Some(11),
                feedback: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
}

#[tokio::test]
async fn test_health_reports_components() {
    let h = harness().await;
    ingest(&h, "alice", "Handbook", VACATION).await;

    let report = serde_json::to_value(h.pipeline.health().await).unwrap();
    assert_eq!(report["service"], "RAG");
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["components"]["generator"]["status"], "healthy");
    assert_eq!(report["components"]["vector_database"]["status"], "ready");
    assert_eq!(report["components"]["vector_database"]["document_count"], 1);
    assert_eq!(report["components"]["embedding_service"]["dimension"], 3);
}

#[tokio::test]
async fn test_store_rejects_wrong_dimension() {
    let h = harness().await;
    let chunk_id = {
        ingest(&h, "alice", "Handbook", VACATION).await;
        let pool = db::connect(&h.config).await.unwrap();
        let id: String = sqlx::query_scalar("SELECT id FROM document_chunks LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        id
    };
    let embedding =
        docent_core::models::Embedding::new(&chunk_id, vec![1.0, 0.0], "keyword-test", 2).unwrap();
    let err = h.pipeline.store().upsert_embedding(&embedding).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
}

type SourceKey = (String, i64, f64);

async fn query_twice(h: &Harness, question: &str) -> [(Vec<SourceKey>, bool, bool); 2] {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let request = QueryRequest {
            similarity_threshold: Some(0.7),
            max_documents: Some(5),
            ..QueryRequest::new(question, "alice")
        };
        let response = h.pipeline.process_query(&request).await.unwrap();
        let sources = response
            .sources
            .iter()
            .map(|s| (s.document_id.clone(), s.chunk_index, s.similarity_score))
            .collect();
        runs.push((sources, response.fallback_mode, response.retry_attempted));
    }
    let second = runs.pop().unwrap();
    let first = runs.pop().unwrap();
    [first, second]
}

#[tokio::test]
async fn test_repeated_queries_return_same_sources() {
    let h = harness().await;
    ingest(&h, "alice", "Handbook", VACATION).await;
    ingest(&h, "alice", "Leave", "Unused vacation days carry over.").await;
    ingest(&h, "alice", "Facilities", PARKING).await;

    let [first, second] = query_twice(&h, "How many vacation days?").await;
    assert_eq!(first.0.len(), 2);
    assert!(!first.1 && !first.2);
    assert_eq!(first, second);

    let [first, second] = query_twice(&h, "Is there a bonus?").await;
    assert_eq!(first.0.len(), 2);
    assert!(!first.1 && first.2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_equal_scores_keep_insertion_order() {
    let h = harness().await;
    let mut inserted = Vec::new();
    for title in ["First", "Second", "Third"] {
        let content = format!("{} vacation policy", title);
        inserted.push(ingest(&h, "alice", title, &content).await);
    }

    let vector = [1.0f32, 0.0, 0.0];
    let hits = h
        .pipeline
        .store()
        .similarity_search(&SimilarityQuery {
            vector: &vector,
            threshold: 0.5,
            limit: 10,
            user_id: "alice",
        })
        .await
        .unwrap();
    let order: Vec<String> = hits.into_iter().map(|c| c.document_id).collect();
    assert_eq!(order, inserted);
}

#[tokio::test]
async fn test_rejected_chunks_roll_back_document() {
    let h = harness().await;
    let doc = Document::new("alice", "Broken", VACATION, None).unwrap();
    let mut chunks = chunk_text(&doc.id, VACATION, 1000, 0);
    chunks.extend(chunk_text(&doc.id, PARKING, 1000, 0));

    let err = h
        .pipeline
        .store()
        .insert_document(&doc, &chunks)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Storage(_)));

    assert!(h
        .pipeline
        .store()
        .get_document(&doc.id, "alice")
        .await
        .unwrap()
        .is_none());
    let pool = db::connect(&h.config).await.unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}
