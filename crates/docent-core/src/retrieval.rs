//! Adaptive retrieval: initial search, one retry at a lowered threshold, and
//! the grounded-vs-fallback decision.
//!
//! # State machine
//!
//! ```text
//! InitialSearch ──hits──────────────────────────────▶ Grounded
//!       │ no hits
//!       ├── store not ready for this user ───────────▶ Fallback(EmptyStore)
//!       └── store ready ─▶ RetryLowerThreshold ─hits─▶ Grounded (retry recorded)
//!                                   └── no hits ─────▶ Fallback(NoMatchAfterRetry)
//! ```
//!
//! At most two similarity searches run per query. Nothing is carried over
//! between queries.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::ScoredChunk;
use crate::search::SimilarityQuery;
use crate::store::{DatabaseStatus, VectorStore};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MAX_DOCUMENTS: usize = 5;

/// Amount subtracted from the threshold for the retry search.
pub const RETRY_THRESHOLD_STEP: f64 = 0.2;
/// The retry threshold never drops below this.
pub const RETRY_THRESHOLD_FLOOR: f64 = 0.3;

/// Confidence reported when the user has nothing indexed.
pub const EMPTY_STORE_CONFIDENCE: f64 = 0.3;
/// Confidence reported when documents exist but neither search matched.
pub const FAILED_RETRY_CONFIDENCE: f64 = 0.2;

/// Threshold used for the retry search: `max(t - 0.2, 0.3)`, rounded to six
/// decimals so that `0.7` maps to exactly `0.5`.
pub fn lowered_threshold(threshold: f64) -> f64 {
    let lowered = (threshold - RETRY_THRESHOLD_STEP).max(RETRY_THRESHOLD_FLOOR);
    (lowered * 1e6).round() / 1e6
}

/// Why retrieval ended without grounding context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    /// The user has no documents or no embeddings.
    EmptyStore { status: DatabaseStatus },
    /// Documents exist, but nothing cleared the original or the lowered
    /// threshold.
    NoMatchAfterRetry { retry_threshold: f64 },
}

impl FallbackReason {
    pub fn confidence(&self) -> f64 {
        match self {
            FallbackReason::EmptyStore { .. } => EMPTY_STORE_CONFIDENCE,
            FallbackReason::NoMatchAfterRetry { .. } => FAILED_RETRY_CONFIDENCE,
        }
    }
}

/// Terminal result of the retrieval state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    Grounded {
        hits: Vec<ScoredChunk>,
        /// Set when the hits came from the retry search.
        retry_threshold: Option<f64>,
    },
    Fallback(FallbackReason),
}

impl RetrievalOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, RetrievalOutcome::Fallback(_))
    }

    pub fn retry_attempted(&self) -> bool {
        self.retry_threshold().is_some()
    }

    pub fn retry_threshold(&self) -> Option<f64> {
        match self {
            RetrievalOutcome::Grounded {
                retry_threshold, ..
            } => *retry_threshold,
            RetrievalOutcome::Fallback(FallbackReason::NoMatchAfterRetry { retry_threshold }) => {
                Some(*retry_threshold)
            }
            RetrievalOutcome::Fallback(FallbackReason::EmptyStore { .. }) => None,
        }
    }

    /// Retrieved chunks; empty in fallback.
    pub fn hits(&self) -> &[ScoredChunk] {
        match self {
            RetrievalOutcome::Grounded { hits, .. } => hits,
            RetrievalOutcome::Fallback(_) => &[],
        }
    }

    /// Mean similarity of the hits clamped to `[0, 1]`, or the fixed
    /// fallback constant.
    pub fn confidence(&self) -> f64 {
        match self {
            RetrievalOutcome::Grounded { hits, .. } => mean_similarity(hits),
            RetrievalOutcome::Fallback(reason) => reason.confidence(),
        }
    }
}

fn mean_similarity(hits: &[ScoredChunk]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let sum: f64 = hits.iter().map(|h| h.similarity_score).sum();
    (sum / hits.len() as f64).clamp(0.0, 1.0)
}

enum State {
    InitialSearch,
    RetryLowerThreshold(f64),
    Done(RetrievalOutcome),
}

/// Run the retrieval state machine for one query.
///
/// `query.threshold` is the initial threshold; `query.limit` applies to both
/// searches. Storage errors propagate unchanged.
pub async fn retrieve(
    store: &dyn VectorStore,
    query: &SimilarityQuery<'_>,
) -> Result<RetrievalOutcome> {
    let mut state = State::InitialSearch;
    loop {
        state = match state {
            State::InitialSearch => {
                let hits = store.similarity_search(query).await?;
                debug!(
                    threshold = query.threshold,
                    limit = query.limit,
                    hits = hits.len(),
                    "initial similarity search"
                );
                if !hits.is_empty() {
                    State::Done(RetrievalOutcome::Grounded {
                        hits,
                        retry_threshold: None,
                    })
                } else {
                    let status = store.database_status(Some(query.user_id)).await?;
                    if status.is_ready {
                        State::RetryLowerThreshold(lowered_threshold(query.threshold))
                    } else {
                        info!(
                            user_id = query.user_id,
                            documents = status.document_count,
                            embeddings = status.embedding_count,
                            "no indexed documents, using fallback"
                        );
                        State::Done(RetrievalOutcome::Fallback(FallbackReason::EmptyStore {
                            status,
                        }))
                    }
                }
            }
            State::RetryLowerThreshold(retry_threshold) => {
                let retry = SimilarityQuery {
                    threshold: retry_threshold,
                    ..*query
                };
                let hits = store.similarity_search(&retry).await?;
                if hits.is_empty() {
                    warn!(retry_threshold, "retry search found nothing, using fallback");
                    State::Done(RetrievalOutcome::Fallback(
                        FallbackReason::NoMatchAfterRetry { retry_threshold },
                    ))
                } else {
                    info!(
                        retry_threshold,
                        hits = hits.len(),
                        "retry search succeeded at lowered threshold"
                    );
                    State::Done(RetrievalOutcome::Grounded {
                        hits,
                        retry_threshold: Some(retry_threshold),
                    })
                }
            }
            State::Done(outcome) => return Ok(outcome),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::models::{Document, Embedding};
    use crate::store::memory::InMemoryStore;

    /// Unit vector with cosine similarity `s` against `[1, 0]`.
    fn at(s: f32) -> Vec<f32> {
        vec![s, (1.0 - s * s).sqrt()]
    }

    async fn store_with(user: &str, scores: &[f32]) -> InMemoryStore {
        let store = InMemoryStore::new(2);
        for (i, s) in scores.iter().enumerate() {
            let doc = Document::new(user, &format!("doc {}", i), &format!("text {}", i), None)
                .unwrap();
            let chunks = chunk_text(&doc.id, &doc.content, 1000, 0);
            store.insert_document(&doc, &chunks).await.unwrap();
            let emb = Embedding::new(&chunks[0].id, at(*s), "test", 2).unwrap();
            store.upsert_embedding(&emb).await.unwrap();
        }
        store
    }

    fn query(threshold: f64) -> SimilarityQuery<'static> {
        const Q: [f32; 2] = [1.0, 0.0];
        SimilarityQuery {
            vector: &Q,
            threshold,
            limit: 5,
            user_id: "u1",
        }
    }

    #[test]
    fn test_lowered_threshold_floor() {
        assert_eq!(lowered_threshold(0.7), 0.5);
        assert_eq!(lowered_threshold(0.4), 0.3);
        assert_eq!(lowered_threshold(0.0), 0.3);
        assert_eq!(lowered_threshold(1.0), 0.8);
        for t in [0.0, 0.1, 0.35, 0.5, 0.9] {
            assert!(lowered_threshold(t) >= RETRY_THRESHOLD_FLOOR);
        }
    }

    #[test]
    fn test_fallback_confidence_ordering() {
        assert!(EMPTY_STORE_CONFIDENCE > FAILED_RETRY_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_grounded_without_retry() {
        let store = store_with("u1", &[0.85, 0.72, 0.55]).await;
        let outcome = retrieve(&store, &query(0.7)).await.unwrap();
        assert!(!outcome.is_fallback());
        assert!(!outcome.retry_attempted());
        let scores: Vec<f64> = outcome.hits().iter().map(|h| h.similarity_score).collect();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
        assert!((outcome.confidence() - (0.85 + 0.72) / 2.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_empty_store_falls_back_without_retry() {
        let store = InMemoryStore::new(2);
        let outcome = retrieve(&store, &query(0.7)).await.unwrap();
        assert!(matches!(
            outcome,
            RetrievalOutcome::Fallback(FallbackReason::EmptyStore { .. })
        ));
        assert!(!outcome.retry_attempted());
        assert_eq!(outcome.confidence(), EMPTY_STORE_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_other_users_documents_do_not_count() {
        let store = store_with("someone-else", &[0.99]).await;
        let outcome = retrieve(&store, &query(0.7)).await.unwrap();
        assert!(matches!(
            outcome,
            RetrievalOutcome::Fallback(FallbackReason::EmptyStore { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_succeeds_at_lowered_threshold() {
        let store = store_with("u1", &[0.6]).await;
        let outcome = retrieve(&store, &query(0.7)).await.unwrap();
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.retry_threshold(), Some(0.5));
        assert_eq!(outcome.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_retry_falls_back() {
        let store = store_with("u1", &[0.2, 0.1]).await;
        let outcome = retrieve(&store, &query(0.4)).await.unwrap();
        assert_eq!(
            outcome,
            RetrievalOutcome::Fallback(FallbackReason::NoMatchAfterRetry {
                retry_threshold: 0.3
            })
        );
        assert_eq!(outcome.confidence(), FAILED_RETRY_CONFIDENCE);
        assert!(outcome.retry_attempted());
    }
}
