//! Similarity search: query validation and result ranking.
//!
//! Every [`VectorStore`](crate::store::VectorStore) implementation scores
//! candidate chunks with [`cosine_similarity`] and hands them to [`rank`],
//! so threshold filtering, ordering, and the result cap behave identically
//! regardless of the backend.
//!
//! # Ranking
//!
//! 1. Drop candidates scoring below `threshold`.
//! 2. Sort by score (desc), then by insertion sequence (asc).
//! 3. Truncate to `limit`.
//!
//! Because the filter is a plain `>=` and the order does not depend on the
//! threshold, a lower threshold always yields a superset of the results of a
//! higher one (given enough `limit`).

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::ScoredChunk;

/// Inputs for one similarity search.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityQuery<'a> {
    /// Query embedding; must match the store's dimension.
    pub vector: &'a [f32],
    /// Minimum cosine similarity, in `[0, 1]`.
    pub threshold: f64,
    /// Maximum number of results, `> 0`.
    pub limit: usize,
    /// Owner filter. Only chunks of documents owned by this user are returned.
    pub user_id: &'a str,
}

impl SimilarityQuery<'_> {
    pub fn validate(&self, dims: usize) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(RagError::invalid(format!(
                "similarity threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.limit == 0 {
            return Err(RagError::invalid("search limit must be > 0"));
        }
        if self.user_id.trim().is_empty() {
            return Err(RagError::invalid("user_id must not be empty"));
        }
        if self.vector.len() != dims {
            return Err(RagError::invalid(format!(
                "query vector dimension mismatch: expected {}, got {}",
                dims,
                self.vector.len()
            )));
        }
        Ok(())
    }
}

/// A scored chunk plus the store's insertion sequence, used as tie-breaker.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub seq: i64,
    pub hit: ScoredChunk,
}

/// Score a stored vector against the query.
pub fn score(query: &[f32], stored: &[f32]) -> f64 {
    cosine_similarity(query, stored)
}

/// Filter, order, and cap candidates.
pub fn rank<I>(candidates: I, threshold: f64, limit: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.hit.similarity_score.is_finite() && c.hit.similarity_score >= threshold)
        .collect();

    kept.sort_by(|a, b| {
        b.hit
            .similarity_score
            .partial_cmp(&a.hit.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.seq.cmp(&b.seq))
    });
    kept.truncate(limit);
    kept.into_iter().map(|c| c.hit).collect()
}
