//! Embedding backend trait, the [`Embedder`] service, and vector utilities.
//!
//! [`EmbeddingBackend`] is the seam that concrete model integrations
//! (Ollama, OpenAI, local fastembed) implement in the `docent` app crate.
//! [`Embedder`] wraps a backend and enforces the contract every caller
//! relies on: trimmed non-empty input, order-preserving batches, L2-normalized
//! output, and the configured dimension.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RagError, Result};

/// Trait for embedding backends.
///
/// Backends receive already-validated, non-blank texts and return one raw
/// vector per text in the same order. Normalization and dimension checks
/// happen in [`Embedder`], not here.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-base-en-v1.5"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Whether the underlying model has been loaded yet. Remote backends are
    /// always considered loaded.
    fn is_loaded(&self) -> bool {
        true
    }
    /// Embed a batch of texts.
    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Text-to-vector service shared by ingestion and querying.
#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { backend }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_loaded()
    }

    /// Encode a single text into a unit-length vector.
    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::invalid("text to embed must not be empty"));
        }
        let mut vectors = self.embed_checked(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::embedding("backend returned no vector"))
    }

    /// Encode a batch of texts. Blank entries are dropped first; the result
    /// holds one vector per remaining text, in input order.
    pub async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let valid: Vec<String> = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if valid.is_empty() {
            return Err(RagError::invalid("batch contains no non-empty text"));
        }
        debug!(
            requested = texts.len(),
            valid = valid.len(),
            model = self.model_name(),
            "encoding batch"
        );
        self.embed_checked(valid).await
    }

    async fn embed_checked(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let raw = self.backend.embed_raw(&texts).await?;
        if raw.len() != texts.len() {
            return Err(RagError::embedding(format!(
                "backend returned {} vectors for {} texts",
                raw.len(),
                texts.len()
            )));
        }
        let dims = self.dims();
        raw.into_iter()
            .map(|mut v| {
                if v.len() != dims {
                    return Err(RagError::embedding(format!(
                        "dimension mismatch: expected {}, got {}",
                        dims,
                        v.len()
                    )));
                }
                normalize(&mut v)?;
                Ok(v)
            })
            .collect()
    }
}

/// L2-normalize a vector in place. Fails on zero or non-finite magnitude.
pub fn normalize(v: &mut [f32]) -> Result<()> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < f32::EPSILON {
        return Err(RagError::embedding("cannot normalize a zero or non-finite vector"));
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use docent_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity (`1 - cosine_distance`) between two vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingBackend {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingBackend for RecordingBackend {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 0.0, 0.0])
                .collect())
        }
    }

    struct WrongDims;

    #[async_trait]
    impl EmbeddingBackend for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn recording() -> (Arc<RecordingBackend>, Embedder) {
        let backend = Arc::new(RecordingBackend {
            seen: Mutex::new(Vec::new()),
        });
        (backend.clone(), Embedder::new(backend))
    }

    #[tokio::test]
    async fn test_encode_rejects_blank() {
        let (_, embedder) = recording();
        let err = embedder.encode("   \n").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_encode_is_normalized() {
        let (_, embedder) = recording();
        let v = embedder.encode("hello").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_batch_filters_blank_and_preserves_order() {
        let (backend, embedder) = recording();
        let texts = vec!["first".to_string(), "  ".to_string(), "third".to_string()];
        let vectors = embedder.encode_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(
            *backend.seen.lock().unwrap(),
            vec!["first".to_string(), "third".to_string()]
        );
    }

    #[tokio::test]
    async fn test_batch_all_blank_is_invalid() {
        let (_, embedder) = recording();
        let err = embedder
            .encode_batch(&["".to_string(), " ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_error() {
        let embedder = Embedder::new(Arc::new(WrongDims));
        let err = embedder.encode("x").await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-9);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_normalize_zero_vector_fails() {
        let mut v = vec![0.0f32; 3];
        assert!(normalize(&mut v).is_err());
    }
}
