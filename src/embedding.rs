//! Concrete embedding backends.
//!
//! Each backend implements [`EmbeddingBackend`] from `docent-core`; the
//! [`Embedder`](docent_core::embedding::Embedder) service on top of it does
//! trimming, filtering, normalization and the dimension check.
//!
//! - **[`DisabledBackend`]** returns errors; used when embeddings are not configured.
//! - **[`OpenAIBackend`]** calls the OpenAI embeddings API.
//! - **[`OllamaBackend`]** calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalBackend`** runs fastembed in-process; no network calls after model download.
//!
//! # Retry Strategy
//!
//! The HTTP backends use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use docent_core::embedding::EmbeddingBackend;
use docent_core::error::{RagError, Result};

use crate::config::EmbeddingConfig;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============ Disabled Backend ============

/// Backend used when `embedding.provider = "disabled"`. Documents can still be
/// ingested; their chunks stay pending until a real provider is configured.
pub struct DisabledBackend {
    dims: usize,
}

impl DisabledBackend {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn is_loaded(&self) -> bool {
        false
    }

    async fn embed_raw(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::embedding("embedding provider is disabled"))
    }
}

// ============ Shared HTTP retry loop ============

struct HttpTarget<'a> {
    label: &'a str,
    url: String,
    bearer: Option<&'a str>,
}

async fn post_with_retry(
    client: &reqwest::Client,
    target: &HttpTarget<'_>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(backend = target.label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(&target.url).json(body);
        if let Some(key) = target.bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        RagError::embedding(format!("{} returned invalid JSON: {}", target.label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} API error {}: {}", target.label, status, body_text);

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(backend = target.label, %status, attempt, "transient embedding error");
                    last_err = Some(message);
                    continue;
                }

                return Err(RagError::embedding(message));
            }
            Err(e) => {
                warn!(backend = target.label, attempt, error = %e, "embedding request failed");
                last_err = Some(format!(
                    "{} connection error ({}): {}",
                    target.label, target.url, e
                ));
            }
        }
    }

    Err(RagError::embedding(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", target.label)
    })))
}

fn parse_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>> {
    let values = value
        .as_array()
        .ok_or_else(|| RagError::embedding(format!("Invalid {} response: embedding is not an array", label)))?;
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                RagError::embedding(format!("Invalid {} response: non-numeric value", label))
            })
        })
        .collect()
}

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

// ============ OpenAI Backend ============

/// Calls `POST https://api.openai.com/v1/embeddings`. Requires
/// `OPENAI_API_KEY` in the environment.
pub struct OpenAIBackend {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
}

impl OpenAIBackend {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let target = HttpTarget {
            label: "OpenAI",
            url: OPENAI_EMBEDDINGS_URL.to_string(),
            bearer: Some(self.api_key.as_str()),
        };
        let json = post_with_retry(&self.client, &target, &body, self.max_retries).await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::embedding("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| RagError::embedding("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Backend ============

/// Calls `POST {url}/api/embed`. Requires Ollama to be running with the
/// embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaBackend {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let target = HttpTarget {
            label: "Ollama",
            url: format!("{}/api/embed", self.url),
            bearer: None,
        };
        let json = post_with_retry(&self.client, &target, &body, self.max_retries).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::embedding("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| parse_vector(embedding, "Ollama"))
        .collect()
}

// ============ Local Backend (fastembed) ============

/// Runs a fastembed model in-process. The model is loaded on the first
/// embedding call and reused afterwards; inference runs on the blocking pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalBackend {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: tokio::sync::OnceCell<Arc<std::sync::Mutex<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalBackend {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        // Fail at startup on unknown names rather than on the first query.
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: tokio::sync::OnceCell::new(),
        })
    }

    async fn model(&self) -> Result<Arc<std::sync::Mutex<fastembed::TextEmbedding>>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let fastembed_model = config_to_fastembed_model(&self.model_name)
                    .map_err(|e| RagError::embedding(e.to_string()))?;
                let name = self.model_name.clone();
                tokio::task::spawn_blocking(move || {
                    tracing::info!(model = %name, "loading local embedding model");
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(fastembed_model)
                            .with_show_download_progress(true),
                    )
                    .map(|m| Arc::new(std::sync::Mutex::new(m)))
                    .map_err(|e| {
                        RagError::embedding(format!(
                            "Failed to initialize local embedding model: {}",
                            e
                        ))
                    })
                })
                .await
                .map_err(|e| RagError::embedding(format!("model loader panicked: {}", e)))?
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingBackend for LocalBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model().await?;
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| RagError::embedding("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::embedding(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::embedding(format!("embedding task panicked: {}", e)))?
    }
}

/// Model name and vector dimension for the local provider. An explicit
/// `dims` wins over the built-in table.
pub fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "bge-base-en-v1.5".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 768,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Vector dimension the store is created with for this configuration.
pub fn configured_dims(config: &EmbeddingConfig) -> usize {
    match config.provider.as_str() {
        "local" => resolve_local_model(config).1,
        _ => config.effective_dims(),
    }
}

/// Create the backend selected by `embedding.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledBackend`] |
/// | `"openai"` | [`OpenAIBackend`] |
/// | `"ollama"` | [`OllamaBackend`] |
/// | `"local"` | `LocalBackend` (requires `local-embeddings-fastembed`) |
pub fn create_backend(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend::new(configured_dims(config)))),
        "openai" => Ok(Arc::new(OpenAIBackend::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaBackend::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalBackend::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ollama_missing_field() {
        let err = parse_ollama_response(&serde_json::json!({ "model": "x" })).unwrap_err();
        assert_eq!(err.code(), "embedding_error");
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 2.0] },
                { "index": 0, "embedding": [1.0, 1.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors[0], vec![1.0, 1.0]);
        assert_eq!(vectors[1], vec![2.0, 2.0]);
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let json = serde_json::json!({ "embeddings": [[0.1, "x"]] });
        assert!(parse_ollama_response(&json).is_err());
    }

    #[tokio::test]
    async fn test_disabled_backend_errors() {
        let backend = DisabledBackend::new(768);
        assert_eq!(backend.dims(), 768);
        assert!(!backend.is_loaded());
        let err = backend.embed_raw(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn test_create_backend_disabled_and_unknown() {
        let config = EmbeddingConfig::default();
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.model_name(), "disabled");
        assert_eq!(backend.dims(), 768);

        let mut bad = EmbeddingConfig::default();
        bad.provider = "magic".to_string();
        assert!(create_backend(&bad).is_err());
    }

    #[test]
    fn test_resolve_local_model_dims() {
        let mut config = EmbeddingConfig::default();
        config.provider = "local".to_string();
        assert_eq!(resolve_local_model(&config), ("bge-base-en-v1.5".to_string(), 768));
        config.model = Some("all-minilm-l6-v2".to_string());
        assert_eq!(configured_dims(&config), 384);
        config.dims = Some(512);
        assert_eq!(configured_dims(&config), 512);
    }
}
