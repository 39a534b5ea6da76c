//! Wiring from [`Config`] to a ready [`RagPipeline`].

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use docent_core::embedding::Embedder;
use docent_core::generation::AnswerGenerator;
use docent_core::pipeline::RagPipeline;

use crate::config::Config;
use crate::db;
use crate::embedding::create_backend;
use crate::ollama::OllamaGenerator;
use crate::sqlite_store::SqliteStore;

/// Open the database and build the pipeline with the configured embedding
/// provider and the Ollama generator. The schema must already exist
/// (`docent init`).
pub async fn build_pipeline(config: &Config) -> Result<RagPipeline> {
    let backend = create_backend(&config.embedding)?;
    let embedder = Embedder::new(backend);
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool, embedder.dims()));
    let generator = AnswerGenerator::new(Arc::new(OllamaGenerator::new(&config.generation)));

    info!(
        embedding_model = %embedder.model_name(),
        dims = embedder.dims(),
        generation_model = %generator.model_name(),
        "pipeline ready"
    );

    RagPipeline::new(embedder, store, generator, config.pipeline_settings())
        .context("Failed to build RAG pipeline")
}
