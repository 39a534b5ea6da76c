//! Document ingestion: file checks, text extraction, then the pipeline's
//! chunk → embed → store flow.
//!
//! Embedding is inline and non-fatal. A document whose chunks could not be
//! embedded is still stored and reported with pending embeddings.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use docent_core::error::RagError;
use docent_core::models::{FileMetadata, ALLOWED_FILE_TYPES};
use docent_core::pipeline::{IngestReport, NewDocument, RagPipeline};

use crate::config::Config;
use crate::extract::extract_text;
use crate::service;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Lower-cased extension of `file_name`, if it is an accepted type.
pub fn file_type_of(file_name: &str) -> docent_core::Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| RagError::invalid(format!("file has no extension: {}", file_name)))?;
    if !ALLOWED_FILE_TYPES.contains(&ext.as_str()) {
        return Err(RagError::invalid(format!(
            "unsupported file type: {} (allowed: {})",
            ext,
            ALLOWED_FILE_TYPES.join(", ")
        )));
    }
    Ok(ext)
}

/// Ingest an uploaded file. The title defaults to the file stem.
pub async fn ingest_file_bytes(
    pipeline: &RagPipeline,
    user_id: &str,
    title: Option<&str>,
    file_name: &str,
    bytes: &[u8],
) -> docent_core::Result<IngestReport> {
    let file_type = file_type_of(file_name)?;
    if bytes.is_empty() {
        return Err(RagError::invalid("file is empty"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(RagError::invalid(format!(
            "file exceeds {} MiB limit",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }

    let content = extract_text(bytes, &file_type).map_err(|e| RagError::invalid(e.to_string()))?;
    let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => t.to_string(),
        None => Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string(),
    };

    info!(user_id, file_name, file_type = %file_type, bytes = bytes.len(), "ingesting file");
    pipeline
        .ingest(NewDocument {
            user_id: user_id.to_string(),
            title,
            content,
            file: Some(FileMetadata {
                path: Some(file_name.to_string()),
                file_type: Some(file_type),
                size: Some(bytes.len() as i64),
            }),
        })
        .await
}

/// Ingest inline text with no backing file.
pub async fn ingest_text(
    pipeline: &RagPipeline,
    user_id: &str,
    title: &str,
    content: &str,
) -> docent_core::Result<IngestReport> {
    pipeline
        .ingest(NewDocument {
            user_id: user_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            file: None,
        })
        .await
}

/// `docent ingest`: ingest a file from disk, or inline text with `--text`.
pub async fn run_ingest(
    config: &Config,
    user_id: &str,
    path: Option<&Path>,
    title: Option<&str>,
    text: Option<&str>,
) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;

    let report = match (path, text) {
        (Some(path), None) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", path.display()))?;
            ingest_file_bytes(&pipeline, user_id, title, file_name, &bytes).await?
        }
        (None, Some(text)) => {
            let title = title.ok_or_else(|| anyhow::anyhow!("--title is required with --text"))?;
            ingest_text(&pipeline, user_id, title, text).await?
        }
        _ => anyhow::bail!("provide either a file path or --text"),
    };

    println!("ingest {}", report.title);
    println!("  document: {}", report.document_id);
    println!("  chunks written: {}", report.chunk_count);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", report.embedded);
        println!("  embeddings pending: {}", report.pending_embeddings);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_of() {
        assert_eq!(file_type_of("Guide.PDF").unwrap(), "pdf");
        assert_eq!(file_type_of("notes.md").unwrap(), "md");
        assert!(file_type_of("archive.tar.gz").is_err());
        assert!(file_type_of("README").is_err());
    }
}
