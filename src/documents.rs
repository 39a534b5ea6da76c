//! `docent documents list|delete|purge`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::service;

pub async fn run_list(config: &Config, user_id: &str) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let docs = pipeline.store().list_documents(user_id).await?;

    if docs.is_empty() {
        println!("No documents for user {}.", user_id);
        return Ok(());
    }

    for doc in &docs {
        println!(
            "{}  {:<6} {:>4} chunks  {}  {}",
            doc.id,
            doc.file_type.as_deref().unwrap_or("text"),
            doc.chunk_count,
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.title
        );
    }
    println!("{} document(s)", docs.len());
    Ok(())
}

pub async fn run_delete(config: &Config, user_id: &str, id: &str) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    if !pipeline.store().delete_document(id, user_id).await? {
        bail!("document not found: {}", id);
    }
    println!("Deleted document {}.", id);
    Ok(())
}

pub async fn run_purge(config: &Config, user_id: &str) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let removed = pipeline.store().purge_user(user_id).await?;
    println!("Removed {} document(s) for user {}.", removed, user_id);
    Ok(())
}
