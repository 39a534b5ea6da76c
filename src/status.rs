//! `docent status` and `docent health`.

use anyhow::Result;

use crate::config::Config;
use crate::service;

/// Print store counts and the recommendation line, optionally scoped to one
/// user.
pub async fn run_status(config: &Config, user_id: Option<&str>) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let status = pipeline.database_status(user_id).await?;

    println!("Docent Database Status");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    if let Some(user) = user_id {
        println!("  User:        {}", user);
    }
    println!("  Documents:   {}", status.document_count);
    println!("  Embeddings:  {}", status.embedding_count);
    println!("  Ready:       {}", if status.is_ready { "yes" } else { "no" });
    println!();
    println!("{}", status.recommendation());
    Ok(())
}

/// Print the aggregated component health as JSON.
pub async fn run_health(config: &Config) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let report = pipeline.health().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
