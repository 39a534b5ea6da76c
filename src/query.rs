//! `docent query`, `docent answer` and `docent feedback`.

use anyhow::{bail, Result};

use docent_core::models::QueryFeedback;
use docent_core::pipeline::{QueryRequest, QueryResponse};

use crate::config::Config;
use crate::service;

pub async fn run_query(
    config: &Config,
    request: QueryRequest,
    json: bool,
) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let response = pipeline.process_query(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.answer);
    println!();
    if response.sources.is_empty() {
        println!("No sources.");
    } else {
        println!("Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "{}. [{:.2}] {} #{}",
                i + 1,
                source.similarity_score,
                source.document_id,
                source.chunk_index
            );
            println!("    {}", source.content.replace('\n', " "));
        }
    }
    println!();
    println!("confidence: {:.2}", response.confidence_score);
    println!(
        "search: {} ms  generation: {} ms",
        response.search_time_ms, response.generation_time_ms
    );
    if response.fallback_mode {
        println!("mode: fallback");
    }
    if let Some(threshold) = response.retry_threshold {
        println!("retried at threshold {}", threshold);
    }
    if let Some(id) = &response.query_id {
        println!("query id: {}", id);
    }
}

pub async fn run_answer(
    config: &Config,
    question: &str,
    passages: &[String],
    temperature: Option<f64>,
) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let answer = pipeline
        .answer_with_context(question, passages, temperature)
        .await?;
    println!("{}", answer);
    Ok(())
}

pub async fn run_feedback(
    config: &Config,
    user_id: &str,
    query_id: &str,
    confidence_score: Option<u8>,
    feedback: Option<String>,
) -> Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let updated = pipeline
        .attach_feedback(
            query_id,
            user_id,
            QueryFeedback {
                confidence_score,
                feedback,
            },
        )
        .await?;
    if !updated {
        bail!("query not found: {}", query_id);
    }
    println!("Feedback recorded for query {}.", query_id);
    Ok(())
}
