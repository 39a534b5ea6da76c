//! Answer generation over a pluggable text-generation backend.
//!
//! A [`GenerationRequest`] is either grounded (question plus retrieved
//! passages) or fallback (question only). [`build_prompt`] turns each variant
//! into a system/user [`Prompt`]; [`AnswerGenerator`] sends it to a
//! [`GenerationBackend`], rejects blank completions, and wraps fallback
//! answers in the disclosure banners.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{RagError, Result};

/// Prepended to every fallback answer.
pub const FALLBACK_NOTICE: &str = "**※ This answer was generated from general knowledge because no uploaded documents were found or no related documents matched your question.**";

/// Appended to every fallback answer.
pub const FALLBACK_UPLOAD_HINT: &str =
    "**For a more accurate answer, please upload related documents.**";

/// The phrase grounded answers are told to use when the passages do not
/// answer the question.
pub const NO_CLEAR_ANSWER: &str = "I cannot find a clear answer in the reference documents.";

const GROUNDED_SYSTEM_PROMPT: &str = "You are an expert at answering questions from reference documents.
Give an accurate and helpful answer based on the reference documents provided.

Guidelines:
1. Answer only from the content of the reference documents.
2. Do not speculate about anything the reference documents do not contain.
3. Be as specific and detailed as the documents allow.
4. If you are unsure, say: \"I cannot find a clear answer in the reference documents.\"";

const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.
No reference documents are available for this question. Answer from general knowledge,
be clear about uncertainty, and do not claim to have consulted any documents.";

/// What to generate: with retrieved context, or without it.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    Grounded {
        question: String,
        passages: Vec<String>,
    },
    Fallback {
        question: String,
    },
}

impl GenerationRequest {
    pub fn is_fallback(&self) -> bool {
        matches!(self, GenerationRequest::Fallback { .. })
    }
}

/// A chat-style prompt: system instruction plus user message.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Sampling options passed through to the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// Build the prompt for a request.
pub fn build_prompt(request: &GenerationRequest) -> Prompt {
    match request {
        GenerationRequest::Grounded { question, passages } => {
            let context = passages
                .iter()
                .enumerate()
                .map(|(i, p)| format!("[Reference document {}]\n{}", i + 1, p))
                .collect::<Vec<_>>()
                .join("\n\n");
            Prompt {
                system: GROUNDED_SYSTEM_PROMPT.to_string(),
                user: format!(
                    "Reference documents:\n{}\n\nQuestion: {}\n\nAnswer the question using the reference documents above.",
                    context, question
                ),
            }
        }
        GenerationRequest::Fallback { question } => Prompt {
            system: FALLBACK_SYSTEM_PROMPT.to_string(),
            user: question.clone(),
        },
    }
}

/// Surround a general-knowledge answer with the disclosure banners.
pub fn wrap_fallback_answer(answer: &str) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        FALLBACK_NOTICE,
        answer.trim(),
        FALLBACK_UPLOAD_HINT
    )
}

/// Trait for text-generation backends (e.g. an Ollama server).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a completion. Transport failures and timeouts are
    /// [`RagError::Generation`].
    async fn complete(&self, prompt: &Prompt, options: &GenerationOptions) -> Result<String>;

    /// Cheap reachability check; never errors.
    async fn health_check(&self) -> bool;

    /// Backend details for operational endpoints.
    fn model_info(&self) -> serde_json::Value {
        serde_json::json!({ "model": self.model_name() })
    }
}

/// Generates answers from [`GenerationRequest`]s.
#[derive(Clone)]
pub struct AnswerGenerator {
    backend: Arc<dyn GenerationBackend>,
}

impl AnswerGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn model_info(&self) -> serde_json::Value {
        self.backend.model_info()
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> Result<String> {
        if let GenerationRequest::Grounded { passages, .. } = request {
            if passages.iter().all(|p| p.trim().is_empty()) {
                return Err(RagError::invalid(
                    "grounded generation requires at least one non-empty passage",
                ));
            }
        }

        let prompt = build_prompt(request);
        debug!(
            model = self.model_name(),
            fallback = request.is_fallback(),
            temperature = options.temperature,
            max_tokens = options.max_tokens,
            "generating answer"
        );
        let completion = self.backend.complete(&prompt, options).await?;
        let completion = completion.trim();
        if completion.is_empty() {
            return Err(RagError::generation("backend returned an empty response"));
        }
        info!(chars = completion.chars().count(), "answer generated");

        Ok(match request {
            GenerationRequest::Grounded { .. } => completion.to_string(),
            GenerationRequest::Fallback { .. } => wrap_fallback_answer(completion),
        })
    }
}
