//! Ollama chat client used as the answer generation backend.
//!
//! Completions go to `POST {base_url}/api/chat` with `stream = false`.
//! Reachability is `GET {base_url}/api/tags` plus a check that the
//! configured model has been pulled.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use docent_core::error::{RagError, Result};
use docent_core::generation::{GenerationBackend, GenerationOptions, Prompt};

use crate::config::GenerationConfig;

const HEALTH_TIMEOUT_SECS: u64 = 5;

pub struct OllamaGenerator {
    config: GenerationConfig,
    base_url: String,
    client: OnceCell<reqwest::Client>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config: config.clone(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .build()
                    .map_err(|e| RagError::generation(format!("failed to build HTTP client: {}", e)))
            })
            .await
    }
}

/// True when `model` appears in the `/api/tags` listing. A name without a tag
/// matches its `:latest` entry.
fn model_listed(tags: &TagsResponse, model: &str) -> bool {
    tags.models.iter().any(|entry| {
        entry.name == model
            || (!model.contains(':') && entry.name == format!("{}:latest", model))
    })
}

#[async_trait]
impl GenerationBackend for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &Prompt, options: &GenerationOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });

        debug!(model = %self.config.model, "sending chat request");
        let response = self
            .client()
            .await?
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::generation(format!(
                        "Ollama request timed out after {}s",
                        self.config.timeout_secs
                    ))
                } else {
                    RagError::generation(format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.base_url, e
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::generation(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::generation(format!("Invalid Ollama response: {}", e)))?;
        if let Some(error) = chat.error {
            return Err(RagError::generation(format!("Ollama error: {}", error)));
        }
        chat.message
            .map(|m| m.content)
            .ok_or_else(|| RagError::generation("Invalid Ollama response: missing message"))
    }

    async fn health_check(&self) -> bool {
        let Ok(client) = self.client().await else {
            return false;
        };
        let response = client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<TagsResponse>().await {
                Ok(tags) => {
                    let listed = model_listed(&tags, &self.config.model);
                    if !listed {
                        warn!(model = %self.config.model, "generation model is not pulled");
                    }
                    listed
                }
                Err(e) => {
                    warn!(error = %e, "unreadable /api/tags response");
                    false
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Ollama is unreachable");
                false
            }
        }
    }

    fn model_info(&self) -> serde_json::Value {
        serde_json::json!({
            "base_url": self.base_url,
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "timeout_secs": self.config.timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> TagsResponse {
        TagsResponse {
            models: names
                .iter()
                .map(|n| TagEntry {
                    name: n.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_model_listed_exact_and_latest() {
        let listing = tags(&["llama3.2:3b", "mistral:latest"]);
        assert!(model_listed(&listing, "llama3.2:3b"));
        assert!(model_listed(&listing, "mistral"));
        assert!(!model_listed(&listing, "llama3.2:1b"));
        assert!(!model_listed(&tags(&[]), "mistral"));
    }

    #[test]
    fn test_model_info_reports_config() {
        let config = GenerationConfig {
            base_url: "http://ollama:11434/".to_string(),
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config);
        let info = generator.model_info();
        assert_eq!(info["base_url"], "http://ollama:11434");
        assert_eq!(info["model"], "llama3.2:3b");
        assert_eq!(info["max_tokens"], 4096);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unhealthy() {
        let config = GenerationConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config);
        assert!(!generator.health_check().await);
        let prompt = Prompt {
            system: "s".to_string(),
            user: "u".to_string(),
        };
        let err = generator
            .complete(&prompt, &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }
}
