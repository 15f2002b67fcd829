//! OpenRouter API client for LLM interactions.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, info};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Completion budget. Kept deliberately small; the prompt instructs the
/// model to stay short, and the recovery cascade handles the overruns.
const MAX_TOKENS: u32 = 400;
const TEMPERATURE: f32 = 0.2;

/// The single external text-generation capability the pipeline depends on.
/// Synchronous request/response, no streaming; implementations may fail
/// transiently and the pipeline treats that as terminal for the run.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// OpenRouter client for chat completions.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    /// Create a new client from the environment. Both the API key and the
    /// model identifier are required; a missing model identifier is a
    /// configuration error surfaced immediately, never retried.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;
        let model = env::var("AUTOFILL_MODEL_ID")
            .context("AUTOFILL_MODEL_ID environment variable not set")?;

        Ok(Self {
            client: Client::new(),
            api_key,
            model,
        })
    }

    async fn send_request(&self, request: ChatCompletionRequest) -> Result<String> {
        debug!("Sending request to OpenRouter: model={}", request.model);

        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenRouter")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse OpenRouter response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        info!(
            "OpenRouter response: {} tokens (prompt: {}, completion: {})",
            response.usage.total_tokens,
            response.usage.prompt_tokens,
            response.usage.completion_tokens
        );

        Ok(content)
    }
}

#[async_trait::async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: Some(MAX_TOKENS),
            temperature: Some(TEMPERATURE),
        };
        self.send_request(request).await
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
