//! Text-generation backend used for query enhancement and result summaries.
//!
//! Works with any OpenAI-compatible chat completions API (LM Studio,
//! Ollama, vLLM, OpenAI).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sieve_config::ChatConfig;
use tracing::debug;

use crate::error::BackendError;

/// A single-prompt completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Chat completions client.
pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl ChatCompletionsClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            model,
            api_key,
            max_tokens: 512,
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            ..Self::new(
                config.base_url.clone(),
                config.model.clone(),
                config.api_key.clone(),
            )
        }
    }

    /// Strip a leading `<think>...</think>` block some models emit.
    fn strip_reasoning(response: &str) -> &str {
        match response.rsplit_once("</think>") {
            Some((_, after)) => after.trim(),
            None => response.trim(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[async_trait]
impl ChatProvider for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: 0.1,
        };

        let mut req_builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let resp = req_builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status, body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                BackendError::Transient(message)
            } else {
                BackendError::Other(message)
            });
        }

        let completion: ChatCompletionResponse = resp.json().await?;
        let text = completion
            .choices
            .first()
            .map(|c| Self::strip_reasoning(&c.message.content).to_string())
            .ok_or_else(|| BackendError::InvalidResponse("no choices returned".to_string()))?;

        debug!(model = %self.model, chars = text.len(), "Chat completion received");
        Ok(text)
    }
}
