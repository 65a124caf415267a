//! Embedding provider trait and implementations.

mod hashing;

pub use hashing::HashingEmbeddings;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sieve_config::EmbeddingsConfig;
use tracing::{debug, warn};

use crate::error::BackendError;

/// Trait for embedding providers.
///
/// Implementations should be Send + Sync to allow use in async contexts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Embed multiple texts in a batch
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;

    /// Width of the vectors this provider returns
    fn dimensions(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the maximum batch size supported.
    fn max_batch_size(&self) -> usize {
        32
    }
}

/// Request body for embedding API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response from embedding API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Individual embedding data in response
#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embeddings from any endpoint speaking the OpenAI `/v1/embeddings` format
/// (Ollama, LM Studio, OpenRouter, OpenAI).
pub struct HttpEmbeddings {
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    client: Client,
    base_url: String,
    max_retries: u32,
}

impl HttpEmbeddings {
    pub fn new(base_url: String, model: String, dimensions: usize, api_key: Option<String>) -> Self {
        Self {
            api_key,
            model,
            dimensions,
            client: Client::new(),
            base_url,
            max_retries: 3,
        }
    }

    pub fn from_config(config: &EmbeddingsConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.model.clone(),
            config.dimensions,
            config.api_key.clone(),
        )
    }

    /// Set a custom base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Send embedding request with retry logic for rate limits.
    async fn send_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let request_body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut retry_count = 0;
        let mut backoff_secs = 1u64;

        loop {
            debug!(
                count = texts.len(),
                url = %self.base_url,
                "Sending embedding request"
            );

            let mut request = self.client.post(&self.base_url).json(&request_body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                let embedding_response: EmbeddingResponse = response.json().await?;

                // Sort by index to ensure correct order
                let mut embeddings: Vec<(usize, Vec<f32>)> = embedding_response
                    .data
                    .into_iter()
                    .map(|d| (d.index, d.embedding))
                    .collect();
                embeddings.sort_by_key(|(idx, _)| *idx);

                if embeddings.len() != texts.len() {
                    return Err(BackendError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        embeddings.len()
                    )));
                }
                return Ok(embeddings.into_iter().map(|(_, emb)| emb).collect());
            }

            if status.as_u16() == 429 {
                retry_count += 1;
                if retry_count > self.max_retries {
                    return Err(BackendError::Transient(format!(
                        "rate limited after {} retries",
                        self.max_retries
                    )));
                }

                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                warn!(
                    retry_after,
                    attempt = retry_count,
                    max = self.max_retries,
                    "Embedding endpoint rate limited, backing off"
                );

                tokio::time::sleep(tokio::time::Duration::from_secs(retry_after)).await;
                backoff_secs *= 2;
                continue;
            }

            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(match status.as_u16() {
                400 | 413 | 422 => BackendError::from_rejection_body(status.as_u16(), &error_body),
                502..=504 => BackendError::Transient(format!("HTTP {}: {}", status, error_body)),
                _ => BackendError::Other(format!("HTTP {}: {}", status, error_body)),
            });
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.send_request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
