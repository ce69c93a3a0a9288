//! Embedding backend for the OpenAI embeddings API.

use async_trait::async_trait;
use std::time::Duration;

use super::{json_to_vec, post_json_with_retry, EmbeddingBackend, ProgressFn};
use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

const DEFAULT_URL: &str = "https://api.openai.com/v1/embeddings";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Embedding backend using the OpenAI API.
///
/// Requires `OPENAI_API_KEY` in the environment at initialization time.
pub struct OpenAIBackend {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIBackend {
    /// Returns an error if `model` or `dims` is not set in config.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config.model.clone().ok_or_else(|| {
            EmbedError::Unavailable("embedding.model required for OpenAI provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            EmbedError::Unavailable("embedding.dims required for OpenAI provider".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            model,
            dims,
            url: config.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
            client,
        })
    }

    fn api_key() -> Result<String, EmbedError> {
        std::env::var(API_KEY_ENV)
            .map_err(|_| EmbedError::Unavailable(format!("{} not set", API_KEY_ENV)))
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn initialize(&self, _on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
        Self::api_key().map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let api_key = Self::api_key()?;
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
            "dimensions": self.dims,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract the first embedding from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    json.get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first())
        .and_then(|item| item.get("embedding"))
        .and_then(json_to_vec)
        .ok_or_else(|| EmbedError::Backend("Invalid OpenAI response: missing embedding".into()))
}
