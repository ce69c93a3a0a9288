//! Embedding backend for a local Ollama instance.
//!
//! Initialization calls `POST /api/pull` with streaming enabled, which both
//! ensures the model is present and reports download progress as
//! newline-delimited JSON (`{"status", "total", "completed"}`). Embeddings
//! come from `POST /api/embed`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{json_to_vec, post_json_with_retry, EmbeddingBackend, ProgressFn};
use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

const DEFAULT_URL: &str = "http://localhost:11434";

pub struct OllamaBackend {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EmbedError::Unavailable("embedding.model required for Ollama".into()))?;
        let dims = config.dims.unwrap_or(match model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            _ => 384,
        });
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn initialize(&self, on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
        // The pull can take minutes; it must not inherit the per-request timeout.
        let client = reqwest::Client::new();
        let mut response = client
            .post(format!("{}/api/pull", self.url))
            .json(&serde_json::json!({ "model": self.model, "stream": true }))
            .send()
            .await
            .map_err(|e| {
                EmbedError::Unavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Unavailable(format!(
                "Ollama pull failed {}: {}",
                status, body
            )));
        }

        let mut pending: Vec<u8> = Vec::new();
        loop {
            let next = response
                .chunk()
                .await
                .map_err(|e| EmbedError::Unavailable(format!("Ollama pull stream: {}", e)))?;
            let Some(bytes) = next else { break };
            pending.extend_from_slice(&bytes);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                handle_pull_line(&line, on_progress)?;
            }
        }
        if !pending.is_empty() {
            handle_pull_line(&pending, on_progress)?;
        }

        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_embed_response(&json)
    }
}

/// Interpret one NDJSON line of a streaming pull.
fn handle_pull_line(line: &[u8], on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
    let trimmed = String::from_utf8_lossy(line);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    let Ok(event) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        debug!(line = trimmed, "ignoring unparseable pull line");
        return Ok(());
    };

    if let Some(err) = event.get("error").and_then(|e| e.as_str()) {
        return Err(EmbedError::Unavailable(format!("Ollama pull: {}", err)));
    }

    let total = event.get("total").and_then(|v| v.as_f64());
    let completed = event.get("completed").and_then(|v| v.as_f64());
    if let (Some(total), Some(completed)) = (total, completed) {
        if total > 0.0 {
            on_progress(((completed / total) as f32).clamp(0.0, 1.0));
        }
    }
    Ok(())
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|arr| arr.first())
        .and_then(json_to_vec)
        .ok_or_else(|| EmbedError::Backend("Invalid Ollama response: missing embeddings".into()))
}
