//! On-device chat model served by a local Ollama runtime.
//!
//! Availability is checked before first use: the model must be listed by
//! `GET /api/tags`, and when acceleration is required, loading it must leave
//! part of it in VRAM (`GET /api/ps`, `size_vram > 0`). A successful check is
//! memoized for the process; a failed one is repeated on the next question,
//! so a runtime started later is picked up.
//! Replies stream from `POST /api/chat` as newline-delimited JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::reply::accept_reply;
use super::{prompts, AnswerRequest, AnswerStage, ProgressTextFn, StageAnswer, StageOutcome};
use crate::config::LocalLlmConfig;
use crate::error::ProviderError;
use crate::models::AnswerUsed;

/// Result of the availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Available,
    Unavailable(String),
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
    #[serde(default)]
    size_vram: u64,
}

pub struct LocalModel {
    client: reqwest::Client,
    enabled: bool,
    url: String,
    model: String,
    require_acceleration: bool,
    available: OnceCell<()>,
}

impl LocalModel {
    pub fn from_config(config: &LocalLlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            enabled: config.enabled,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            require_acceleration: config.require_acceleration,
            available: OnceCell::new(),
        }
    }

    fn matches_model(&self, name: &str) -> bool {
        name == self.model
            || name
                .strip_prefix(self.model.as_str())
                .is_some_and(|rest| rest.starts_with(':'))
    }

    pub async fn capability(&self) -> Capability {
        let checked = self
            .available
            .get_or_try_init(|| async {
                self.check().await?;
                info!(model = %self.model, "on-device model available");
                Ok::<_, String>(())
            })
            .await;
        match checked {
            Ok(_) => Capability::Available,
            Err(reason) => {
                debug!(model = %self.model, %reason, "on-device model unavailable");
                Capability::Unavailable(reason)
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        self.capability().await == Capability::Available
    }

    async fn check(&self) -> Result<(), String> {
        if !self.enabled {
            return Err("on-device model disabled".into());
        }

        let tags = self.list(&format!("{}/api/tags", self.url)).await?;
        if !tags.models.iter().any(|m| self.matches_model(&m.name)) {
            return Err(format!("model {} is not installed", self.model));
        }
        if !self.require_acceleration {
            return Ok(());
        }

        // An empty prompt loads the model without generating.
        let loaded = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&serde_json::json!({ "model": self.model, "prompt": "", "stream": false }))
            .send()
            .await
            .map_err(|e| format!("load failed: {}", e))?;
        if !loaded.status().is_success() {
            return Err(format!("load failed: HTTP {}", loaded.status()));
        }

        let running = self.list(&format!("{}/api/ps", self.url)).await?;
        let accelerated = running
            .models
            .iter()
            .any(|m| self.matches_model(&m.name) && m.size_vram > 0);
        if accelerated {
            Ok(())
        } else {
            Err("no GPU offload available".into())
        }
    }

    async fn list(&self, url: &str) -> Result<ModelList, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Ollama unreachable at {}: {}", self.url, e))?;
        if !response.status().is_success() {
            return Err(format!("{} returned HTTP {}", url, response.status()));
        }
        response
            .json::<ModelList>()
            .await
            .map_err(|e| format!("bad model list: {}", e))
    }

    /// Stream a chat completion. `on_text` receives the reply accumulated so
    /// far after every streamed fragment.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        on_text: Option<&ProgressTextFn>,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: true,
        };

        let mut response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut text = String::new();
        let mut pending: Vec<u8> = Vec::new();
        while let Some(bytes) = response.chunk().await? {
            pending.extend_from_slice(&bytes);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if apply_chat_line(&line, &mut text, on_text)? {
                    return Ok(text);
                }
            }
        }
        if !pending.is_empty() {
            apply_chat_line(&pending, &mut text, on_text)?;
        }
        Ok(text)
    }
}

/// Fold one NDJSON line into `text`. Returns true on the final line.
fn apply_chat_line(
    line: &[u8],
    text: &mut String,
    on_text: Option<&ProgressTextFn>,
) -> Result<bool, ProviderError> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::Malformed(format!("chat stream: {}", e)))?;
    if let Some(err) = chunk.error {
        return Err(ProviderError::Malformed(err));
    }
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            text.push_str(&message.content);
            if let Some(cb) = on_text {
                cb(text.as_str());
            }
        }
    }
    Ok(chunk.done)
}

/// Answers from note context on device, when the caller prefers it.
pub struct LocalStage {
    model: Arc<LocalModel>,
}

impl LocalStage {
    pub fn new(model: Arc<LocalModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl AnswerStage for LocalStage {
    fn name(&self) -> &'static str {
        "local_model"
    }

    async fn try_answer(&self, req: &AnswerRequest<'_>) -> StageOutcome {
        if !req.prefer_local {
            return StageOutcome::Declined("caller did not prefer on-device".into());
        }
        if !req.retrieval.has_match {
            return StageOutcome::Declined("no relevant notes".into());
        }
        if let Capability::Unavailable(reason) = self.model.capability().await {
            return StageOutcome::Declined(reason);
        }

        let user = prompts::notes_user(req.question, &req.retrieval.context_text);
        match self
            .model
            .complete(prompts::NOTES_SYSTEM, &user, req.on_local_progress)
            .await
        {
            Ok(raw) => match accept_reply(&raw) {
                Some(reply) => StageOutcome::Answered(StageAnswer {
                    reply,
                    used: AnswerUsed::LocalModel,
                }),
                None => {
                    debug!("on-device model declined");
                    StageOutcome::Declined("on-device model does not know".into())
                }
            },
            Err(e) => StageOutcome::Declined(e.to_string()),
        }
    }
}
