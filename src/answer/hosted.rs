//! Hosted chat-completion model over an OpenAI-compatible endpoint.
//!
//! Only HTTP 429 is retried: the delay starts at `backoff_ms` and doubles
//! per attempt, up to `max_retries` retries. Every other non-2xx status and
//! every transport error fails the call at once. No client-side timeout is
//! set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::reply::accept_reply;
use super::{prompts, AnswerRequest, AnswerStage, StageAnswer, StageOutcome};
use crate::config::LlmConfig;
use crate::error::ProviderError;
use crate::models::AnswerUsed;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct HostedModel {
    client: reqwest::Client,
    enabled: bool,
    url: String,
    model: String,
    api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    max_retries: u32,
    backoff_ms: u64,
}

impl HostedModel {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            enabled: config.is_enabled(),
            url: config.url.clone(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
        }
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotConfigured("hosted model disabled".into()));
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ProviderError::NotConfigured(format!(
                "{} not set",
                self.api_key_env
            ))),
        }
    }

    /// True when enabled and the API key is present.
    pub fn is_configured(&self) -> bool {
        self.api_key().is_ok()
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
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
            temperature,
            max_tokens,
        };

        let mut attempt: u32 = 0;
        loop {
            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&api_key)
                .json(&request)
                .send()
                .await?;
            let status = response.status();

            if status.as_u16() == 429 {
                if attempt >= self.max_retries {
                    warn!(attempts = attempt + 1, "hosted model still rate limited");
                    return Err(ProviderError::RateLimited {
                        attempts: attempt + 1,
                    });
                }
                let factor = 1u64 << attempt.min(16);
                let delay = Duration::from_millis(self.backoff_ms.saturating_mul(factor));
                debug!(attempt, ?delay, "hosted model rate limited; backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| ProviderError::Malformed("no choices[0].message.content".into()));
        }
    }
}

/// Answers from note context with the hosted model.
pub struct HostedStage {
    model: Arc<HostedModel>,
}

impl HostedStage {
    pub fn new(model: Arc<HostedModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl AnswerStage for HostedStage {
    fn name(&self) -> &'static str {
        "hosted_model"
    }

    async fn try_answer(&self, req: &AnswerRequest<'_>) -> StageOutcome {
        if !req.retrieval.has_match {
            return StageOutcome::Declined("no relevant notes".into());
        }
        if !self.model.is_configured() {
            return StageOutcome::Declined("hosted model not configured".into());
        }

        let user = prompts::notes_user(req.question, &req.retrieval.context_text);
        match self
            .model
            .complete(
                prompts::NOTES_SYSTEM,
                &user,
                self.model.temperature,
                self.model.max_tokens,
            )
            .await
        {
            Ok(raw) => match accept_reply(&raw) {
                Some(reply) => StageOutcome::Answered(StageAnswer {
                    reply,
                    used: AnswerUsed::HostedModel,
                }),
                None => StageOutcome::Declined("hosted model does not know".into()),
            },
            Err(e) => StageOutcome::Declined(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model(server: &MockServer, key_env: &str) -> HostedModel {
        HostedModel::from_config(&LlmConfig {
            provider: "openai".into(),
            url: format!("{}/v1/chat/completions", server.uri()),
            api_key_env: key_env.into(),
            max_retries: 2,
            backoff_ms: 1,
            ..Default::default()
        })
    }

    fn completion(text: &str) -> serde_json::Value {
        serde_json::json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] })
    }

    #[tokio::test]
    async fn test_complete_sends_bearer_and_parses() {
        std::env::set_var("NOTES_RAG_TEST_KEY_OK", "sk-test");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Paris")))
            .expect(1)
            .mount(&server)
            .await;

        let m = model(&server, "NOTES_RAG_TEST_KEY_OK");
        assert_eq!(m.complete("sys", "user", 0.2, 50).await.unwrap(), "Paris");
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_retries() {
        std::env::set_var("NOTES_RAG_TEST_KEY_429", "sk-test");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let m = model(&server, "NOTES_RAG_TEST_KEY_429");
        match m.complete("s", "u", 0.2, 10).await {
            Err(ProviderError::RateLimited { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        std::env::set_var("NOTES_RAG_TEST_KEY_500", "sk-test");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let m = model(&server, "NOTES_RAG_TEST_KEY_500");
        match m.complete("s", "u", 0.2, 10).await {
            Err(ProviderError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let server = MockServer::start().await;
        let m = model(&server, "NOTES_RAG_TEST_KEY_ABSENT");
        assert!(!m.is_configured());
        assert!(matches!(
            m.complete("s", "u", 0.2, 10).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
