//! Web-knowledge fallback over a public encyclopedia summary endpoint.
//!
//! The question is reduced to a bare subject ("who is Ada Lovelace?" becomes
//! "Ada Lovelace") and looked up with
//! `GET {base}/api/rest_v1/page/summary/{subject}`. A missing page or a
//! disambiguation page is a normal `None`, not an error.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

use super::hosted::HostedModel;
use super::reply::{accept_reply, StructuredReply};
use super::{prompts, AnswerRequest, AnswerStage, StageAnswer, StageOutcome};
use crate::config::WebConfig;
use crate::error::ProviderError;
use crate::models::AnswerUsed;

const LEADING_SENTENCES: usize = 2;

static INTERROGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^\s*(
            (who|what|where|when|which)\s+(is|are|was|were)
          | tell\s+me\s+(about|of)
          | what\s+do\s+you\s+know\s+about
          | (define|describe|explain)
        )\s+",
    )
    .expect("interrogative pattern is valid")
});

static ARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(the|a|an)\s+").expect("article pattern is valid"));

static TRAILING_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s?!.,;:]+$").expect("punctuation pattern is valid"));

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]+|[^.!?]+$").expect("sentence pattern is valid"));

/// Reduce a question to the subject it asks about.
pub fn strip_to_entity(question: &str) -> String {
    let s = INTERROGATIVE.replace(question.trim(), "");
    let s = ARTICLE.replace(&s, "");
    TRAILING_PUNCT.replace(&s, "").trim().to_string()
}

/// First `n` sentences of `text`, trimmed and joined by single spaces.
pub fn leading_sentences(text: &str, n: usize) -> String {
    SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .take(n)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSummary {
    pub title: String,
    pub extract: String,
    pub url: Option<String>,
}

#[async_trait]
pub trait WebKnowledge: Send + Sync {
    async fn summarize(&self, entity: &str) -> Result<Option<WebSummary>, ProviderError>;
}

#[derive(Deserialize)]
struct SummaryPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    content_urls: Option<ContentUrls>,
}

#[derive(Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Deserialize)]
struct PageUrl {
    page: Option<String>,
}

/// Wikipedia REST page summaries.
pub struct WikipediaSummary {
    client: reqwest::Client,
    base: String,
}

impl WikipediaSummary {
    pub fn new(config: &WebConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("notes-rag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn summary_url(&self, entity: &str) -> Result<reqwest::Url, ProviderError> {
        let mut url = reqwest::Url::parse(&self.base)
            .map_err(|e| ProviderError::NotConfigured(format!("web.url: {}", e)))?;
        let title = entity.split_whitespace().collect::<Vec<_>>().join("_");
        url.path_segments_mut()
            .map_err(|_| ProviderError::NotConfigured("web.url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary", title.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl WebKnowledge for WikipediaSummary {
    async fn summarize(&self, entity: &str) -> Result<Option<WebSummary>, ProviderError> {
        if entity.trim().is_empty() {
            return Ok(None);
        }
        let url = self.summary_url(entity)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: SummaryPayload = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        if payload.kind == "disambiguation" || payload.extract.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(WebSummary {
            title: payload.title,
            extract: payload.extract,
            url: payload
                .content_urls
                .and_then(|u| u.desktop)
                .and_then(|d| d.page),
        }))
    }
}

/// Answers from a web summary when notes had nothing or every model declined.
pub struct WebStage {
    provider: Arc<dyn WebKnowledge>,
    hosted: Option<Arc<HostedModel>>,
}

impl WebStage {
    pub fn new(provider: Arc<dyn WebKnowledge>, hosted: Option<Arc<HostedModel>>) -> Self {
        Self { provider, hosted }
    }

    fn direct(summary: &WebSummary) -> StructuredReply {
        StructuredReply::plain(format!(
            "{}: {}",
            summary.title,
            leading_sentences(&summary.extract, LEADING_SENTENCES)
        ))
    }
}

#[async_trait]
impl AnswerStage for WebStage {
    fn name(&self) -> &'static str {
        "web_knowledge"
    }

    async fn try_answer(&self, req: &AnswerRequest<'_>) -> StageOutcome {
        let entity = strip_to_entity(req.question);
        let summary = match self.provider.summarize(&entity).await {
            Ok(Some(s)) => s,
            Ok(None) => return StageOutcome::Declined(format!("no summary for {:?}", entity)),
            Err(e) => return StageOutcome::Declined(e.to_string()),
        };

        let hosted = self.hosted.as_ref().filter(|h| h.is_configured());
        let reply = match hosted {
            None => Self::direct(&summary),
            Some(model) => {
                let user = prompts::web_user(req.question, &summary.title, &summary.extract);
                match model
                    .complete(prompts::WEB_SYSTEM, &user, model.temperature, model.max_tokens)
                    .await
                {
                    Ok(raw) => match accept_reply(&raw) {
                        Some(reply) => reply,
                        None => {
                            return StageOutcome::Declined("summary does not answer the question".into())
                        }
                    },
                    Err(e) => {
                        debug!(error = %e, "hosted model failed on web summary; using summary text");
                        Self::direct(&summary)
                    }
                }
            }
        };

        StageOutcome::Answered(StageAnswer {
            reply,
            used: AnswerUsed::WebKnowledge,
        })
    }
}
