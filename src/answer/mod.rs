//! Answer fallback chain.
//!
//! Stages are tried in a fixed order until one answers:
//!
//! | Stage | Runs when | `used` |
//! |-------|-----------|--------|
//! | [`LocalStage`] | caller prefers on-device, notes matched, runtime capable | `local_model` |
//! | [`HostedStage`] | notes matched, hosted model configured | `hosted_model` |
//! | [`WebStage`] | web fallback enabled and a summary exists | `web_knowledge` |
//! | generic | always | `generic` |
//!
//! Without a note match the model stages decline immediately, so the chain
//! goes straight to the web stage. A stage never retries and never errors:
//! provider failures become [`StageOutcome::Declined`].

pub mod format;
pub mod hosted;
pub mod local;
mod prompts;
pub mod reply;
pub mod web;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{AnswerUsed, AskResponse};
use crate::retrieve::Retrieval;

pub use hosted::{HostedModel, HostedStage};
pub use local::{Capability, LocalModel, LocalStage};
pub use reply::StructuredReply;
pub use web::{WebKnowledge, WebStage, WebSummary, WikipediaSummary};

/// Returned when every stage declined. Carries no sources.
pub const GENERIC_ANSWER: &str =
    "I couldn't find anything relevant in your notes or documents, and no other answer source was available.";

/// Callback receiving the on-device reply as it streams in.
pub type ProgressTextFn = dyn Fn(&str) + Send + Sync;

/// Everything a stage may look at.
pub struct AnswerRequest<'a> {
    pub question: &'a str,
    pub retrieval: &'a Retrieval,
    pub prefer_local: bool,
    pub on_local_progress: Option<&'a ProgressTextFn>,
    pub snippet_chars: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageAnswer {
    pub reply: StructuredReply,
    pub used: AnswerUsed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Answered(StageAnswer),
    Declined(String),
}

#[async_trait]
pub trait AnswerStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn try_answer(&self, req: &AnswerRequest<'_>) -> StageOutcome;
}

pub struct AnswerChain {
    stages: Vec<Box<dyn AnswerStage>>,
}

impl AnswerChain {
    pub fn new(stages: Vec<Box<dyn AnswerStage>>) -> Self {
        Self { stages }
    }

    /// Build the configured chain. Stages whose provider is switched off
    /// are left out; a web client that cannot be built is skipped with a
    /// warning.
    pub fn from_config(config: &Config) -> Self {
        let mut stages: Vec<Box<dyn AnswerStage>> = Vec::new();
        if config.local_llm.enabled {
            let local = Arc::new(LocalModel::from_config(&config.local_llm));
            stages.push(Box::new(LocalStage::new(local)));
        }

        let hosted = config
            .llm
            .is_enabled()
            .then(|| Arc::new(HostedModel::from_config(&config.llm)));
        if let Some(model) = &hosted {
            stages.push(Box::new(HostedStage::new(model.clone())));
        }

        if config.web.enabled {
            match WikipediaSummary::new(&config.web) {
                Ok(wiki) => stages.push(Box::new(WebStage::new(Arc::new(wiki), hosted))),
                Err(e) => warn!(error = %e, "web fallback disabled"),
            }
        }
        Self::new(stages)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the chain. Always produces a response.
    pub async fn answer(&self, req: &AnswerRequest<'_>) -> AskResponse {
        for stage in &self.stages {
            match stage.try_answer(req).await {
                StageOutcome::Answered(answer) => {
                    info!(stage = stage.name(), "answered");
                    return compose(req, answer);
                }
                StageOutcome::Declined(reason) => {
                    debug!(stage = stage.name(), %reason, "declined");
                }
            }
        }
        AskResponse {
            answer: GENERIC_ANSWER.to_string(),
            sources: Vec::new(),
            used: AnswerUsed::Generic,
        }
    }
}

/// Apply the uniform formatting. Model answers drawn from notes carry an
/// inline citation; a web answer lists matched notes only when there was a
/// match, without citing them inline.
fn compose(req: &AnswerRequest<'_>, answer: StageAnswer) -> AskResponse {
    let retrieval = req.retrieval;
    let from_notes = matches!(answer.used, AnswerUsed::LocalModel | AnswerUsed::HostedModel);

    let citations = if from_notes {
        format::citation_labels(&retrieval.selected)
    } else {
        Vec::new()
    };
    let (sources, supplement) = if retrieval.has_match {
        (
            retrieval.answer_sources(req.snippet_chars),
            retrieval.supplementary_block(),
        )
    } else {
        (Vec::new(), None)
    };

    AskResponse {
        answer: format::render(&answer.reply, &citations, supplement.as_deref()),
        sources,
        used: answer.used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ScoredChunk, SourceKind};
    use crate::retrieve::{select, RetrieveOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        outcome: StageOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AnswerStage for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn try_answer(&self, _req: &AnswerRequest<'_>) -> StageOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn answered(text: &str, used: AnswerUsed) -> StageOutcome {
        StageOutcome::Answered(StageAnswer {
            reply: StructuredReply::plain(text),
            used,
        })
    }

    fn retrieval(score: f32) -> Retrieval {
        let chunk = Chunk {
            id: "u:r:0".into(),
            owner_id: "u".into(),
            source_id: "r".into(),
            source_type: SourceKind::Note,
            source_title: "Recipes".into(),
            chunk_index: 0,
            content: "Bake the bread at 200C for twenty minutes.".into(),
            page_number: None,
            updated_at: 0,
            hash: String::new(),
        };
        select(
            vec![ScoredChunk { chunk, score }],
            "What temperature to bake bread?",
            &RetrieveOptions::default(),
        )
    }

    fn request(r: &Retrieval) -> AnswerRequest<'_> {
        AnswerRequest {
            question: "What temperature to bake bread?",
            retrieval: r,
            prefer_local: false,
            on_local_progress: None,
            snippet_chars: 180,
        }
    }

    #[tokio::test]
    async fn test_first_answering_stage_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let chain = AnswerChain::new(vec![
            Box::new(Fixed {
                name: "a",
                outcome: StageOutcome::Declined("no".into()),
                calls: first.clone(),
            }),
            Box::new(Fixed {
                name: "b",
                outcome: answered("200C", AnswerUsed::HostedModel),
                calls: second.clone(),
            }),
            Box::new(Fixed {
                name: "c",
                outcome: answered("never", AnswerUsed::WebKnowledge),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        ]);

        let r = retrieval(0.8);
        let resp = chain.answer(&request(&r)).await;
        assert_eq!(resp.used, AnswerUsed::HostedModel);
        assert!(resp.answer.starts_with("\"200C\" (Sources: Recipes)"));
        assert!(resp.answer.contains("From your notes:"));
        assert_eq!(resp.sources.len(), 1);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_declined_is_generic_without_sources() {
        let chain = AnswerChain::new(vec![Box::new(Fixed {
            name: "a",
            outcome: StageOutcome::Declined("no".into()),
            calls: Arc::new(AtomicUsize::new(0)),
        })]);
        let r = retrieval(0.8);
        let resp = chain.answer(&request(&r)).await;
        assert_eq!(resp.used, AnswerUsed::Generic);
        assert_eq!(resp.answer, GENERIC_ANSWER);
        assert!(resp.sources.is_empty());
    }

    #[tokio::test]
    async fn test_web_answer_without_match_has_no_sources() {
        let chain = AnswerChain::new(vec![Box::new(Fixed {
            name: "web",
            outcome: answered("Bread: Bread is a staple food.", AnswerUsed::WebKnowledge),
            calls: Arc::new(AtomicUsize::new(0)),
        })]);
        let r = retrieval(0.05);
        assert!(!r.has_match);
        let resp = chain.answer(&request(&r)).await;
        assert_eq!(resp.used, AnswerUsed::WebKnowledge);
        assert_eq!(resp.answer, "Bread: Bread is a staple food.");
        assert!(resp.sources.is_empty());
    }

    #[tokio::test]
    async fn test_web_answer_with_match_lists_sources_without_citation() {
        let chain = AnswerChain::new(vec![Box::new(Fixed {
            name: "web",
            outcome: answered("Bread: Bread is a staple food.", AnswerUsed::WebKnowledge),
            calls: Arc::new(AtomicUsize::new(0)),
        })]);
        let r = retrieval(0.8);
        let resp = chain.answer(&request(&r)).await;
        assert!(!resp.answer.contains("(Sources:"));
        assert!(resp.answer.contains("From your notes:"));
        assert_eq!(resp.sources.len(), 1);
    }

    #[test]
    fn test_from_config_default_has_web_only() {
        let chain = AnswerChain::from_config(&Config::default());
        assert_eq!(chain.stage_names(), vec!["web_knowledge"]);
    }
}
