//! Caller-facing question answering.
//!
//! [`Assistant::ask_from_notes`] runs retrieval and then the answer chain.
//! It always returns a response: an embedder or store failure during
//! retrieval is logged and treated as "nothing relevant in the notes".

use std::sync::Arc;
use tracing::{debug, warn};

use crate::answer::{AnswerChain, AnswerRequest, ProgressTextFn};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::AskResponse;
use crate::retrieve::{retrieve, RetrieveOptions, Retrieval};
use crate::store::VectorStore;

/// One question. Every tuning field falls back to the configured default.
#[derive(Default)]
pub struct AskRequest<'a> {
    pub owner_id: &'a str,
    pub question: &'a str,
    pub top_k: Option<usize>,
    pub max_context_chars: Option<usize>,
    /// `None` keeps the assistant's default.
    pub prefer_local: Option<bool>,
    pub min_score: Option<f32>,
    pub min_top_score: Option<f32>,
    pub max_notes: Option<usize>,
    pub max_chunks_per_note: Option<usize>,
    pub on_local_progress_text: Option<&'a ProgressTextFn>,
}

impl<'a> AskRequest<'a> {
    pub fn new(owner_id: &'a str, question: &'a str) -> Self {
        Self {
            owner_id,
            question,
            ..Default::default()
        }
    }

    fn options(&self, defaults: &RetrieveOptions) -> RetrieveOptions {
        RetrieveOptions {
            top_k: self.top_k.unwrap_or(defaults.top_k),
            min_score: self.min_score.unwrap_or(defaults.min_score),
            min_top_score: self.min_top_score.unwrap_or(defaults.min_top_score),
            max_notes: self.max_notes.unwrap_or(defaults.max_notes),
            max_chunks_per_note: self
                .max_chunks_per_note
                .unwrap_or(defaults.max_chunks_per_note),
            max_context_chars: self.max_context_chars.unwrap_or(defaults.max_context_chars),
            ..defaults.clone()
        }
    }
}

pub struct Assistant {
    embedder: Arc<Embedder>,
    store: Arc<dyn VectorStore>,
    chain: AnswerChain,
    defaults: RetrieveOptions,
    prefer_local: bool,
}

impl Assistant {
    pub fn new(
        embedder: Arc<Embedder>,
        store: Arc<dyn VectorStore>,
        chain: AnswerChain,
        defaults: RetrieveOptions,
    ) -> Self {
        Self {
            embedder,
            store,
            chain,
            defaults,
            prefer_local: false,
        }
    }

    /// Wire the configured chain and retrieval defaults around a shared
    /// embedder and store. `local_llm.prefer` becomes the default for
    /// [`AskRequest::prefer_local`].
    pub fn from_config(config: &Config, embedder: Arc<Embedder>, store: Arc<dyn VectorStore>) -> Self {
        let mut assistant = Self::new(
            embedder,
            store,
            AnswerChain::from_config(config),
            config.retrieval.to_options(),
        );
        assistant.prefer_local = config.local_llm.prefer;
        assistant
    }

    pub fn defaults(&self) -> &RetrieveOptions {
        &self.defaults
    }

    /// Retrieval only, with the request's overrides applied.
    pub async fn retrieve(&self, req: &AskRequest<'_>) -> anyhow::Result<Retrieval> {
        let opts = req.options(&self.defaults);
        retrieve(&self.embedder, self.store.as_ref(), req.owner_id, req.question, &opts).await
    }

    pub async fn ask_from_notes(&self, req: AskRequest<'_>) -> AskResponse {
        let opts = req.options(&self.defaults);
        let retrieval = match retrieve(
            &self.embedder,
            self.store.as_ref(),
            req.owner_id,
            req.question,
            &opts,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "retrieval failed; answering without notes");
                Retrieval {
                    keywords: crate::retrieve::extract_keywords(req.question),
                    ..Default::default()
                }
            }
        };
        debug!(
            has_match = retrieval.has_match,
            top_score = ?retrieval.top_score(),
            selected = retrieval.selected.len(),
            context_chars = retrieval.context_text.chars().count(),
            "retrieval"
        );

        let answer_req = AnswerRequest {
            question: req.question,
            retrieval: &retrieval,
            prefer_local: req.prefer_local.unwrap_or(self.prefer_local),
            on_local_progress: req.on_local_progress_text,
            snippet_chars: opts.snippet_chars,
        };
        self.chain.answer(&answer_req).await
    }
}
