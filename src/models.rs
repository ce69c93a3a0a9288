//! Core data models used throughout the pipeline.
//!
//! These types represent the sources, chunks, and answers that flow through
//! the indexing (write) and question-answering (read) paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a source is owner-authored text or an extracted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Note,
    Document,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Note => "note",
            SourceKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "note" => Some(SourceKind::Note),
            "document" => Some(SourceKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePage {
    pub page_number: u32,
    pub text: String,
}

/// Body of a source as supplied by the note/document collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceContent {
    /// A single text blob.
    Note { body: String },
    /// Ordered `(pageNumber, text)` pairs from an external extractor.
    /// `extraction_error` is set when the extractor failed outright.
    Document {
        pages: Vec<SourcePage>,
        extraction_error: Option<String>,
    },
}

/// A note or document, identified by `(owner_id, id, kind)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: String,
    pub owner_id: String,
    /// Note title, or document file name.
    pub title: String,
    pub content: SourceContent,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn note(
        owner_id: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            content: SourceContent::Note { body: body.into() },
            updated_at,
        }
    }

    pub fn document(
        owner_id: impl Into<String>,
        id: impl Into<String>,
        file_name: impl Into<String>,
        pages: Vec<SourcePage>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: file_name.into(),
            content: SourceContent::Document {
                pages,
                extraction_error: None,
            },
            updated_at,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self.content {
            SourceContent::Note { .. } => SourceKind::Note,
            SourceContent::Document { .. } => SourceKind::Document,
        }
    }

    /// Last-modified time in epoch milliseconds, the unit stored alongside
    /// chunks and index timestamps.
    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }
}

/// A bounded excerpt of one source's normalized text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Derived from the owner, source id and `chunk_index`.
    pub id: String,
    pub owner_id: String,
    pub source_id: String,
    pub source_type: SourceKind,
    pub source_title: String,
    /// Zero-based, contiguous per source.
    pub chunk_index: i64,
    /// Header line followed by the excerpt.
    pub content: String,
    /// Documents only.
    pub page_number: Option<u32>,
    /// Source modification time, epoch milliseconds.
    pub updated_at: i64,
    /// SHA-256 of `content`.
    pub hash: String,
}

impl Chunk {
    /// The excerpt text without its `# title` header line.
    pub fn body(&self) -> &str {
        match self.content.split_once('\n') {
            Some((first, rest)) if first.starts_with("# ") => rest,
            Some(_) => &self.content,
            None if self.content.starts_with("# ") => "",
            None => &self.content,
        }
    }

    /// Human-readable label: the title, plus the page for documents.
    pub fn label(&self) -> String {
        match self.page_number {
            Some(page) => format!("{} (p. {})", self.source_title, page),
            None => self.source_title.clone(),
        }
    }
}

/// A chunk together with its embedding vector, the unit the store persists.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk scored against a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Which stage of the fallback chain produced the answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerUsed {
    LocalModel,
    HostedModel,
    WebKnowledge,
    Generic,
}

impl AnswerUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerUsed::LocalModel => "local_model",
            AnswerUsed::HostedModel => "hosted_model",
            AnswerUsed::WebKnowledge => "web_knowledge",
            AnswerUsed::Generic => "generic",
        }
    }
}

/// A note or document excerpt cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerSource {
    pub source_id: String,
    pub source_type: SourceKind,
    pub source_title: String,
    pub chunk_id: String,
    pub snippet: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// The caller-facing result of a question.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<AnswerSource>,
    pub used: AnswerUsed,
}
