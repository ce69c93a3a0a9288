//! Retrieval gate, diversity selection, and context assembly.
//!
//! # Pipeline
//!
//! ```text
//! question ─▶ embed ─▶ search(top_k) ─▶ gate(min_top_score)
//!                                          │
//!                     no match ◀───────────┤
//!                                          ▼
//!                         diversity(min_score, per-source cap, source cap)
//!                                          │ nothing clears min_score
//!                                          ├──────▶ first `fallback_chunks` candidates
//!                                          ▼
//!                               context text (max_context_chars)
//! ```
//!
//! Keywords extracted from the question only drive snippet windows and the
//! "From your notes" block; they never influence scoring.

use anyhow::Result;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::embedding::Embedder;
use crate::models::{AnswerSource, ScoredChunk, SourceKind};
use crate::search::search;
use crate::store::VectorStore;

const MAX_KEYWORDS: usize = 6;
const MIN_KEYWORD_CHARS: usize = 3;
const SUPPLEMENT_SOURCES: usize = 3;
const SUPPLEMENT_SENTENCES_PER_SOURCE: usize = 2;
const ELLIPSIS: char = '…';

static SENTENCES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]*").expect("sentence pattern is valid"));

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "has",
        "have", "her", "his", "him", "was", "were", "one", "our", "out", "what", "when",
        "where", "which", "who", "whom", "whose", "why", "how", "does", "did", "doing", "done",
        "this", "that", "these", "those", "with", "from", "about", "into", "onto", "over",
        "under", "than", "then", "there", "their", "they", "them", "your", "yours", "mine",
        "should", "would", "could", "will", "shall", "may", "might", "must", "been", "being",
        "its", "also", "just", "some", "much", "many", "more", "most", "very", "tell", "know",
        "please", "give", "get", "got", "use", "used", "need", "want", "say", "said", "like",
        "find", "show", "list", "explain", "describe", "notes", "note", "document", "anything",
        "something", "ever", "again", "between", "after", "before", "during", "she", "hers",
        "let", "make", "made", "way", "thing", "things",
    ]
    .into_iter()
    .collect()
});

/// Tuning parameters for one retrieval. Every field has a default.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveOptions {
    /// Candidates pulled from similarity search.
    pub top_k: usize,
    /// Per-chunk floor for diversity selection.
    pub min_score: f32,
    /// The best candidate must reach this for the index to count as relevant.
    pub min_top_score: f32,
    /// Distinct sources kept.
    pub max_notes: usize,
    /// Chunks kept per source.
    pub max_chunks_per_note: usize,
    /// Candidates used when nothing clears `min_score`.
    pub fallback_chunks: usize,
    /// Upper bound on `context_text` length, in characters.
    pub max_context_chars: usize,
    /// Snippet window, in characters.
    pub snippet_chars: usize,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            top_k: 12,
            min_score: 0.18,
            min_top_score: 0.12,
            max_notes: 4,
            max_chunks_per_note: 2,
            fallback_chunks: 4,
            max_context_chars: 8000,
            snippet_chars: 180,
        }
    }
}

/// Outcome of the retrieval gate and context builder.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub has_match: bool,
    /// Raw similarity search results, best first.
    pub candidates: Vec<ScoredChunk>,
    /// Chunks chosen for the context, best first. Empty without a match.
    pub selected: Vec<ScoredChunk>,
    pub context_text: String,
    pub keywords: Vec<String>,
}

impl Retrieval {
    pub fn top_score(&self) -> Option<f32> {
        self.candidates.first().map(|c| c.score)
    }

    /// Citable sources for the selected chunks, with keyword-centred snippets.
    pub fn answer_sources(&self, snippet_chars: usize) -> Vec<AnswerSource> {
        self.selected
            .iter()
            .map(|sc| AnswerSource {
                source_id: sc.chunk.source_id.clone(),
                source_type: sc.chunk.source_type,
                source_title: sc.chunk.source_title.clone(),
                chunk_id: sc.chunk.id.clone(),
                snippet: make_snippet(sc.chunk.body(), &self.keywords, snippet_chars),
                score: sc.score,
                page_number: sc.chunk.page_number,
            })
            .collect()
    }

    pub fn supplementary_block(&self) -> Option<String> {
        supplementary_block(&self.selected, &self.keywords)
    }
}

/// Embed the question, search the owner's chunks, and apply the gate.
pub async fn retrieve(
    embedder: &Embedder,
    store: &dyn VectorStore,
    owner_id: &str,
    question: &str,
    opts: &RetrieveOptions,
) -> Result<Retrieval> {
    let query = embedder.embed(question).await?;
    let candidates = search(store, owner_id, &query, opts.top_k).await?;
    Ok(select(candidates, question, opts))
}

/// Gate, select and assemble context from already-ranked candidates.
pub fn select(candidates: Vec<ScoredChunk>, question: &str, opts: &RetrieveOptions) -> Retrieval {
    let keywords = extract_keywords(question);
    if !has_match(&candidates, opts.min_top_score) {
        return Retrieval {
            has_match: false,
            candidates,
            keywords,
            ..Default::default()
        };
    }

    let selected = select_diverse(&candidates, opts);
    let context_text = build_context(&selected, opts.max_context_chars);
    Retrieval {
        has_match: true,
        candidates,
        selected,
        context_text,
        keywords,
    }
}

/// True when the best candidate reaches `min_top_score`. No candidates
/// means no match.
pub fn has_match(candidates: &[ScoredChunk], min_top_score: f32) -> bool {
    candidates
        .first()
        .is_some_and(|best| best.score >= min_top_score)
}

fn source_key(sc: &ScoredChunk) -> (SourceKind, &str) {
    (sc.chunk.source_type, sc.chunk.source_id.as_str())
}

/// Keep at most `max_chunks_per_note` chunks per source and
/// `max_notes` sources among candidates scoring at least `min_score`,
/// walking in descending score order. Falls back to the first
/// `fallback_chunks` candidates when nothing clears the floor.
pub fn select_diverse(candidates: &[ScoredChunk], opts: &RetrieveOptions) -> Vec<ScoredChunk> {
    let mut per_source: HashMap<(SourceKind, &str), usize> = HashMap::new();
    let mut selected = Vec::new();

    for sc in candidates.iter().filter(|c| c.score >= opts.min_score) {
        let key = source_key(sc);
        let taken = per_source.get(&key).copied();
        match taken {
            None if per_source.len() >= opts.max_notes => continue,
            Some(n) if n >= opts.max_chunks_per_note => continue,
            _ => {}
        }
        *per_source.entry(key).or_insert(0) += 1;
        selected.push(sc.clone());
    }

    if selected.is_empty() {
        return candidates
            .iter()
            .take(opts.fallback_chunks)
            .cloned()
            .collect();
    }
    selected
}

/// Group chunks by source (in order of each source's first appearance) and
/// lay them out under one header per source. Appending stops at the first
/// piece that would push the text past `max_chars`; a header left without
/// any chunk is dropped.
pub fn build_context(selected: &[ScoredChunk], max_chars: usize) -> String {
    let mut groups: Vec<((SourceKind, &str), Vec<&ScoredChunk>)> = Vec::new();
    for sc in selected {
        let key = source_key(sc);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, chunks)) => chunks.push(sc),
            None => groups.push((key, vec![sc])),
        }
    }

    let mut ctx = ContextBuf::new(max_chars);
    'sources: for ((kind, _), chunks) in &groups {
        let title = &chunks[0].chunk.source_title;
        let header = match kind {
            SourceKind::Note => format!("Note: {}", title),
            SourceKind::Document => format!("Document: {}", title),
        };
        if !ctx.push(header) {
            break;
        }

        let mut wrote_chunk = false;
        for sc in chunks {
            let body = sc.chunk.body().trim();
            let piece = match sc.chunk.page_number {
                Some(page) => format!("[Page {}]\n{}", page, body),
                None => body.to_string(),
            };
            if !ctx.push(piece) {
                if !wrote_chunk {
                    ctx.pop();
                }
                break 'sources;
            }
            wrote_chunk = true;
        }
    }

    ctx.finish()
}

/// Pieces joined by blank lines, with an exact running character count.
struct ContextBuf {
    parts: Vec<String>,
    used: usize,
    max: usize,
}

impl ContextBuf {
    const SEP: &'static str = "\n\n";

    fn new(max: usize) -> Self {
        Self {
            parts: Vec::new(),
            used: 0,
            max,
        }
    }

    fn cost(&self, piece: &str) -> usize {
        let sep = if self.parts.is_empty() { 0 } else { Self::SEP.len() };
        piece.chars().count() + sep
    }

    fn push(&mut self, piece: String) -> bool {
        let cost = self.cost(&piece);
        if self.used + cost > self.max {
            return false;
        }
        self.used += cost;
        self.parts.push(piece);
        true
    }

    fn pop(&mut self) {
        if let Some(last) = self.parts.pop() {
            let sep = if self.parts.is_empty() { 0 } else { Self::SEP.len() };
            self.used -= last.chars().count() + sep;
        }
    }

    fn finish(self) -> String {
        self.parts.join(Self::SEP)
    }
}

/// Lower-case, strip punctuation, drop stop-words and short tokens, dedupe,
/// and keep the first six.
pub fn extract_keywords(question: &str) -> Vec<String> {
    let cleaned: String = question
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut seen = HashSet::new();
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_KEYWORD_CHARS)
        .filter(|t| !STOP_WORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// A window of about `window` characters centred on the earliest keyword
/// occurrence, or the text's prefix when no keyword occurs. Truncated edges
/// are marked with an ellipsis.
pub fn make_snippet(text: &str, keywords: &[String], window: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = flat.chars().collect();
    let total = chars.len();
    if total <= window {
        return flat;
    }

    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let hit = keywords
        .iter()
        .filter_map(|kw| {
            let needle: Vec<char> = kw.chars().collect();
            find_chars(&lower, &needle).map(|pos| (pos, needle.len()))
        })
        .min_by_key(|(pos, _)| *pos);

    let (start, end) = match hit {
        Some((pos, len)) => {
            let centre = pos + len / 2;
            let start = centre.saturating_sub(window / 2);
            let end = (start + window).min(total);
            (end.saturating_sub(window), end)
        }
        None => (0, window),
    };

    let mut out = String::new();
    if start > 0 {
        out.push(ELLIPSIS);
    }
    out.push_str(chars[start..end].iter().collect::<String>().trim());
    if end < total {
        out.push(ELLIPSIS);
    }
    out
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A short "From your notes:" block of keyword-bearing sentences, grouped
/// by source and ordered by each source's best score.
pub fn supplementary_block(selected: &[ScoredChunk], keywords: &[String]) -> Option<String> {
    if keywords.is_empty() {
        return None;
    }

    struct Group<'a> {
        key: (SourceKind, &'a str),
        title: &'a str,
        best: f32,
        sentences: Vec<String>,
    }

    let mut groups: Vec<Group> = Vec::new();
    for sc in selected {
        let key = source_key(sc);
        let idx = match groups.iter().position(|g| g.key == key) {
            Some(i) => i,
            None => {
                groups.push(Group {
                    key,
                    title: &sc.chunk.source_title,
                    best: sc.score,
                    sentences: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[idx];
        group.best = group.best.max(sc.score);

        for m in SENTENCES.find_iter(sc.chunk.body()) {
            let sentence = m.as_str().trim();
            let lower = sentence.to_lowercase();
            if sentence.is_empty() || !keywords.iter().any(|k| lower.contains(k.as_str())) {
                continue;
            }
            if !group.sentences.iter().any(|s| s == sentence) {
                group.sentences.push(sentence.to_string());
            }
        }
    }

    groups.retain(|g| !g.sentences.is_empty());
    if groups.is_empty() {
        return None;
    }
    groups.sort_by(|a, b| b.best.total_cmp(&a.best));

    let mut lines = vec!["From your notes:".to_string()];
    for g in groups.iter().take(SUPPLEMENT_SOURCES) {
        let text = g
            .sentences
            .iter()
            .take(SUPPLEMENT_SENTENCES_PER_SOURCE)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("- {}: {}", g.title, text));
    }
    Some(lines.join("\n"))
}
