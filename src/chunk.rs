//! Paragraph-boundary text chunker with overlap.
//!
//! Splits a source's normalized text into [`Chunk`]s of roughly
//! `target_chars` characters. Splitting occurs on paragraph boundaries
//! (blank lines) to preserve semantic coherence within each chunk; a single
//! paragraph longer than the target is emitted whole rather than split.
//!
//! When a buffer is flushed, the next buffer starts with the last
//! `overlap_chars` characters of the previous one so that a sentence
//! straddling the boundary is retrievable from either side.
//!
//! Documents are chunked page by page so page numbers stay attached to the
//! right excerpts; overlap never crosses a page boundary. Chunk indices are
//! contiguous across the whole source.
//!
//! Each chunk's content starts with a one-line header: `# <title>` for notes,
//! `# <file name> (Page <n>)` for documents. The header counts toward the
//! target size.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::models::{Chunk, Source, SourceContent};

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("blank-line pattern is valid"));

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Soft upper bound on chunk length in characters, header included.
    pub target_chars: usize,
    /// Characters carried from the end of one chunk into the next.
    pub overlap_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            target_chars: 1200,
            overlap_chars: 200,
        }
    }
}

/// Split a source into chunks. Deterministic for fixed input and options;
/// an empty source yields no chunks.
pub fn chunk_source(source: &Source, opts: &ChunkOptions) -> Vec<Chunk> {
    let updated_at = source.updated_at_ms();
    let mut chunks = Vec::new();

    match &source.content {
        SourceContent::Note { body } => {
            let header = format!("# {}", source.title);
            for text in pack_paragraphs(&normalize(body), &header, opts) {
                chunks.push(make_chunk(source, chunks.len() as i64, &header, &text, None, updated_at));
            }
        }
        SourceContent::Document { pages, .. } => {
            for page in pages {
                let header = format!("# {} (Page {})", source.title, page.page_number);
                for text in pack_paragraphs(&normalize(&page.text), &header, opts) {
                    chunks.push(make_chunk(
                        source,
                        chunks.len() as i64,
                        &header,
                        &text,
                        Some(page.page_number),
                        updated_at,
                    ));
                }
            }
        }
    }

    chunks
}

/// Normalize line endings to `\n` and trim surrounding whitespace.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Split normalized text into non-empty, trimmed paragraphs.
pub fn paragraphs(text: &str) -> Vec<&str> {
    BLANK_LINES
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Greedily pack paragraphs into chunk bodies.
fn pack_paragraphs(text: &str, header: &str, opts: &ChunkOptions) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let header_len = char_len(header) + 1; // +1 for the newline after the header
    let mut bodies = Vec::new();
    let mut buf = String::new();

    for para in paragraphs(text) {
        if !buf.is_empty() {
            let would_be = header_len + char_len(&buf) + 2 + char_len(para);
            if would_be > opts.target_chars {
                let tail = overlap_tail(&buf, opts.overlap_chars);
                bodies.push(std::mem::replace(&mut buf, tail));
            }
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        bodies.push(buf);
    }

    bodies
}

/// The last `overlap` characters of `text`, snapped forward to a word
/// boundary when the cut lands mid-word.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = char_len(text);
    if total <= overlap {
        return text.trim().to_string();
    }

    let start = text
        .char_indices()
        .nth(total - overlap)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[start..];

    let cut_mid_word = text[..start]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace());
    let snapped = if cut_mid_word {
        match tail.find(char::is_whitespace) {
            Some(ws) => &tail[ws..],
            None => tail,
        }
    } else {
        tail
    };

    snapped.trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(
    source: &Source,
    index: i64,
    header: &str,
    body: &str,
    page_number: Option<u32>,
    updated_at: i64,
) -> Chunk {
    let content = format!("{}\n{}", header, body);

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(&source.owner_id, &source.id, index),
        owner_id: source.owner_id.clone(),
        source_id: source.id.clone(),
        source_type: source.kind(),
        source_title: source.title.clone(),
        chunk_index: index,
        content,
        page_number,
        updated_at,
        hash,
    }
}

/// Stable chunk key for `(owner, source, index)`.
///
/// `%` and `:` inside the owner and source ids are percent-escaped, so
/// distinct pairs never share a key.
pub fn chunk_id(owner_id: &str, source_id: &str, index: i64) -> String {
    format!("{}:{}:{}", escape_id(owner_id), escape_id(source_id), index)
}

fn escape_id(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourcePage;
    use chrono::Utc;

    fn note(body: &str) -> Source {
        Source::note("owner", "n1", "Recipe", body, Utc::now())
    }

    fn opts(target: usize, overlap: usize) -> ChunkOptions {
        ChunkOptions {
            target_chars: target,
            overlap_chars: overlap,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_source(&note("Hello, world!"), &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "# Recipe\nHello, world!");
        assert_eq!(chunks[0].body(), "Hello, world!");
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_source(&note(""), &ChunkOptions::default()).is_empty());
        assert!(chunk_source(&note("  \r\n\n \t "), &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn test_recipe_overlaps_previous_tail() {
        let text = "Mix flour and water.\n\nBake at 200C for 20 minutes.";
        let chunks = chunk_source(&note(text), &opts(50, 200));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].body(), "Mix flour and water.");
        assert!(chunks[1].body().starts_with("Mix flour and water."));
        assert!(chunks[1].body().ends_with("Bake at 200C for 20 minutes."));
    }

    #[test]
    fn test_crlf_normalized() {
        let chunks = chunk_source(&note("One.\r\n\r\nTwo."), &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].body(), "One.\n\nTwo.");
    }

    #[test]
    fn test_long_paragraph_emitted_whole() {
        let long = "word ".repeat(100);
        let text = format!("Intro.\n\n{}\n\nOutro.", long.trim());
        let chunks = chunk_source(&note(&text), &opts(60, 0));
        assert!(chunks.iter().any(|c| c.body() == long.trim()));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_source(&note(&text), &opts(80, 20));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.id, chunk_id("owner", "n1", i as i64));
        }
    }

    #[test]
    fn test_chunk_id_escapes_separators() {
        assert_eq!(chunk_id("me", "kitchen/bread.md", 0), "me:kitchen/bread.md:0");
        assert_ne!(chunk_id("a:b", "c", 0), chunk_id("a", "b:c", 0));
        assert_eq!(chunk_id("a:b", "c", 0), "a%3Ab:c:0");
        assert_ne!(chunk_id("a%3Ab", "c", 0), chunk_id("a:b", "c", 0));
    }

    #[test]
    fn test_every_paragraph_covered() {
        let paras: Vec<String> = (0..30)
            .map(|i| format!("Fact {} about the garden and its soil.", i))
            .collect();
        let chunks = chunk_source(&note(&paras.join("\n\n")), &opts(120, 30));
        let joined: String = chunks.iter().map(|c| c.body()).collect::<Vec<_>>().join("\n");
        for p in &paras {
            assert!(joined.contains(p.as_str()), "missing paragraph: {}", p);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let source = note(text);
        let c1 = chunk_source(&source, &opts(20, 5));
        let c2 = chunk_source(&source, &opts(20, 5));
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_document_pages_keep_page_numbers() {
        let doc = Source::document(
            "owner",
            "d1",
            "manual.pdf",
            vec![
                SourcePage {
                    page_number: 1,
                    text: "Install the unit.".into(),
                },
                SourcePage {
                    page_number: 2,
                    text: String::new(),
                },
                SourcePage {
                    page_number: 3,
                    text: "Reset the breaker.".into(),
                },
            ],
            Utc::now(),
        );
        let chunks = chunk_source(&doc, &ChunkOptions::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "# manual.pdf (Page 1)\nInstall the unit.");
        assert_eq!(chunks[0].page_number, Some(1));
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].page_number, Some(3));
        // No overlap carried across pages.
        assert_eq!(chunks[1].body(), "Reset the breaker.");
    }

    #[test]
    fn test_overlap_tail_snaps_to_word() {
        assert_eq!(overlap_tail("alpha beta gamma", 8), "gamma");
        assert_eq!(overlap_tail("short", 100), "short");
        assert_eq!(overlap_tail("anything", 0), "");
    }
}
