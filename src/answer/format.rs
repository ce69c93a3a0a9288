//! Uniform answer formatting, independent of which stage answered.

use super::reply::StructuredReply;
use crate::models::ScoredChunk;

const TERSE_MAX_CHARS: usize = 80;
const MAX_CITED: usize = 3;

/// Wrap entity-like answers (at most 80 characters, no terminal
/// punctuation) in quotes.
pub fn quote_if_terse(answer: &str) -> String {
    let answer = answer.trim();
    let already_quoted = answer.starts_with('"') && answer.ends_with('"') && answer.len() > 1;
    let terminal = answer
        .chars()
        .last()
        .is_some_and(|c| matches!(c, '.' | '!' | '?' | ':' | ';' | '…'));
    if answer.is_empty() || already_quoted || terminal || answer.chars().count() > TERSE_MAX_CHARS {
        return answer.to_string();
    }
    format!("\"{}\"", answer)
}

/// Labels of the top contributing sources, best first, at most three,
/// without duplicates. Documents carry their page.
pub fn citation_labels(selected: &[ScoredChunk]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for sc in selected {
        let label = sc.chunk.label();
        if !labels.contains(&label) {
            labels.push(label);
        }
        if labels.len() == MAX_CITED {
            break;
        }
    }
    labels
}

/// Render the final answer text:
///
/// ```text
/// "<terse answer>" (Sources: A; b.pdf (p. 2))
/// <detail>
/// <detail>
///
/// From your notes:
/// - A: ...
/// ```
pub fn render(reply: &StructuredReply, citations: &[String], supplement: Option<&str>) -> String {
    let mut first = quote_if_terse(&reply.answer);
    if !citations.is_empty() {
        first.push_str(&format!(" (Sources: {})", citations.join("; ")));
    }

    let mut out = first;
    for detail in &reply.details {
        out.push('\n');
        out.push_str(detail);
    }
    if let Some(block) = supplement {
        out.push_str("\n\n");
        out.push_str(block);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, SourceKind};

    fn sc(title: &str, page: Option<u32>) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: String::new(),
                owner_id: "u".into(),
                source_id: title.into(),
                source_type: if page.is_some() {
                    SourceKind::Document
                } else {
                    SourceKind::Note
                },
                source_title: title.into(),
                chunk_index: 0,
                content: String::new(),
                page_number: page,
                updated_at: 0,
                hash: String::new(),
            },
            score: 0.5,
        }
    }

    #[test]
    fn test_quote_terse_answers_only() {
        assert_eq!(quote_if_terse("200C"), "\"200C\"");
        assert_eq!(quote_if_terse("Bake it for twenty minutes."), "Bake it for twenty minutes.");
        assert_eq!(quote_if_terse(&"x".repeat(81)), "x".repeat(81));
        assert_eq!(quote_if_terse("\"Paris\""), "\"Paris\"");
    }

    #[test]
    fn test_citation_labels_dedupe_and_cap() {
        let selected = vec![
            sc("Recipes", None),
            sc("Recipes", None),
            sc("oven.pdf", Some(4)),
            sc("Shopping", None),
            sc("Garden", None),
        ];
        assert_eq!(
            citation_labels(&selected),
            vec!["Recipes", "oven.pdf (p. 4)", "Shopping"]
        );
    }

    #[test]
    fn test_render_layout() {
        let reply = StructuredReply {
            answer: "200C".into(),
            details: vec!["For 20 minutes.".into()],
        };
        let text = render(
            &reply,
            &["Recipes".to_string()],
            Some("From your notes:\n- Recipes: Bake at 200C."),
        );
        assert_eq!(
            text,
            "\"200C\" (Sources: Recipes)\nFor 20 minutes.\n\nFrom your notes:\n- Recipes: Bake at 200C."
        );
    }
}
