//! Structured model replies.
//!
//! Models are asked to put the terse answer on the first line and at most
//! three lines of supporting detail after it. A reply whose first line says
//! the model does not know is a decline, not an answer.

use regex::Regex;
use std::sync::LazyLock;

const MAX_DETAILS: usize = 3;

static DONT_KNOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^\W*(
            i\s+(do\s*not|don't|dont|can't|cant|cannot|am\s+not\s+able\s+to)\s+(know|find|tell|say|answer|determine)
          | i'm\s+not\s+sure
          | not\s+sure
          | unknown\W*$
          | no\s+(relevant\s+)?(information|answer|idea)
          | ((the|your)\s+)?(provided\s+)?(context|notes?|summary)\s+(does|do)\s*(not|n't)\s+(contain|mention|say|include|provide)
          | there\s+is\s+no\s+(relevant\s+)?(information|mention)
        )",
    )
    .expect("don't-know pattern is valid")
});

static LEADING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[-*•]\s*|\d+[.)]\s+|answer\s*:\s*|details?\s*:\s*)+")
        .expect("label pattern is valid")
});

/// First line = terse answer, then up to three supporting details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredReply {
    pub answer: String,
    pub details: Vec<String>,
}

impl StructuredReply {
    pub fn plain(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            details: Vec::new(),
        }
    }
}

/// Split raw model output into a [`StructuredReply`]. Returns `None` for
/// empty output.
pub fn parse_reply(raw: &str) -> Option<StructuredReply> {
    let mut lines = raw
        .lines()
        .map(|l| LEADING_LABEL.replace(l.trim(), "").trim().to_string())
        .filter(|l| !l.is_empty());

    let answer = lines.next()?;
    let details = lines.take(MAX_DETAILS).collect();
    Some(StructuredReply { answer, details })
}

/// True when `line` is a variant of "I don't know".
pub fn is_dont_know(line: &str) -> bool {
    let normalized = line.replace(['\u{2019}', '\u{2018}'], "'");
    DONT_KNOW.is_match(&normalized)
}

/// Parse and apply the decline rule in one step: `None` means the model
/// declined or produced nothing.
pub fn accept_reply(raw: &str) -> Option<StructuredReply> {
    parse_reply(raw).filter(|r| !is_dont_know(&r.answer))
}
