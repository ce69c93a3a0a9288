//! Prompt text shared by the model-backed stages.

pub const NOTES_SYSTEM: &str = "You answer questions using only the user's notes below. \
Reply with the short answer alone on the first line. \
Then give at most three short lines of supporting detail taken from the notes. \
If the notes do not contain the answer, reply exactly: I don't know.";

pub const WEB_SYSTEM: &str = "You answer questions using only the encyclopedia summary below. \
Reply with the short answer alone on the first line, then at most three short lines of detail. \
Do not add facts that are not in the summary. \
If the summary does not answer the question, reply exactly: I don't know.";

pub fn notes_user(question: &str, context: &str) -> String {
    format!("Notes:\n{}\n\nQuestion: {}", context, question)
}

pub fn web_user(question: &str, title: &str, extract: &str) -> String {
    format!("Summary of {}:\n{}\n\nQuestion: {}", title, extract, question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompts_carry_question_last() {
        let p = notes_user("When?", "Note: Trip\nMonday");
        assert!(p.starts_with("Notes:\nNote: Trip"));
        assert!(p.ends_with("Question: When?"));
        assert!(web_user("Who?", "Ada", "Ada was.").contains("Summary of Ada:\nAda was."));
    }
}
