//! Ledger of questions the automated counterpart has already asked.

use serde::{Deserialize, Serialize};

/// Rendered in prompts when nothing has been recorded yet.
pub const NO_QUESTIONS_YET: &str = "(no free questions generated so far)";

/// Pull the question out of a generated reply.
///
/// Scans lines from the last one backward and returns the first non-blank
/// line containing `?`, trimmed. Returns an empty string when no line does.
pub fn extract_question(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.contains('?'))
        .unwrap_or_default()
        .to_string()
}

/// Questions extracted from automated turns, in the order they were asked.
///
/// Grows monotonically for the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionLedger {
    questions: Vec<String>,
}

impl QuestionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a question and report whether it had been asked before.
    ///
    /// Duplicates are still appended. Empty strings are ignored.
    pub fn record(&mut self, question: impl Into<String>) -> bool {
        let question = question.into();
        if question.is_empty() {
            return false;
        }
        let seen = self.contains(&question);
        self.questions.push(question);
        seen
    }

    pub fn contains(&self, question: &str) -> bool {
        self.questions.iter().any(|q| q == question)
    }

    /// The most recently recorded question.
    pub fn last(&self) -> Option<&str> {
        self.questions.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(String::as_str)
    }

    /// All questions joined with ` / `, for prompt injection.
    pub fn render(&self) -> String {
        if self.questions.is_empty() {
            NO_QUESTIONS_YET.to_string()
        } else {
            self.questions.join(" / ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_question_prefers_last_line() {
        let reply = "Is that right?\nThat sounds wonderful.\nWhat did you draw first?\n";
        assert_eq!(extract_question(reply), "What did you draw first?");
    }

    #[test]
    fn test_extract_question_skips_trailing_blank_lines() {
        let reply = "Wow, a dragon!\n   What colour was it?   \n\n  \n";
        assert_eq!(extract_question(reply), "What colour was it?");
    }

    #[test]
    fn test_extract_question_none() {
        assert_eq!(extract_question("That was great. Bye"), "");
        assert_eq!(extract_question(""), "");
    }

    #[test]
    fn test_record_reports_duplicates_and_still_appends() {
        let mut ledger = QuestionLedger::new();
        assert!(!ledger.record("What did you draw?"));
        assert!(ledger.record("What did you draw?"));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.last(), Some("What did you draw?"));
    }

    #[test]
    fn test_record_ignores_empty() {
        let mut ledger = QuestionLedger::new();
        assert!(!ledger.record(""));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_render() {
        let mut ledger = QuestionLedger::new();
        assert_eq!(ledger.render(), NO_QUESTIONS_YET);
        ledger.record("A?");
        ledger.record("B?");
        assert_eq!(ledger.render(), "A? / B?");
        assert_eq!(ledger.iter().collect::<Vec<_>>(), vec!["A?", "B?"]);
    }
}
