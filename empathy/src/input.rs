//! Sanitizing what the participant types.

/// Keep at most `budget` non-whitespace characters.
///
/// Whitespace is kept as typed and does not count against the budget.
/// Returns the sanitized text and whether anything was cut.
pub fn truncate_visible(text: &str, budget: usize) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut visible = 0;

    for c in text.chars() {
        if c.is_whitespace() {
            out.push(c);
            continue;
        }
        if visible == budget {
            return (out.trim_end().to_string(), true);
        }
        visible += 1;
        out.push(c);
    }
    (out, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_budget_is_untouched() {
        assert_eq!(truncate_visible("it was fun", 200), ("it was fun".to_string(), false));
    }

    #[test]
    fn test_whitespace_does_not_count() {
        // eight visible characters, three spaces
        let (text, cut) = truncate_visible("ab cd ef gh", 8);
        assert_eq!(text, "ab cd ef gh");
        assert!(!cut);
    }

    #[test]
    fn test_cut_at_budget() {
        let (text, cut) = truncate_visible("ab cd ef gh", 5);
        assert_eq!(text, "ab cd e");
        assert!(cut);
    }

    #[test]
    fn test_multibyte_characters() {
        let (text, cut) = truncate_visible("오늘 정말 재밌었어", 4);
        assert_eq!(text, "오늘 정말");
        assert!(cut);
    }
}
