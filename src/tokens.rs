//! Token budgeting for prompts and retrieval data.
//!
//! Uses a deterministic whitespace-delimited token model. Counts are
//! approximate relative to any given model tokenizer but stable, which
//! is what the budgeting contract needs: the same input always costs
//! the same, and trims always cut at a token boundary.

/// Count tokens in a text span.
pub fn count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Trim `text` to at most `max_tokens` tokens.
///
/// Cuts only at token boundaries and is idempotent: input that already
/// fits is returned unchanged, and re-trimming the output at the same
/// budget is a no-op.
pub fn trim(text: &str, max_tokens: usize) -> &str {
    if max_tokens == 0 {
        return "";
    }

    let mut seen = 0usize;
    let mut in_token = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_token = false;
        } else if !in_token {
            in_token = true;
            seen += 1;
            if seen > max_tokens {
                return text[..idx].trim_end();
            }
        }
    }
    text
}

/// Keep the longest prefix of `records` whose cumulative token cost
/// fits within `max_tokens`.
///
/// A record that would overflow the budget is excluded entirely rather
/// than partially serialized; order is preserved.
pub fn trim_records(records: &[String], max_tokens: usize) -> &[String] {
    let mut total = 0usize;
    let mut keep = 0usize;
    for record in records {
        let cost = count(record);
        if total + cost > max_tokens {
            break;
        }
        total += cost;
        keep += 1;
    }
    &records[..keep]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_whitespace_delimited() {
        assert_eq!(count(""), 0);
        assert_eq!(count("   "), 0);
        assert_eq!(count("one two  three\nfour"), 4);
    }

    #[test]
    fn trim_cuts_at_token_boundaries() {
        let text = "alpha beta gamma delta";
        assert_eq!(trim(text, 2), "alpha beta");
        assert_eq!(count(trim(text, 3)), 3);
    }

    #[test]
    fn trim_is_idempotent() {
        let text = "alpha beta gamma delta";
        // Already-fitting input comes back unchanged.
        assert_eq!(trim(text, 10), text);
        // Re-trimming trimmed output at the same budget is a no-op.
        let once = trim(text, 2);
        assert_eq!(trim(once, 2), once);
    }

    #[test]
    fn trim_never_increases_token_count() {
        let text = "a b c d e f g";
        for budget in 0..10 {
            assert!(count(trim(text, budget)) <= budget.min(count(text)));
        }
    }

    #[test]
    fn trim_zero_budget_is_empty() {
        assert_eq!(trim("anything at all", 0), "");
    }

    #[test]
    fn records_keep_only_the_fitting_prefix() {
        let records = vec![
            "one two".to_string(),          // 2 tokens
            "three four five".to_string(),  // 3 tokens
            "six".to_string(),              // 1 token
        ];
        // Second record would overflow a 4-token budget; it is dropped
        // whole along with everything after it.
        let kept = trim_records(&records, 4);
        assert_eq!(kept.len(), 1);
        // Budget of 5 fits the first two; the third would fit on its own
        // but only prefixes are considered.
        let kept = trim_records(&records, 5);
        assert_eq!(kept.len(), 2);
        let kept = trim_records(&records, 6);
        assert_eq!(kept.len(), 3);
    }
}
