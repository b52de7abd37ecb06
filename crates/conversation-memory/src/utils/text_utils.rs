//! Efficient text processing utilities

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Characters-per-token ratio of the deterministic estimator. Kept in one
/// place so stored aggregates and round-trip tests agree.
pub const CHARS_PER_TOKEN: usize = 4;

/// Text helpers shared by the scorer, summarizer, and search paths.
pub struct TextUtils;

impl TextUtils {
    /// Deterministic token estimate for content without a caller-supplied
    /// count: `len / 4`, never less than 1. Exact tokenizer parity with any
    /// particular LLM is out of scope.
    pub fn estimate_tokens(content: &str) -> i64 {
        ((content.len() / CHARS_PER_TOKEN).max(1)) as i64
    }

    /// Normalize whitespace without allocating when the text is already clean.
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// First N whitespace-delimited words of a text.
    pub fn first_words(text: &str, n: usize) -> String {
        text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
    }

    pub fn count_words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    /// Truncate to at most `max_chars` characters, appending an ellipsis when
    /// anything was dropped. Operates on character boundaries.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            return Cow::Borrowed(text);
        }
        if max_chars <= 3 {
            return Cow::Borrowed("...");
        }
        let kept: String = text.chars().take(max_chars - 3).collect();
        Cow::Owned(format!("{}...", kept))
    }

    /// Keep the trailing `max_chars` characters, marking the dropped head.
    /// Used when merging summaries so the newest information survives.
    pub fn keep_tail(text: &str, max_chars: usize) -> Cow<'_, str> {
        let total = text.chars().count();
        if total <= max_chars {
            return Cow::Borrowed(text);
        }
        let tail: String = text.chars().skip(total - max_chars).collect();
        Cow::Owned(format!("... {}", tail.trim_start()))
    }

    /// Lowercased keywords of a text: words longer than 3 characters that are
    /// not stop words.
    pub fn extract_keywords(text: &str) -> Vec<String> {
        text.split_whitespace()
            .filter(|w| w.len() > 3)
            .map(|w| {
                w.to_lowercase()
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_string()
            })
            .filter(|w| w.len() > 3 && !crate::utils::topic_extractor::is_stop_word(w))
            .collect()
    }

    /// Check if word is significant (not stop word, long enough)
    pub fn is_significant_word(word: &str, min_len: usize) -> bool {
        word.len() >= min_len && !crate::utils::topic_extractor::is_stop_word(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_is_deterministic_and_floored() {
        assert_eq!(TextUtils::estimate_tokens(""), 1);
        assert_eq!(TextUtils::estimate_tokens("ab"), 1);
        assert_eq!(TextUtils::estimate_tokens("abcdefgh"), 2);
        let text = "a".repeat(160);
        assert_eq!(TextUtils::estimate_tokens(&text), 40);
        assert_eq!(
            TextUtils::estimate_tokens(&text),
            TextUtils::estimate_tokens(&text)
        );
    }

    #[test]
    fn normalize_whitespace_collapses_runs() {
        assert_eq!(
            TextUtils::normalize_whitespace("a  b\t\nc"),
            Cow::<str>::Owned("a b c".to_string())
        );
        assert!(matches!(
            TextUtils::normalize_whitespace("clean"),
            Cow::Borrowed("clean")
        ));
    }

    #[test]
    fn first_words_takes_leading_words() {
        assert_eq!(TextUtils::first_words("one two three four", 2), "one two");
        assert_eq!(TextUtils::first_words("one", 5), "one");
        assert_eq!(TextUtils::first_words("", 3), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(TextUtils::truncate_with_ellipsis("short", 10), "short");
        assert_eq!(TextUtils::truncate_with_ellipsis("abcdefghij", 8), "abcde...");
        // Multi-byte characters must not panic.
        let s = "héllo wörld, ünïcode everywhere";
        let truncated = TextUtils::truncate_with_ellipsis(s, 10);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn keep_tail_preserves_newest_text() {
        let merged = TextUtils::keep_tail("old old old NEW INFO", 10);
        assert!(merged.contains("NEW INFO"));
        assert!(merged.starts_with("..."));
        assert_eq!(TextUtils::keep_tail("fits", 10), "fits");
    }

    #[test]
    fn keywords_filter_stop_words() {
        let keywords = TextUtils::extract_keywords("what about machine learning with the cat");
        assert!(keywords.contains(&"machine".to_string()));
        assert!(keywords.contains(&"learning".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"with".to_string()));
    }
}
