//! Deterministic extractive summarization of evicted conversation batches.

use crate::memory_db::schema::{Role, StoredMessage};
use crate::utils::{TextUtils, TopicExtractor};
use tracing::debug;

/// Configuration for digest generation.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Leading words kept per message snippet.
    pub snippet_words: usize,
    /// Snippets kept per role group.
    pub snippets_per_role: usize,
    /// Upper bound on the merged session summary, in characters.
    pub max_summary_chars: usize,
    pub max_topics: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            snippet_words: 8,
            snippets_per_role: 3,
            max_summary_chars: 1200,
            max_topics: 3,
        }
    }
}

/// Derives a compact digest from an ordered message batch.
///
/// Fully deterministic: the same ordered input always produces the same
/// text. Messages are grouped by role in order of first appearance, each
/// group contributes leading-word snippets, and salient topics close the
/// digest.
pub struct Summarizer {
    config: SummarizerConfig,
    topics: TopicExtractor,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::new(SummarizerConfig::default())
    }
}

impl Summarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        let topics = TopicExtractor::new(config.max_topics, 4);
        Self { config, topics }
    }

    /// Summarize an ordered batch. Empty input yields an empty string — not
    /// an error; non-empty input always yields non-empty text.
    pub fn summarize(&self, messages: &[StoredMessage]) -> String {
        if messages.is_empty() {
            return String::new();
        }

        let mut role_order: Vec<Role> = Vec::new();
        for message in messages {
            if !role_order.contains(&message.role) {
                role_order.push(message.role);
            }
        }

        let mut parts: Vec<String> = Vec::new();

        for role in role_order {
            let snippets: Vec<String> = messages
                .iter()
                .filter(|m| m.role == role)
                .map(|m| {
                    let normalized = TextUtils::normalize_whitespace(&m.content);
                    TextUtils::first_words(&normalized, self.config.snippet_words)
                })
                .filter(|snippet| !snippet.is_empty())
                .take(self.config.snippets_per_role)
                .collect();

            if !snippets.is_empty() {
                parts.push(format!("{} turns covered: {}.", role_label(role), snippets.join("; ")));
            }
        }

        let topics = self
            .topics
            .extract_from_texts(messages.iter().map(|m| m.content.as_str()));
        if !topics.is_empty() {
            parts.push(format!("Key topics: {}.", topics.join(", ")));
        }

        if parts.is_empty() {
            // Content was all whitespace; still report what was condensed.
            parts.push(format!("Condensed {} earlier messages.", messages.len()));
        }

        let digest = parts.join(" ");
        let original_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        debug!(
            "Summarized {} messages ({} chars -> {} chars)",
            messages.len(),
            original_chars,
            digest.len()
        );

        digest
    }

    /// Fold a fresh digest into an existing session summary. The result is a
    /// single bounded text — summaries are merged, never stacked without
    /// limit. When the bound trims, the oldest material goes first.
    pub fn merge(&self, existing: Option<&str>, fresh: &str) -> String {
        let combined = match existing {
            Some(previous) if !previous.is_empty() => format!("{} {}", previous, fresh),
            _ => fresh.to_string(),
        };
        TextUtils::keep_tail(&combined, self.config.max_summary_chars).into_owned()
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "System",
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::schema::Metadata;
    use chrono::Utc;

    fn message(role: Role, content: &str) -> StoredMessage {
        let now = Utc::now();
        StoredMessage {
            id: 1,
            session_id: "s".to_string(),
            role,
            content: content.to_string(),
            tokens: 10,
            timestamp: now,
            metadata: Metadata::new(),
            importance_score: 1.0,
            access_count: 0,
            last_accessed: now,
            embedding: None,
        }
    }

    #[test]
    fn empty_input_yields_empty_string() {
        assert_eq!(Summarizer::default().summarize(&[]), "");
    }

    #[test]
    fn single_message_digest_contains_its_words() {
        let digest =
            Summarizer::default().summarize(&[message(Role::User, "discussing gradient descent")]);
        assert!(!digest.is_empty());
        assert!(digest.contains("gradient"));
    }

    #[test]
    fn digest_groups_by_role() {
        let digest = Summarizer::default().summarize(&[
            message(Role::User, "how does eviction work"),
            message(Role::Assistant, "eviction removes low importance messages"),
        ]);
        assert!(digest.contains("User turns covered:"));
        assert!(digest.contains("Assistant turns covered:"));
    }

    #[test]
    fn summarization_is_deterministic() {
        let batch = vec![
            message(Role::User, "tell me about tokenizers"),
            message(Role::Assistant, "tokenizers split text into units"),
            message(Role::User, "and about embeddings"),
        ];
        let summarizer = Summarizer::default();
        assert_eq!(summarizer.summarize(&batch), summarizer.summarize(&batch));
    }

    #[test]
    fn topics_are_extracted() {
        let digest = Summarizer::default().summarize(&[
            message(Role::User, "kubernetes deployment kubernetes rollout"),
            message(Role::Assistant, "kubernetes handles the rollout"),
        ]);
        assert!(digest.contains("Key topics:"));
        assert!(digest.contains("kubernetes"));
    }

    #[test]
    fn merge_is_bounded_and_keeps_newest() {
        let summarizer = Summarizer::new(SummarizerConfig {
            max_summary_chars: 60,
            ..SummarizerConfig::default()
        });

        let mut summary = String::new();
        for round in 0..20 {
            let fresh = format!("round {} digest with some words", round);
            summary = summarizer.merge(Some(&summary), &fresh);
        }

        assert!(summary.chars().count() <= 64);
        assert!(summary.contains("round 19"));
    }

    #[test]
    fn merge_without_existing_is_the_fresh_digest() {
        let summarizer = Summarizer::default();
        assert_eq!(summarizer.merge(None, "fresh digest"), "fresh digest");
        assert_eq!(summarizer.merge(Some(""), "fresh digest"), "fresh digest");
    }
}
