//! Frequency-based topic extraction

use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref STOP_WORDS: Vec<&'static str> = vec![
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "is", "am", "are", "was", "were", "be", "been",
        "being", "have", "has", "had", "do", "does", "did", "will", "would",
        "shall", "should", "may", "might", "must", "can", "could", "i", "you",
        "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
        "my", "your", "his", "its", "our", "their", "mine", "yours", "hers",
        "ours", "theirs", "this", "that", "these", "those", "what", "how",
        "why", "when", "where", "who", "which", "about", "please",
    ];
}

/// Check if a word is a stop word.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word.to_lowercase().as_str())
}

/// Extracts the most salient topics from conversation text.
///
/// Salience is plain term frequency over stopword-filtered words; ties break
/// alphabetically so the same input always yields the same topics.
pub struct TopicExtractor {
    max_topics: usize,
    min_word_length: usize,
}

impl Default for TopicExtractor {
    fn default() -> Self {
        Self {
            max_topics: 3,
            min_word_length: 4,
        }
    }
}

impl TopicExtractor {
    pub fn new(max_topics: usize, min_word_length: usize) -> Self {
        Self {
            max_topics,
            min_word_length,
        }
    }

    /// Extract topics from a single text.
    pub fn extract_from_text(&self, text: &str) -> Vec<String> {
        self.extract_from_texts(std::iter::once(text))
    }

    /// Extract topics across several texts, ranked by combined frequency.
    pub fn extract_from_texts<'a, I>(&self, texts: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut frequencies: HashMap<String, usize> = HashMap::new();

        for text in texts {
            for raw in text.split_whitespace() {
                let word: String = raw
                    .to_lowercase()
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_string();
                if word.len() < self.min_word_length || is_stop_word(&word) {
                    continue;
                }
                *frequencies.entry(word).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_topics);

        ranked.into_iter().map(|(word, _)| word).collect()
    }
}
