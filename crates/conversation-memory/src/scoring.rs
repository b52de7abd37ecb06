//! Importance scoring for eviction ordering and retrieval ranking.

use crate::memory_db::schema::Role;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref CONTENT_PATTERNS: HashMap<&'static str, Regex> = {
        let mut m = HashMap::new();

        m.insert(
            "critical",
            Regex::new(r"important|critical|crucial|essential|must|need|require|urgent|asap|priority|remember|key|main|primary").unwrap(),
        );

        m.insert(
            "code_related",
            Regex::new(r"def |function |class |import |return |code|program|algorithm|python|rust|javascript|java|sql|```").unwrap(),
        );

        m.insert(
            "question",
            Regex::new(r"what|how|why|when|where|who|explain|describe|can you|could you|would you|should").unwrap(),
        );

        m.insert(
            "numeric",
            Regex::new(r"\d+|date|time|year|month|day|hour|minute|second").unwrap(),
        );

        m
    };
}

/// Weights and bounds of the importance function.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub system_weight: f32,
    pub user_weight: f32,
    pub assistant_weight: f32,
    /// Content length (chars) at which the length factor saturates.
    pub length_reference: usize,
    pub length_boost: f32,
    pub pattern_boost: f32,
    pub keyword_boost: f32,
    /// Extra caller-configured keywords signaling urgency (lowercased).
    pub extra_keywords: Vec<String>,
    pub min_score: f32,
    pub max_score: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            system_weight: 1.30,
            user_weight: 1.15,
            assistant_weight: 1.0,
            length_reference: 400,
            length_boost: 0.15,
            pattern_boost: 0.25,
            keyword_boost: 0.20,
            extra_keywords: Vec::new(),
            min_score: 1.0,
            max_score: 2.0,
        }
    }
}

/// Pure importance function: `score(role, content)` clamped to
/// `[min_score, max_score]`. Total — every role/content pair produces a
/// score, no failure mode. Scores are computed once at message creation and
/// never re-evaluated as messages age.
pub struct ImportanceScorer {
    config: ScoringConfig,
}

impl ImportanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn with_extra_keywords(keywords: Vec<String>) -> Self {
        Self::new(ScoringConfig {
            extra_keywords: keywords,
            ..ScoringConfig::default()
        })
    }

    pub fn score(&self, role: &Role, content: &str) -> f32 {
        let mut score = 1.0 * self.role_weight(role);

        score *= self.length_factor(content);
        score *= 1.0 + self.pattern_score(content) * self.config.pattern_boost;
        if self.mentions_extra_keyword(content) {
            score *= 1.0 + self.config.keyword_boost;
        }

        score.clamp(self.config.min_score, self.config.max_score)
    }

    fn role_weight(&self, role: &Role) -> f32 {
        match role {
            Role::System => self.config.system_weight,
            Role::User => self.config.user_weight,
            Role::Assistant => self.config.assistant_weight,
        }
    }

    fn length_factor(&self, content: &str) -> f32 {
        let reference = self.config.length_reference.max(1);
        let saturated = content.len().min(reference) as f32 / reference as f32;
        1.0 + saturated * self.config.length_boost
    }

    fn pattern_score(&self, content: &str) -> f32 {
        let lowered = content.to_lowercase();
        let mut total: f32 = 0.0;

        for (name, regex) in CONTENT_PATTERNS.iter() {
            if regex.is_match(&lowered) {
                let weight = match *name {
                    "critical" => 0.9,
                    "code_related" => 0.7,
                    "question" => 0.6,
                    "numeric" => 0.5,
                    _ => 0.3,
                };
                total += weight;
            }
        }

        total.min(1.0)
    }

    fn mentions_extra_keyword(&self, content: &str) -> bool {
        if self.config.extra_keywords.is_empty() {
            return false;
        }
        let lowered = content.to_lowercase();
        self.config
            .extra_keywords
            .iter()
            .any(|keyword| lowered.contains(keyword))
    }
}
