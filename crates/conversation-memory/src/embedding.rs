//! Hashed lexical embeddings and cosine similarity.
//!
//! The engine maps text into a fixed-dimension sparse lexical vector with
//! feature hashing: no fitted vocabulary, no corpus statistics, and therefore
//! no refit/invalidation path. `embed` is pure — the same text always yields
//! a bit-identical vector — which is what lets message embeddings be cached
//! once and kept for the message's lifetime (content is immutable).

use crate::utils::topic_extractor::is_stop_word;

/// Deterministic text-to-vector engine.
///
/// Construct once and inject wherever similarity is needed; the engine is
/// stateless and cheap to share.
pub struct EmbeddingEngine {
    dim: usize,
}

impl EmbeddingEngine {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed a text into a term-frequency weighted, L2-normalized vector.
    ///
    /// Each token is hashed with blake3 into one of `dim` buckets; a second
    /// hash bit supplies the sign so colliding tokens partially cancel rather
    /// than always reinforcing. Text with no usable tokens yields the zero
    /// vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for token in Self::tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u64::from_le_bytes(
                bytes[0..8].try_into().unwrap_or([0; 8]),
            ) as usize
                % self.dim;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value /= norm;
            }
        }

        vector
    }

    /// Cosine similarity mapped into [0, 1].
    ///
    /// Identical non-zero vectors compare as exactly 1.0; opposed or
    /// unrelated vectors floor at 0.0.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        if a == b {
            let norm: f32 = a.iter().map(|x| x * x).sum();
            return if norm > 0.0 { 1.0 } else { 0.0 };
        }
        cosine_similarity(a, b).clamp(0.0, 1.0)
    }

    fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
            .map(|t| t.to_lowercase())
            .filter(|t| !is_stop_word(t))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
