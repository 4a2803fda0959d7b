//! Deterministic in-process embedding provider.
//!
//! Produces 256-dimensional L2-normalised vectors with signed feature
//! hashing over word tokens: each token's SHA-256 digest selects a dimension
//! and a sign, and repeated tokens accumulate. No model files, no network,
//! and identical input always yields an identical vector, which makes this
//! the privacy-preserving default for library callers.
//!
//! Token unigrams and adjacent-pair bigrams both contribute, so texts that
//! share phrasing land closer together than texts that merely share
//! vocabulary.

use sha2::{Digest, Sha256};

use super::{EmbedResult, EmbeddingProvider, Unavailable};

/// Vector dimension for the hashed feature space.
pub const LOCAL_DIM: usize = 256;

/// Feature-hashing embedder over lowercased alphanumeric tokens.
#[derive(Debug, Default)]
pub struct LocalEmbedding;

impl LocalEmbedding {
    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    fn accumulate(vector: &mut [f64], feature: &str, weight: f64) {
        let digest = Sha256::digest(feature.as_bytes());
        let index = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % LOCAL_DIM;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

impl EmbeddingProvider for LocalEmbedding {
    fn name(&self) -> &str {
        "local"
    }

    fn embed(&self, text: &str) -> EmbedResult {
        let tokens = Self::tokens(text);
        if tokens.is_empty() {
            return Err(Unavailable);
        }

        let mut vector = vec![0.0f64; LOCAL_DIM];
        for token in &tokens {
            Self::accumulate(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            Self::accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Err(Unavailable);
        }
        Ok(vector.into_iter().map(|v| (v / norm) as f32).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(LOCAL_DIM)
    }
}
