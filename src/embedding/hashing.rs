//! Offline feature-hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed (FNV-1a) into one of `dims`
//! buckets with a hash-derived sign, and the resulting vector is normalised.
//! Texts sharing vocabulary land close together under cosine similarity,
//! which is enough for lexical retrieval without a model download or a
//! network call.

use async_trait::async_trait;

use super::{normalize, EmbeddingProvider};
use crate::error::EmbedError;

pub const DEFAULT_DIMS: usize = 384;
pub const MODEL_NAME: &str = "hashing-fnv1a";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokens(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn deterministic_and_normalized() {
        let p = HashingProvider::default();
        let a = p.embed_one("The capital of France is Paris.");
        let b = p.embed_one("The capital of France is Paris.");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        let p = HashingProvider::default();
        let sim = cosine_similarity(&p.embed_one("Paris, FRANCE!"), &p.embed_one("paris france"));
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let p = HashingProvider::default();
        let q = p.embed_one("What is the capital of France?");
        let related = p.embed_one("The capital of France is Paris.");
        let unrelated = p.embed_one("Bananas grow in tropical climates.");
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let p = HashingProvider::new(8);
        assert_eq!(p.embed_one("  ... "), vec![0.0; 8]);
    }
}
