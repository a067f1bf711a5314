//! Embedding and summarization seams
//!
//! The cache never embeds text itself; it asks an [`Embedder`]. Failures are
//! recoverable: the cache engine falls back to exact-only matching and the
//! compaction engine falls back to statistical scoring.

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Text embedding provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Summarization provider (typically an LLM call)
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Condense `texts` into a single summary text
    async fn summarize(&self, texts: &[String]) -> Result<String>;
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase word is hashed into one of `dimension` buckets and the
/// resulting vector is L2-normalized. Identical texts produce identical
/// vectors and texts sharing vocabulary score high, which is enough for
/// offline use, tests and demos.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Option<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return None;
        }
        for v in vector.iter_mut() {
            *v /= norm;
        }
        Some(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text).ok_or_else(|| {
            CacheError::EmbeddingUnavailable("text has no embeddable words".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hashing_embedder_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("what is rust").await.unwrap();
        let b = embedder.embed("What is Rust").await.unwrap();

        assert_eq!(a.len(), 64);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hashing_embedder_similarity_ordering() {
        let embedder = HashingEmbedder::default();
        let base = embedder.embed("how do I bake sourdough bread").await.unwrap();
        let close = embedder
            .embed("how do I bake sourdough bread quickly")
            .await
            .unwrap();
        let far = embedder.embed("kubernetes pod eviction").await.unwrap();

        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[tokio::test]
    async fn test_empty_text_is_unavailable() {
        let embedder = HashingEmbedder::default();
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, CacheError::EmbeddingUnavailable(_)));
        assert!(embedder.embed("?!").await.is_err());
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(batch[1], embedder.embed("beta").await.unwrap());
    }
}
