//! Embedding collaborator interface and the built-in hash embedder.
//!
//! The real deployment embeds topic sentences through an external service
//! that may fail; the engine only requires the [`Embedder`] contract. The
//! FNV-1a [`HashEmbedder`] is deterministic and model-free, which makes it
//! the default for the CLI and for tests.

use std::future::Future;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;

/// Pluggable embedding backend.
///
/// A successful `Ok(None)` means the collaborator could not produce a vector
/// for this text; topic search degrades to zero semantic candidates rather
/// than failing.
pub trait Embedder: Send + Sync + 'static {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Option<Vec<f32>>>> + Send;
    fn dims(&self) -> usize;
}

/// Hash embedder using FNV-1a over unigrams and bigrams, L2-normalized.
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dim: 384 }
    }
}

impl HashEmbedder {
    /// Create an embedder with the given dimension.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Embed text into an L2-normalized vector.
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        if self.dim == 0 {
            return Vec::new();
        }

        let tokens = tokenize(text);
        let mut embedding = vec![0.0; self.dim];

        if tokens.is_empty() {
            return embedding;
        }

        for token in &tokens {
            accumulate_embedding(&mut embedding, token, 1.0);
        }

        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            accumulate_embedding(&mut embedding, &bigram, 0.5);
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Option<Vec<f32>>>> + Send {
        std::future::ready(Ok(Some(self.embed_text(text))))
    }

    fn dims(&self) -> usize {
        self.dim
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|token| token.len() >= 2)
        .map(ToString::to_string)
        .collect()
}

fn accumulate_embedding(embedding: &mut [f32], token: &str, weight: f32) {
    let token_hash = fnv1a_hash(token.as_bytes());

    for i in 0..embedding.len() {
        let dim_hash = fnv1a_hash_with_salt(token_hash, i as u64);
        let sign = if dim_hash & 1 == 0 { weight } else { -weight };
        let dim = ((dim_hash >> 1) as usize) % embedding.len();
        embedding[dim] += sign;
    }
}

fn fnv1a_hash_with_salt(seed: u64, salt: u64) -> u64 {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..].copy_from_slice(&salt.to_le_bytes());
    fnv1a_hash(&bytes)
}

fn fnv1a_hash(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vec.iter_mut() {
            *value /= norm;
        }
    }
}

/// Session-scoped LRU cache for topic-sentence embeddings.
///
/// Embedding calls are asynchronous and may fail; caching the successful
/// ones keeps repeated topic searches from re-embedding the same sentence.
/// All operations use try-lock and silently skip on contention.
pub struct TopicEmbeddingCache {
    cache: Mutex<LruCache<u64, Vec<f32>>>,
}

const DEFAULT_TOPIC_CACHE_SIZE: usize = 64;

impl Default for TopicEmbeddingCache {
    fn default() -> Self {
        Self::with_size(DEFAULT_TOPIC_CACHE_SIZE)
    }
}

impl TopicEmbeddingCache {
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        let size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(size)),
        }
    }

    fn key(sentence: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        sentence.hash(&mut hasher);
        hasher.finish()
    }

    #[must_use]
    pub fn get(&self, sentence: &str) -> Option<Vec<f32>> {
        let mut cache = self.cache.try_lock()?;
        cache.get(&Self::key(sentence)).cloned()
    }

    pub fn put(&self, sentence: &str, embedding: Vec<f32>) {
        if let Some(mut cache) = self.cache.try_lock() {
            cache.put(Self::key(sentence), embedding);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::vector::cosine_similarity;

    #[test]
    fn test_embedding_dimensions() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.embed_text("machine learning basics").len(), 64);
        assert_eq!(embedder.dims(), 64);
    }

    #[test]
    fn test_embedding_normalized() {
        let embedder = HashEmbedder::new(128);
        let embedding = embedder.embed_text("organic chemistry laboratory");
        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_embedding_deterministic() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(
            embedder.embed_text("quantum physics"),
            embedder.embed_text("quantum physics")
        );
    }

    #[test]
    fn test_similarity_prefers_related_text() {
        // Low power-of-two dimensions collapse the hash patterns; use the
        // default production dimensionality where token overlap dominates.
        let embedder = HashEmbedder::new(384);
        let a = embedder.embed_text("intro computer programming python");
        let b = embedder.embed_text("computer programming fundamentals");
        let c = embedder.embed_text("renaissance art history painting");

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_embedder_trait_returns_some() {
        let embedder = HashEmbedder::new(32);
        let result = embedder.embed("linear algebra").await.unwrap();
        assert_eq!(result.unwrap().len(), 32);
    }

    #[test]
    fn test_topic_cache_roundtrip() {
        let cache = TopicEmbeddingCache::default();
        assert!(cache.get("Class covers databases").is_none());
        cache.put("Class covers databases", vec![0.1, 0.2]);
        assert_eq!(cache.get("Class covers databases"), Some(vec![0.1, 0.2]));
        assert!(cache.get("Class covers networks").is_none());
    }

    #[test]
    fn test_topic_cache_eviction() {
        let cache = TopicEmbeddingCache::with_size(1);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(vec![2.0]));
    }
}
