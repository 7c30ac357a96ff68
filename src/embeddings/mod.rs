//! Embedding provider capability interface.
//!
//! Downstream code (indexer, retrieval stage) depends only on
//! [`EmbeddingProvider`]; concrete backends are selected through
//! configuration. The contract: `embed_many` returns exactly one vector per
//! input, in input order, and `dimension` is queryable before any call so
//! the chunk store can validate index compatibility up front.

pub mod openai;

use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::RagError;

pub use openai::OpenAiEmbeddingProvider;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed output vector length for this provider.
    fn dimension(&self) -> usize;

    /// Embed a single text. Empty input is a permanent validation error.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch of texts. Output order matches input order and
    /// `output.len() == input.len()`.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// Deterministic in-process provider for tests and offline runs.
///
/// Vectors are derived from a hash of the text, so identical text always
/// maps to an identical vector and distinct texts almost surely differ.
pub struct MockEmbeddingProvider {
    dimension: usize,
    calls: Mutex<usize>,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Mutex::new(0),
        }
    }

    /// Number of `embed_one`/`embed_many` invocations so far.
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }

    fn vector_for(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::embedding_permanent(
                "cannot embed empty text".to_string(),
            ));
        }
        let mut vector = Vec::with_capacity(self.dimension);
        for lane in 0..self.dimension {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            lane.hash(&mut hasher);
            let raw = hasher.finish();
            // Map the hash onto [-1.0, 1.0].
            vector.push((raw as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32);
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        *self.calls.lock() += 1;
        self.vector_for(text)
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        *self.calls.lock() += 1;
        texts.iter().map(|text| self.vector_for(text)).collect()
    }
}

/// Provider whose every call fails terminally. Exercises the degraded
/// no-context path of the retrieval stage and the indexer's skip reporting.
pub struct FailingEmbeddingProvider {
    dimension: usize,
}

impl FailingEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, RagError> {
        Err(RagError::embedding_permanent("embedding backend unavailable"))
    }

    async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::embedding_permanent("embedding backend unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new(8);
        let a1 = provider.embed_one("interest rate risk").await.unwrap();
        let a2 = provider.embed_one("interest rate risk").await.unwrap();
        let b = provider.embed_one("credit risk").await.unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.len(), 8);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn mock_batch_preserves_order_and_length() {
        let provider = MockEmbeddingProvider::new(4);
        let texts = vec![
            "first".to_string(),
            "second".to_string(),
            "first".to_string(),
        ];
        let vectors = provider.embed_many(&texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());
        assert_eq!(vectors[0], vectors[2]);
        assert_eq!(
            vectors[0],
            provider.embed_one("first").await.unwrap(),
            "batch and single embedding must agree"
        );
    }

    #[tokio::test]
    async fn empty_text_is_a_permanent_error() {
        let provider = MockEmbeddingProvider::new(4);
        let err = provider.embed_one("   ").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn failing_provider_always_fails() {
        let provider = FailingEmbeddingProvider::new(4);
        assert!(provider.embed_one("anything").await.is_err());
        assert!(
            provider
                .embed_many(&["anything".to_string()])
                .await
                .is_err()
        );
    }
}
