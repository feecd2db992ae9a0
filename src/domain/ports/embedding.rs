//! Embedding provider port for semantic vector generation.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Converts text into dense vectors for similarity search.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g., "openai", "null").
    fn name(&self) -> &'static str;

    /// Embedding dimension for this provider/model. Zero means the
    /// provider produces no embeddings.
    fn dimension(&self) -> usize;

    fn is_enabled(&self) -> bool {
        self.dimension() > 0
    }

    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>>;

    /// Generate embeddings for several texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> DomainResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
