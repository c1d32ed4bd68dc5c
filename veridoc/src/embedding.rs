//! Embedding provider trait used by the vector index.

use async_trait::async_trait;

use crate::error::Result;

/// Turns text into vectors for similarity search.
///
/// Chunks are embedded with [`embed_documents`](EmbeddingProvider::embed_documents)
/// at ingest time and questions with [`embed_query`](EmbeddingProvider::embed_query),
/// since some backends optimise the two sides differently. The default
/// `embed_documents` embeds one text at a time; backends with a native batch
/// endpoint should override it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a search question.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of chunk texts, preserving order.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_query(text).await?);
        }
        Ok(results)
    }

    /// Name of the embedding model, reported in pipeline stats.
    fn model_name(&self) -> &str;
}
