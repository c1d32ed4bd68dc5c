//! Vector index: the indexing and retrieval collaborator of the pipeline.
//!
//! [`VectorIndex`] is the seam the pipeline talks to. [`InMemoryVectorIndex`]
//! embeds chunks with an [`EmbeddingProvider`] and keeps them in a `HashMap`
//! behind a `tokio::sync::RwLock`, which suits development, tests and small
//! corpora.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Chunk, RetrievedEvidence};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Storage and similarity search over chunks.
///
/// The index is append-only during ingest and read-only during queries.
/// Each chunk is either fully present or absent; no atomicity is promised
/// across a batch.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed and store chunks, replacing any with the same `chunk_id`.
    ///
    /// Returns the number of chunks written.
    async fn add_chunks(&self, chunks: Vec<Chunk>) -> Result<usize>;

    /// Return the `top_k` chunks most similar to `query`, by descending score.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedEvidence>>;

    /// Number of stored chunks.
    async fn count(&self) -> Result<usize>;

    /// Remove every stored chunk.
    async fn clear(&self) -> Result<()>;

    /// Name of the embedding model backing the index.
    fn embedding_model(&self) -> &str;
}

/// An in-memory [`VectorIndex`] using cosine similarity.
///
/// # Example
///
/// ```rust,ignore
/// use veridoc::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new(Arc::new(embedder));
/// index.add_chunks(chunks).await?;
/// let evidence = index.search("¿Cuál es el plazo?", 5).await?;
/// ```
pub struct InMemoryVectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index that embeds with `embedder`.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, chunks: RwLock::new(HashMap::new()) }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add_chunks(&self, mut chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::VectorStoreError {
                backend: "InMemory".to_string(),
                message: format!(
                    "embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    chunks.len()
                ),
            });
        }

        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }

        let added = chunks.len();
        let mut store = self.chunks.write().await;
        for chunk in chunks {
            store.insert(chunk.chunk_id.clone(), chunk);
        }
        debug!(added, total = store.len(), "chunks stored");
        Ok(added)
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedEvidence>> {
        let query_embedding = self.embedder.embed_query(query).await?;

        let store = self.chunks.read().await;
        let mut scored: Vec<(&Chunk, f32)> = store
            .values()
            .map(|chunk| (chunk, cosine_similarity(&chunk.embedding, &query_embedding)))
            .collect();

        scored.sort_by(|(a, score_a), (b, score_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(chunk, score)| RetrievedEvidence::from_chunk(chunk, score))
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().await.len())
    }

    async fn clear(&self) -> Result<()> {
        self.chunks.write().await.clear();
        Ok(())
    }

    fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_and_mismatched_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
