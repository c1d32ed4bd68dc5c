//! Property tests for in-memory vector index search ordering.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use veridoc::document::Chunk;
use veridoc::embedding::EmbeddingProvider;
use veridoc::index::{InMemoryVectorIndex, VectorIndex};
use veridoc::{RagError, Result};

const QUERY: &str = "query";

/// Embedder that returns preassigned vectors by text.
struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.vectors.get(text).cloned().ok_or_else(|| RagError::EmbeddingError {
            provider: "table".to_string(),
            message: format!("no vector for '{text}'"),
        })
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

fn chunk(i: usize) -> Chunk {
    Chunk {
        chunk_id: format!("{i:04}"),
        content: format!("chunk {i}"),
        metadata: HashMap::from([("source".to_string(), format!("doc{i}.txt"))]),
        embedding: Vec::new(),
    }
}

mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let stored = embeddings.len();
            let mut vectors: HashMap<String, Vec<f32>> = embeddings
                .into_iter()
                .enumerate()
                .map(|(i, v)| (chunk(i).content, v))
                .collect();
            vectors.insert(QUERY.to_string(), query);

            let rt = tokio::runtime::Runtime::new().unwrap();
            let results = rt.block_on(async {
                let index = InMemoryVectorIndex::new(Arc::new(TableEmbedder { vectors }));
                index.add_chunks((0..stored).map(chunk).collect()).await.unwrap();
                index.search(QUERY, top_k).await.unwrap()
            });

            prop_assert_eq!(results.len(), top_k.min(stored));

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }
    }
}

#[tokio::test]
async fn re_adding_a_chunk_replaces_it() {
    let vectors = HashMap::from([
        ("chunk 0".to_string(), vec![1.0, 0.0]),
        (QUERY.to_string(), vec![1.0, 0.0]),
    ]);
    let index = InMemoryVectorIndex::new(Arc::new(TableEmbedder { vectors }));

    index.add_chunks(vec![chunk(0)]).await.unwrap();
    index.add_chunks(vec![chunk(0)]).await.unwrap();

    assert_eq!(index.count().await.unwrap(), 1);
    let results = index.search(QUERY, 5).await.unwrap();
    assert_eq!(results[0].source(), "doc0.txt");
    assert!((results[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn embedding_failure_leaves_index_unchanged() {
    let index = InMemoryVectorIndex::new(Arc::new(TableEmbedder { vectors: HashMap::new() }));

    let err = index.add_chunks(vec![chunk(0)]).await.unwrap_err();

    assert!(matches!(err, RagError::EmbeddingError { .. }));
    assert_eq!(index.count().await.unwrap(), 0);
}
