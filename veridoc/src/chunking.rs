//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`TextChunker`], which
//! splits a page into overlapping fixed-size windows with stable identifiers.

use sha2::{Digest, Sha256};

use crate::document::{CHUNK_INDEX_KEY, Chunk, Document, PAGE_KEY};
use crate::error::{RagError, Result};

/// How far back (in characters) a window end may move to land on whitespace.
const WORD_SNAP_LOOKBACK: usize = 32;

/// Number of hex characters kept from the chunk identity hash.
const CHUNK_ID_LEN: usize = 16;

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the index.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document's trimmed content is empty.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into fixed-size character windows with a fixed overlap.
///
/// The content is trimmed first. Each window spans at most `chunk_size`
/// characters; when a window would end mid-word, its end moves back to the
/// nearest whitespace within a short lookback. A larger overlap never yields
/// fewer chunks. The next window starts exactly
/// `chunk_overlap` characters before the previous end, so consecutive chunks
/// share exactly `chunk_overlap` characters.
///
/// Chunk IDs are derived from the document's source identity (its
/// `source_path`, or `source` when no path is known), `page` and the chunk
/// index, so re-chunking identical input yields identical IDs. Each chunk
/// inherits the parent document's metadata plus a `chunk_index` field.
///
/// # Example
///
/// ```rust,ignore
/// use veridoc::TextChunker;
///
/// let chunker = TextChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// Create a new `TextChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per chunk
    /// * `chunk_overlap` - number of characters shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Maximum number of characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Chunker for TextChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.content.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let source = document.source_identity();
        let page = document.metadata.get(PAGE_KEY).map(String::as_str).unwrap_or_default();

        split_windows(text, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .filter(|window| !window.trim().is_empty())
            .enumerate()
            .map(|(chunk_index, window)| {
                let mut metadata = document.metadata.clone();
                metadata.insert(CHUNK_INDEX_KEY.to_string(), chunk_index.to_string());
                Chunk {
                    chunk_id: chunk_id(source, page, chunk_index),
                    content: window.to_string(),
                    metadata,
                    embedding: Vec::new(),
                }
            })
            .collect()
    }
}

/// Chunk every document with a freshly validated [`TextChunker`].
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if the size/overlap pair is invalid.
pub fn chunk_documents(
    documents: &[Document],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>> {
    let chunker = TextChunker::new(chunk_size, chunk_overlap)?;
    Ok(documents.iter().flat_map(|document| chunker.chunk(document)).collect())
}

/// Deterministic chunk identifier: a truncated SHA-256 of source identity, page and index.
fn chunk_id(source: &str, page: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{source}#{page}#{chunk_index}").as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    hash.chars().take(CHUNK_ID_LEN).collect()
}

/// Slide a `chunk_size` window over `text` in character units.
///
/// Requires `chunk_overlap < chunk_size`.
fn split_windows(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<&str> {
    let chars: Vec<char> = text.chars().collect();
    let offsets: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let total = chars.len();

    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let mut end = (start + chunk_size).min(total);
        if end < total {
            if let Some(snapped) = snap_to_word_boundary(&chars, start + chunk_overlap, end) {
                end = snapped;
            }
        }

        windows.push(&text[offsets[start]..offsets[end]]);

        if end >= total {
            break;
        }
        start = end - chunk_overlap;
    }

    windows
}

/// Move `end` back onto the nearest whitespace at or before it.
///
/// Returns `None` when no whitespace lies within [`WORD_SNAP_LOOKBACK`]. The
/// result always exceeds `floor`: a boundary at or below it ends the window
/// at `floor + 1` instead, so the next window starts after the current one.
fn snap_to_word_boundary(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    let lower = end.saturating_sub(WORD_SNAP_LOOKBACK);
    let boundary = (lower..=end).rev().find(|&i| chars[i].is_whitespace())?;
    Some(boundary.max(floor + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str) -> Document {
        Document::new(content, "test.pdf", 1)
    }

    #[test]
    fn test_basic_chunking() {
        let chunker = TextChunker::new(100, 20).unwrap();
        let chunks = chunker.chunk(&doc(&"Este es un texto de prueba. ".repeat(10)));

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 100));
    }

    #[test]
    fn test_preserves_metadata() {
        let chunker = TextChunker::new(50, 10).unwrap();
        let document = Document::new(
            "Texto de prueba suficientemente largo para dividir en chunks.",
            "documento.pdf",
            5,
        )
        .with_metadata("custom", "value");

        let chunks = chunker.chunk(&document);

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(chunk.metadata["source"], "documento.pdf");
            assert_eq!(chunk.metadata["page"], "5");
            assert_eq!(chunk.metadata["custom"], "value");
            assert!(chunk.metadata.contains_key("chunk_index"));
        }
    }

    #[test]
    fn test_chunk_ids_are_unique_and_indices_contiguous() {
        let chunker = TextChunker::new(50, 10).unwrap();
        let chunks = chunker.chunk(&doc(&"Texto ".repeat(50)));

        let mut ids: Vec<_> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), chunks.len());

        let indices: Vec<_> = chunks.iter().map(|c| c.chunk_index().unwrap()).collect();
        assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_chunk_ids_are_stable_across_runs() {
        let chunker = TextChunker::new(40, 8).unwrap();
        let document = doc(&"palabra ".repeat(30));

        let first: Vec<_> = chunker.chunk(&document).into_iter().map(|c| c.chunk_id).collect();
        let second: Vec<_> = chunker.chunk(&document).into_iter().map(|c| c.chunk_id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_pages_of_same_source_get_distinct_ids() {
        let chunker = TextChunker::new(100, 10).unwrap();
        let page_one = chunker.chunk(&Document::new("Primera página.", "ley.pdf", 1));
        let page_two = chunker.chunk(&Document::new("Segunda página.", "ley.pdf", 2));
        assert_ne!(page_one[0].chunk_id, page_two[0].chunk_id);
    }

    #[test]
    fn test_same_name_in_different_directories_gets_distinct_ids() {
        let chunker = TextChunker::new(100, 10).unwrap();
        let older = Document::new("Plazo de apelación.", "ley.txt", 1)
            .with_metadata("source_path", "normativa/2023/ley.txt");
        let newer = Document::new("Plazo de apelación.", "ley.txt", 1)
            .with_metadata("source_path", "normativa/2024/ley.txt");

        assert_ne!(chunker.chunk(&older)[0].chunk_id, chunker.chunk(&newer)[0].chunk_id);
    }

    #[test]
    fn test_overlap_is_exact_without_whitespace() {
        let chunker = TextChunker::new(20, 5).unwrap();
        let chunks = chunker.chunk(&doc(&"ABCDEFGHIJ".repeat(10)));

        assert_eq!(chunks.len(), 7);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].content.chars().collect();
            let next: Vec<char> = pair[1].content.chars().collect();
            assert_eq!(prev[prev.len() - 5..], next[..5]);
        }
    }

    #[test]
    fn test_windows_do_not_split_words() {
        let chunker = TextChunker::new(30, 5).unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        let chunks = chunker.chunk(&doc(text));

        let words: Vec<&str> = text.split(' ').collect();
        for chunk in &chunks[..chunks.len() - 1] {
            let last = chunk.content.split(' ').last().unwrap();
            assert!(words.contains(&last), "chunk ends mid-word: {:?}", chunk.content);
        }
    }

    #[test]
    fn test_higher_overlap_does_not_lose_a_chunk_to_snapping() {
        let text = " aa  b aabb b bab  ab ab a aaaaaababb b ab ";
        let lower = TextChunker::new(33, 23).unwrap().chunk(&doc(text));
        let higher = TextChunker::new(33, 25).unwrap().chunk(&doc(text));

        assert!(lower.len() <= higher.len(), "{} > {}", lower.len(), higher.len());
    }

    #[test]
    fn test_multibyte_text_is_split_on_char_boundaries() {
        let chunker = TextChunker::new(10, 3).unwrap();
        let chunks = chunker.chunk(&doc(&"ñandú áéíóú ".repeat(6)));

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 10));
    }

    #[test]
    fn test_empty_document() {
        let chunker = TextChunker::new(100, 10).unwrap();
        assert!(chunker.chunk(&doc("   ")).is_empty());
    }

    #[test]
    fn test_small_document() {
        let chunker = TextChunker::new(1000, 100).unwrap();
        let chunks = chunker.chunk(&doc("  Texto corto.\n"));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Texto corto.");
    }

    #[test]
    fn test_invalid_overlap_is_rejected() {
        assert!(matches!(TextChunker::new(100, 100), Err(RagError::ConfigError(_))));
        assert!(matches!(TextChunker::new(100, 150), Err(RagError::ConfigError(_))));
        assert!(matches!(TextChunker::new(0, 0), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn test_chunk_documents_multiple_sources() {
        let docs = vec![
            Document::new("Documento uno ".repeat(20), "doc1.pdf", 1),
            Document::new("Documento dos ".repeat(20), "doc2.pdf", 1),
        ];

        let chunks = chunk_documents(&docs, 100, 20).unwrap();

        assert!(chunks.iter().any(|c| c.metadata["source"] == "doc1.pdf"));
        assert!(chunks.iter().any(|c| c.metadata["source"] == "doc2.pdf"));
    }

    #[test]
    fn test_chunk_documents_empty_list() {
        assert!(chunk_documents(&[], 100, 20).unwrap().is_empty());
    }
}
