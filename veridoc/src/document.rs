//! Data types for documents, chunks, retrieved evidence, and citations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the display name of a document's source file.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the 1-based page number.
pub const PAGE_KEY: &str = "page";
/// Metadata key holding the full path of the source file.
pub const SOURCE_PATH_KEY: &str = "source_path";
/// Metadata key holding a chunk's 0-based position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// One loaded page (or other unit) of a source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// The text content of the page.
    pub content: String,
    /// Key-value metadata; at least `source` and `page`.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document for the given source name and page.
    pub fn new(content: impl Into<String>, source: impl Into<String>, page: u32) -> Self {
        let metadata = HashMap::from([
            (SOURCE_KEY.to_string(), source.into()),
            (PAGE_KEY.to_string(), page.to_string()),
        ]);
        Self { content: content.into(), metadata }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `source` metadata value, or an empty string.
    pub fn source(&self) -> &str {
        self.metadata.get(SOURCE_KEY).map(String::as_str).unwrap_or_default()
    }

    /// The `page` metadata value, if present and numeric.
    pub fn page(&self) -> Option<u32> {
        self.metadata.get(PAGE_KEY).and_then(|p| p.parse().ok())
    }

    /// What identifies the source file: `source_path` when present, else `source`.
    ///
    /// Two files may share a display name in different directories, so the
    /// path is preferred wherever distinct files must stay distinct.
    pub fn source_identity(&self) -> &str {
        self.metadata.get(SOURCE_PATH_KEY).map(String::as_str).unwrap_or_else(|| self.source())
    }
}

/// A bounded-size segment of a [`Document`], the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Deterministic identifier derived from the source identity and position.
    pub chunk_id: String,
    /// The text content of the chunk.
    pub content: String,
    /// Parent document metadata plus `chunk_index`.
    pub metadata: HashMap<String, String>,
    /// The vector embedding, attached by the index. Empty until then.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// The `chunk_index` metadata value.
    pub fn chunk_index(&self) -> Option<usize> {
        self.metadata.get(CHUNK_INDEX_KEY).and_then(|i| i.parse().ok())
    }
}

/// A chunk returned by retrieval together with its similarity score.
///
/// Scores are conventionally in `[0, 1]` but are not clamped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedEvidence {
    /// The text content of the retrieved chunk.
    pub content: String,
    /// The chunk's metadata.
    pub metadata: HashMap<String, String>,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

impl RetrievedEvidence {
    /// Create evidence from a stored chunk and its score.
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self { content: chunk.content.clone(), metadata: chunk.metadata.clone(), score }
    }

    /// The `source` metadata value, or an empty string.
    pub fn source(&self) -> &str {
        self.metadata.get(SOURCE_KEY).map(String::as_str).unwrap_or_default()
    }

    /// The `page` metadata value, if present and numeric.
    pub fn page(&self) -> Option<u32> {
        self.metadata.get(PAGE_KEY).and_then(|p| p.parse().ok())
    }

    /// The `source_path` metadata value, if present.
    pub fn source_uri(&self) -> Option<String> {
        self.metadata.get(SOURCE_PATH_KEY).cloned()
    }
}

/// A verbatim excerpt with source attribution offered as evidence for an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The quoted excerpt.
    pub quote: String,
    /// The source document name.
    pub source: String,
    /// The page the excerpt comes from.
    pub page: Option<u32>,
    /// Location of the original file, when known.
    pub source_uri: Option<String>,
    /// Similarity score of the evidence the citation was matched to.
    pub relevance_score: f32,
}
