//! Error types for the `veridoc` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while ingesting documents or answering questions.
///
/// Refusals and malformed model output are not errors: the former is a normal
/// outcome of [`QaPipeline::query`](crate::QaPipeline::query), the latter is
/// absorbed by [`ParsedOutput`](crate::generation::ParsedOutput).
#[derive(Debug, Error)]
pub enum RagError {
    /// A configuration validation error. Raised at construction time.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector index backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The answer generation call failed.
    #[error("Generation error ({provider}): {message}")]
    GenerationError {
        /// The generation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An ingest path does not exist.
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A file exists but could not be loaded as a document.
    #[error("Failed to load '{}': {message}", path.display())]
    LoaderError {
        /// The file that failed to load.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An error in the pipeline orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RagError {
    /// Whether this error means a requested path does not exist.
    ///
    /// Callers use this to tell "not found" apart from internal failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RagError::NotFound(_))
    }
}

/// A convenience result type for `veridoc` operations.
pub type Result<T> = std::result::Result<T, RagError>;
