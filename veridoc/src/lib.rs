//! # veridoc
//!
//! Question answering over a private document corpus, with citations and
//! guardrails.
//!
//! ## Overview
//!
//! Documents are split into overlapping chunks with stable ids, embedded and
//! indexed. A query retrieves evidence and asks a generative model to answer
//! strictly from it. Around the model call sit the guardrails:
//!
//! - [`PiiScrubber`] redacts DNI, RUC, email and phone numbers from queries
//!   and from everything that reaches the logs
//! - [`RefusalPolicy`] refuses before generation (no evidence, low relevance,
//!   off-topic query) and after it (low grounding)
//! - [`GroundingChecker`] scores how well each claim of an answer is
//!   supported by the evidence
//!
//! [`QaPipeline`] ties these together. Collaborators sit behind traits:
//! [`VectorIndex`] (with [`InMemoryVectorIndex`]), [`EmbeddingProvider`],
//! [`Generator`] and [`DocumentLoader`] (with [`TextLoader`]). Gemini
//! implementations of the model traits live in [`gemini`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use veridoc::gemini::{GeminiEmbeddingProvider, GeminiGenerator};
//! use veridoc::{InMemoryVectorIndex, QaPipeline, Settings};
//!
//! let settings = Settings::from_env()?;
//! let api_key = settings.api_key.clone().unwrap_or_default();
//! let embedder = GeminiEmbeddingProvider::new(&api_key, &settings.embedding_model)?;
//! let generator = GeminiGenerator::new(&api_key, &settings.llm_model)?;
//!
//! let pipeline = QaPipeline::builder()
//!     .settings(settings)
//!     .index(Arc::new(InMemoryVectorIndex::new(Arc::new(embedder))))
//!     .generator(Arc::new(generator))
//!     .build()?;
//!
//! pipeline.ingest_directory("normativa/").await?;
//! let response = pipeline.query("¿Cuál es el plazo para apelar?", None).await;
//! println!("{}", response.answer);
//! ```

pub mod chunking;
pub mod citation;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod guardrail;
pub mod index;
pub mod loader;
pub mod pipeline;

pub use chunking::{Chunker, TextChunker, chunk_documents};
pub use citation::{enrich_citations, fallback_confidence};
pub use config::{GuardrailSettings, Settings, SettingsBuilder};
pub use document::{Chunk, Citation, Document, RetrievedEvidence};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use generation::{
    DeclaredCitation, GeneratedAnswer, Generator, ParseStatus, ParsedOutput, parse_model_output,
};
pub use guardrail::{
    GroundingChecker, GroundingResult, PiiKind, PiiMatch, PiiScrubber, RefusalPolicy,
    RefusalReason, RefusalResult,
};
pub use index::{InMemoryVectorIndex, VectorIndex};
pub use loader::{DocumentLoader, TextLoader};
pub use pipeline::{
    GuardrailReport, IngestReport, IngestStatus, PipelineStats, QaPipeline, QaPipelineBuilder,
    QueryResponse, QueryStage,
};
