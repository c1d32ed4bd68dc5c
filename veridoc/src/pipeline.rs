//! Question-answering pipeline orchestrator.
//!
//! [`QaPipeline`] composes a [`VectorIndex`], a [`Generator`] and a
//! [`DocumentLoader`] with the guardrail components. Ingest runs
//! load → chunk → index. A query runs through the stages of [`QueryStage`]:
//!
//! ```text
//! RETRIEVE → PRE_CHECK → GENERATE → POST_CHECK → ENRICH → LOG_SCRUB → DONE
//! ```
//!
//! with an early exit to `DONE` when a refusal fires at `PRE_CHECK` or
//! `POST_CHECK`. Stage state lives in a per-request value, never on the
//! pipeline, so concurrent queries share nothing but the index.
//!
//! # Example
//!
//! ```rust,ignore
//! use veridoc::{QaPipeline, Settings, InMemoryVectorIndex};
//!
//! let pipeline = QaPipeline::builder()
//!     .settings(Settings::from_env()?)
//!     .index(Arc::new(InMemoryVectorIndex::new(embedder)))
//!     .generator(Arc::new(generator))
//!     .build()?;
//!
//! pipeline.ingest_directory("docs/").await?;
//! let response = pipeline.query("¿Cuál es el plazo de apelación?", None).await;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, TextChunker};
use crate::citation::{enrich_citations, fallback_confidence};
use crate::config::Settings;
use crate::document::{Chunk, Citation, Document};
use crate::error::{RagError, Result};
use crate::generation::{Generator, ParseStatus};
use crate::guardrail::{
    GroundingChecker, GroundingDetails, GroundingResult, PiiScrubber, RefusalPolicy,
    RefusalReason, RefusalResult,
};
use crate::index::VectorIndex;
use crate::loader::{DocumentLoader, TextLoader, load_directory};

/// Ungrounded claims reported on a post-generation refusal.
const MAX_REPORTED_CLAIMS: usize = 3;

/// Message returned when an ingest directory holds no loadable documents.
pub const NO_DOCUMENTS_MESSAGE: &str = "No se encontraron documentos";

/// Notes attached to a response produced by an internal failure.
pub const ERROR_NOTES: &str = "Error interno del sistema";

/// The steps of a single query, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    /// Fetch evidence from the index.
    Retrieve,
    /// Refusal policy on evidence and query.
    PreCheck,
    /// Call the generator.
    Generate,
    /// Grounding check and refusal policy with the grounding score.
    PostCheck,
    /// Citation enrichment and fallback confidence.
    Enrich,
    /// Produce the PII-scrubbed log record.
    LogScrub,
    /// Terminal.
    Done,
}

impl QueryStage {
    /// Stable identifier used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            QueryStage::Retrieve => "retrieve",
            QueryStage::PreCheck => "pre_check",
            QueryStage::Generate => "generate",
            QueryStage::PostCheck => "post_check",
            QueryStage::Enrich => "enrich",
            QueryStage::LogScrub => "log_scrub",
            QueryStage::Done => "done",
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the guardrail stages decided for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailReport {
    /// Refused before generation.
    pub pre_refusal: bool,
    /// Refused after the grounding check.
    pub post_refusal: bool,
    /// The refusal rule that fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefusalReason>,
    /// Grounding score of the generated answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_score: Option<f32>,
    /// Per-claim grounding diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_details: Option<GroundingDetails>,
    /// Whether the answer met the grounding minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_grounded: Option<bool>,
    /// The first unsupported claims, on a post-generation refusal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ungrounded_claims: Vec<String>,
}

impl GuardrailReport {
    fn pre_refusal(reason: RefusalReason) -> Self {
        Self { pre_refusal: true, reason: Some(reason), ..Self::default() }
    }

    fn post_refusal(reason: RefusalReason, grounding: GroundingResult) -> Self {
        let mut ungrounded_claims = grounding.ungrounded_claims;
        ungrounded_claims.truncate(MAX_REPORTED_CLAIMS);
        Self {
            post_refusal: true,
            reason: Some(reason),
            grounding_score: Some(grounding.score),
            grounding_details: Some(grounding.details),
            ungrounded_claims,
            ..Self::default()
        }
    }

    fn grounded(grounding: GroundingResult) -> Self {
        Self {
            grounding_score: Some(grounding.score),
            is_grounded: Some(grounding.is_grounded),
            grounding_details: Some(grounding.details),
            ..Self::default()
        }
    }
}

/// The answer to a query, a refusal, or an error; always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Answer text, refusal explanation or error message.
    pub answer: String,
    /// Enriched citations; empty on refusal.
    pub citations: Vec<Citation>,
    /// Confidence in `[0, 1]`; 0.0 on refusal.
    pub confidence: f32,
    /// Whether the answer was withheld.
    pub refusal: bool,
    /// Caveats from the model or refusal diagnostics.
    #[serde(default)]
    pub notes: Option<String>,
    /// The refusal rule that fired, when a guardrail refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefusalReason>,
    /// Number of evidence chunks retrieved.
    pub sources_used: usize,
    /// Generation model name.
    pub model: String,
    /// End-to-end latency.
    pub latency_ms: u64,
    /// Guardrail decisions, when guardrails are enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<GuardrailReport>,
    /// How the model output was parsed, when generation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_status: Option<ParseStatus>,
    /// Raw model output, only when it could not be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_llm_response: Option<String>,
    /// Error message, when an external call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// PII-scrubbed copy of this response, the only form that is logged.
    #[serde(skip)]
    pub log_safe: Option<Value>,
}

/// Outcome of an ingest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Documents were indexed.
    Success,
    /// Nothing was indexed.
    Error,
}

/// Statistics of an ingest request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Whether anything was indexed.
    pub status: IngestStatus,
    /// Ingested file, for single-file ingests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Distinct documents, by source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<usize>,
    /// Pages loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    /// Chunks written to the index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    /// Index size after the ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_indexed: Option<usize>,
    /// Explanation when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngestReport {
    fn error(message: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Error,
            file: None,
            documents: None,
            pages: None,
            chunks: None,
            total_indexed: None,
            message: Some(message.into()),
        }
    }
}

/// Pipeline configuration and index size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Chunks in the index.
    pub total_chunks: usize,
    /// Embedding model backing the index.
    pub embedding_model: String,
    /// Generation model.
    pub llm_model: String,
    /// Configured chunk size.
    pub chunk_size: usize,
    /// Configured retrieval depth.
    pub top_k: usize,
    /// Whether guardrail stages run.
    pub guardrails_enabled: bool,
}

struct Guardrails {
    scrubber: PiiScrubber,
    refusal: RefusalPolicy,
    grounding: GroundingChecker,
}

/// Per-request stage tracking.
struct QueryRun {
    stage: QueryStage,
    started: Instant,
    sources_used: usize,
}

impl QueryRun {
    fn start() -> Self {
        Self { stage: QueryStage::Retrieve, started: Instant::now(), sources_used: 0 }
    }

    fn enter(&mut self, stage: QueryStage) {
        debug!(from = %self.stage, to = %stage, "query stage");
        self.stage = stage;
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// The question-answering pipeline.
///
/// Construct one via [`QaPipeline::builder()`].
pub struct QaPipeline {
    settings: Settings,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    loader: Arc<dyn DocumentLoader>,
    chunker: TextChunker,
    guardrails: Option<Guardrails>,
}

impl QaPipeline {
    /// Create a new [`QaPipelineBuilder`].
    pub fn builder() -> QaPipelineBuilder {
        QaPipelineBuilder::default()
    }

    /// Return a reference to the pipeline settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Return a reference to the vector index.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Ingest every supported file under `directory`.
    ///
    /// A directory without loadable documents yields a report with status
    /// `error` and leaves the index untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if `directory` does not exist,
    /// [`RagError::LoaderError`] if a file cannot be read, and
    /// [`RagError::PipelineError`] if indexing fails.
    pub async fn ingest_directory(&self, directory: impl AsRef<Path>) -> Result<IngestReport> {
        let directory = directory.as_ref();
        info!(directory = %directory.display(), "starting ingest");

        let documents = load_directory(directory, self.loader.as_ref())?;
        if documents.is_empty() {
            warn!(directory = %directory.display(), "no documents found");
            return Ok(IngestReport::error(NO_DOCUMENTS_MESSAGE));
        }

        let distinct: HashSet<&str> = documents.iter().map(Document::source_identity).collect();
        let (pages, chunks, total_indexed) = self.index_documents(&documents).await?;

        info!(
            directory = %directory.display(),
            documents = distinct.len(),
            pages,
            chunks,
            total_indexed,
            "ingest completed"
        );

        Ok(IngestReport {
            status: IngestStatus::Success,
            file: None,
            documents: Some(distinct.len()),
            pages: Some(pages),
            chunks: Some(chunks),
            total_indexed: Some(total_indexed),
            message: None,
        })
    }

    /// Ingest a single file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the file does not exist,
    /// [`RagError::LoaderError`] if it cannot be read, and
    /// [`RagError::PipelineError`] if indexing fails.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
        let path = path.as_ref();
        let documents = self.loader.load(path)?;
        let (pages, chunks, total_indexed) = self.index_documents(&documents).await?;

        info!(file = %path.display(), pages, chunks, "ingested file");

        Ok(IngestReport {
            status: IngestStatus::Success,
            file: Some(path.display().to_string()),
            documents: None,
            pages: Some(pages),
            chunks: Some(chunks),
            total_indexed: Some(total_indexed),
            message: None,
        })
    }

    /// Chunk and index `documents`, returning pages, chunks added and index size.
    async fn index_documents(&self, documents: &[Document]) -> Result<(usize, usize, usize)> {
        let chunks: Vec<Chunk> = documents.iter().flat_map(|d| self.chunker.chunk(d)).collect();
        debug!(pages = documents.len(), chunk_count = chunks.len(), "documents chunked");

        let added = self.index.add_chunks(chunks).await.map_err(|e| {
            let message = e.to_string();
            match self.scrub_for_log(&message) {
                Some(scrubbed) => error!(error = %scrubbed, "indexing failed during ingest"),
                None => error!("indexing failed during ingest"),
            }
            RagError::PipelineError(format!("indexing failed: {message}"))
        })?;
        let total = self.index.count().await?;

        Ok((documents.len(), added, total))
    }

    /// Answer `question` from the indexed corpus.
    ///
    /// `top_k` overrides the configured retrieval depth when given and
    /// non-zero. This never fails: refusals and collaborator errors are
    /// returned as well-formed responses with `refusal = true`, the latter
    /// also carrying `error`.
    pub async fn query(&self, question: &str, top_k: Option<usize>) -> QueryResponse {
        let mut run = QueryRun::start();

        let mut response = match self.run_query(&mut run, question, top_k).await {
            Ok(response) => response,
            Err(e) => self.error_response(&run, &e),
        };

        run.enter(QueryStage::Done);
        response.latency_ms = run.elapsed_ms();
        response
    }

    async fn run_query(
        &self,
        run: &mut QueryRun,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<QueryResponse> {
        if let Some(guardrails) = &self.guardrails {
            let matches = guardrails.scrubber.detect(question);
            if !matches.is_empty() {
                warn!(pii_count = matches.len(), "PII detected in query");
            }
        }

        let top_k = top_k.filter(|&k| k > 0).unwrap_or(self.settings.top_k);
        let evidence = self.index.search(question, top_k).await?;
        run.sources_used = evidence.len();
        info!(top_k, sources_used = evidence.len(), "evidence retrieved");

        if let Some(guardrails) = &self.guardrails {
            run.enter(QueryStage::PreCheck);
            let decision = guardrails.refusal.evaluate(&evidence, Some(question), None);
            if decision.should_refuse {
                warn!(stage = %run.stage, reason = %decision.reason, "query refused");
                let mut response = self.refusal_response(run, guardrails, &decision);
                response.guardrails = Some(GuardrailReport::pre_refusal(decision.reason));
                return Ok(response);
            }
        }

        run.enter(QueryStage::Generate);
        let output = self.generator.generate(question, &evidence, self.settings.max_tokens).await?;
        let parse_status = output.status();
        if parse_status != ParseStatus::Parsed {
            warn!(parse_status = ?parse_status, "model output was not clean JSON");
        }
        let (generated, raw_llm_response) = output.into_parts();

        let mut report = None;
        if let Some(guardrails) = &self.guardrails {
            if !generated.refusal {
                run.enter(QueryStage::PostCheck);
                let grounding = guardrails.grounding.check(&generated.answer, &evidence);
                let decision =
                    guardrails.refusal.evaluate(&evidence, Some(question), Some(grounding.score));
                if decision.should_refuse {
                    warn!(
                        stage = %run.stage,
                        reason = %decision.reason,
                        grounding_score = grounding.score,
                        "answer refused"
                    );
                    let mut response = self.refusal_response(run, guardrails, &decision);
                    response.parse_status = Some(parse_status);
                    response.guardrails =
                        Some(GuardrailReport::post_refusal(decision.reason, grounding));
                    return Ok(response);
                }
                report = Some(GuardrailReport::grounded(grounding));
            }
        }

        run.enter(QueryStage::Enrich);
        let citations = enrich_citations(&generated.citations, &evidence);
        let confidence = generated.confidence.unwrap_or_else(|| fallback_confidence(&evidence));

        let mut response = QueryResponse {
            answer: generated.answer,
            citations,
            confidence,
            refusal: generated.refusal,
            notes: generated.notes,
            reason: None,
            sources_used: evidence.len(),
            model: self.generator.model_name().to_string(),
            latency_ms: run.elapsed_ms(),
            guardrails: report,
            parse_status: Some(parse_status),
            raw_llm_response,
            error: None,
            log_safe: None,
        };

        match &self.guardrails {
            Some(guardrails) => {
                run.enter(QueryStage::LogScrub);
                let record = serde_json::to_value(&response).map_err(|e| {
                    RagError::PipelineError(format!("failed to serialize response: {e}"))
                })?;
                let log_safe = guardrails.scrubber.scrub_for_logs(&record);
                info!(response = %log_safe, "query answered");
                response.log_safe = Some(log_safe);
            }
            None => {
                info!(
                    sources_used = response.sources_used,
                    citations = response.citations.len(),
                    "query answered"
                );
            }
        }

        Ok(response)
    }

    fn refusal_response(
        &self,
        run: &QueryRun,
        guardrails: &Guardrails,
        decision: &RefusalResult,
    ) -> QueryResponse {
        let refusal = guardrails.refusal.format_refusal_response(decision);
        QueryResponse {
            answer: refusal.answer,
            citations: refusal.citations,
            confidence: refusal.confidence,
            refusal: refusal.refusal,
            notes: refusal.notes,
            reason: Some(refusal.reason),
            sources_used: run.sources_used,
            model: self.generator.model_name().to_string(),
            latency_ms: run.elapsed_ms(),
            guardrails: None,
            parse_status: None,
            raw_llm_response: None,
            error: None,
            log_safe: None,
        }
    }

    /// `message` with PII redacted, or `None` when there is no scrubber to trust.
    fn scrub_for_log(&self, message: &str) -> Option<String> {
        self.guardrails.as_ref().map(|guardrails| guardrails.scrubber.scrub(message).0)
    }

    fn error_response(&self, run: &QueryRun, err: &RagError) -> QueryResponse {
        let message = err.to_string();
        match self.scrub_for_log(&message) {
            Some(scrubbed) => error!(stage = %run.stage, error = %scrubbed, "query failed"),
            None => error!(stage = %run.stage, "query failed"),
        }

        QueryResponse {
            answer: format!("Error al generar respuesta: {message}"),
            citations: Vec::new(),
            confidence: 0.0,
            refusal: true,
            notes: Some(ERROR_NOTES.to_string()),
            reason: None,
            sources_used: run.sources_used,
            model: self.generator.model_name().to_string(),
            latency_ms: run.elapsed_ms(),
            guardrails: None,
            parse_status: None,
            raw_llm_response: None,
            error: Some(message),
            log_safe: None,
        }
    }

    /// Index size and configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot report its size.
    pub async fn stats(&self) -> Result<PipelineStats> {
        Ok(PipelineStats {
            total_chunks: self.index.count().await?,
            embedding_model: self.index.embedding_model().to_string(),
            llm_model: self.generator.model_name().to_string(),
            chunk_size: self.settings.chunk_size,
            top_k: self.settings.top_k,
            guardrails_enabled: self.guardrails.is_some(),
        })
    }

    /// Remove every chunk from the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be cleared.
    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await?;
        info!("index cleared");
        Ok(())
    }
}

/// Builder for constructing a [`QaPipeline`].
///
/// `index` and `generator` are required. Settings default to
/// [`Settings::default`] and the loader to [`TextLoader`].
#[derive(Default)]
pub struct QaPipelineBuilder {
    settings: Option<Settings>,
    index: Option<Arc<dyn VectorIndex>>,
    generator: Option<Arc<dyn Generator>>,
    loader: Option<Arc<dyn DocumentLoader>>,
}

impl QaPipelineBuilder {
    /// Set the pipeline settings.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the vector index.
    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the document loader.
    pub fn loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Build the [`QaPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required collaborator is
    /// missing, the chunking parameters are invalid, or a PII pattern name
    /// is unknown.
    pub fn build(self) -> Result<QaPipeline> {
        let settings = self.settings.unwrap_or_default();
        let index =
            self.index.ok_or_else(|| RagError::ConfigError("index is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::ConfigError("generator is required".to_string()))?;
        let loader = self.loader.unwrap_or_else(|| Arc::new(TextLoader::new()));

        let chunker = TextChunker::new(settings.chunk_size, settings.chunk_overlap)?;
        let guardrails = if settings.guardrails_enabled {
            Some(Guardrails {
                scrubber: settings.guardrails.pii_scrubber()?,
                refusal: RefusalPolicy::new(settings.guardrails.refusal_config()),
                grounding: GroundingChecker::new(settings.guardrails.grounding_config()),
            })
        } else {
            None
        };

        Ok(QaPipeline { settings, index, generator, loader, chunker, guardrails })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_have_stable_names() {
        assert_eq!(QueryStage::PreCheck.to_string(), "pre_check");
        assert_eq!(serde_json::to_value(QueryStage::LogScrub).unwrap(), "log_scrub");
    }

    #[test]
    fn post_refusal_report_keeps_first_three_claims() {
        let grounding = GroundingResult {
            score: 0.0,
            is_grounded: false,
            ungrounded_claims: (0..5).map(|i| format!("claim {i}")).collect(),
            details: GroundingDetails::default(),
        };

        let report = GuardrailReport::post_refusal(RefusalReason::LowGrounding, grounding);

        assert!(report.post_refusal);
        assert!(!report.pre_refusal);
        assert_eq!(report.ungrounded_claims, vec!["claim 0", "claim 1", "claim 2"]);
        assert_eq!(report.is_grounded, None);
    }

    #[test]
    fn empty_ingest_report_serializes_status_and_message() {
        let json = serde_json::to_value(IngestReport::error(NO_DOCUMENTS_MESSAGE)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": NO_DOCUMENTS_MESSAGE}));
    }

    #[test]
    fn pre_refusal_report_omits_grounding() {
        let json = serde_json::to_value(GuardrailReport::pre_refusal(RefusalReason::NoContext))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"pre_refusal": true, "post_refusal": false, "reason": "no_context"})
        );
    }
}
