//! Gemini embedding and generation over the Generative Language REST API.
//!
//! Both clients call the API directly with `reqwest`, authenticating with the
//! `x-goog-api-key` header.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::RetrievedEvidence;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{Generator, ParsedOutput, build_prompt, parse_model_output};

/// The default Generative Language API base URL.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sampling temperature for answers; kept low for consistent JSON.
const GENERATION_TEMPERATURE: f32 = 0.2;

/// Most requests `batchEmbedContents` accepts in one call.
const MAX_EMBED_BATCH: usize = 100;

const PROVIDER: &str = "Gemini";

fn api_key_or_error(api_key: String) -> Result<String> {
    if api_key.trim().is_empty() {
        return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
    }
    Ok(api_key)
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Turn a non-success HTTP response into a readable message.
///
/// The API may echo request content back in its error body, so callers log
/// only the status and leave the message to the returned error.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail =
        serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
    format!("API returned {status}: {detail}")
}

// ── Embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the Gemini `batchEmbedContents` endpoint.
///
/// Chunks are embedded with task type `RETRIEVAL_DOCUMENT` and questions with
/// `RETRIEVAL_QUERY`.
///
/// # Example
///
/// ```rust,ignore
/// use veridoc::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::new(api_key, "text-embedding-004")?;
/// let vector = provider.embed_query("¿Cuál es el plazo?").await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `model` (e.g. `text-embedding-004`).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key_or_error(api_key.into())?,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn embed_with_task(&self, texts: &[&str], task_type: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model_path = format!("models/{}", self.model);
        let url = format!("{}/{model_path}:batchEmbedContents", self.base_url);
        let batches = batch_requests(&model_path, texts, task_type);

        debug!(
            provider = PROVIDER,
            texts = texts.len(),
            batches = batches.len(),
            model = %self.model,
            task_type,
            "embedding texts"
        );

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in batches {
            let expected = batch.requests.len();
            let values = self.send_batch(&url, &batch).await?;
            if values.len() != expected {
                error!(
                    provider = PROVIDER,
                    expected,
                    returned = values.len(),
                    "embedding count mismatch"
                );
                return Err(RagError::EmbeddingError {
                    provider: PROVIDER.into(),
                    message: format!("expected {expected} embeddings, got {}", values.len()),
                });
            }
            embeddings.extend(values);
        }

        Ok(embeddings)
    }

    async fn send_batch(&self, url: &str, batch: &BatchEmbedRequest<'_>) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(batch)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, status = ?e.status(), "embedding request failed");
                RagError::EmbeddingError {
                    provider: PROVIDER.into(),
                    message: format!("request failed: {e}"),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(provider = PROVIDER, %status, "embedding API error");
            let message = error_detail(response).await;
            return Err(RagError::EmbeddingError { provider: PROVIDER.into(), message });
        }

        let parsed: BatchEmbedResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, %status, "failed to parse embedding response");
            RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!("failed to parse response: {e}"),
            }
        })?;

        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

/// Split `texts` into `batchEmbedContents` bodies of at most [`MAX_EMBED_BATCH`] requests.
fn batch_requests<'a>(
    model_path: &'a str,
    texts: &[&'a str],
    task_type: &'a str,
) -> Vec<BatchEmbedRequest<'a>> {
    texts
        .chunks(MAX_EMBED_BATCH)
        .map(|batch| BatchEmbedRequest {
            requests: batch
                .iter()
                .map(|&text| EmbedRequest {
                    model: model_path,
                    content: Content { parts: vec![TextPart { text }] },
                    task_type,
                })
                .collect(),
        })
        .collect()
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'a str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(&[text], "RETRIEVAL_QUERY").await?.into_iter().next().ok_or_else(
            || RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: "API returned empty response".into(),
            },
        )
    }

    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_with_task(texts, "RETRIEVAL_DOCUMENT").await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ── Generation ─────────────────────────────────────────────────────

/// A [`Generator`] backed by the Gemini `generateContent` endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use veridoc::gemini::GeminiGenerator;
///
/// let generator = GeminiGenerator::new(api_key, "gemini-2.0-flash")?;
/// let output = generator.generate("¿Cuál es el plazo?", &evidence, 1024).await?;
/// ```
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiGenerator {
    /// Create a generator for `model` (e.g. `gemini-2.0-flash`).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key_or_error(api_key.into())?,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn generation_error(message: String) -> RagError {
        RagError::GenerationError { provider: PROVIDER.into(), message }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        query: &str,
        evidence: &[RetrievedEvidence],
        max_tokens: u32,
    ) -> Result<ParsedOutput> {
        let prompt = build_prompt(query, evidence);
        debug!(
            provider = PROVIDER,
            model = %self.model,
            evidence = evidence.len(),
            max_tokens,
            "generating answer"
        );

        let body = GenerateRequest {
            contents: vec![Content { parts: vec![TextPart { text: &prompt }] }],
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens,
                temperature: GENERATION_TEMPERATURE,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, status = ?e.status(), "generation request failed");
                Self::generation_error(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(provider = PROVIDER, %status, "generation API error");
            return Err(Self::generation_error(error_detail(response).await));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, %status, "failed to parse generation response");
            Self::generation_error(format!("failed to parse response: {e}"))
        })?;

        let raw = parsed
            .text()
            .ok_or_else(|| Self::generation_error("response contained no text".to_string()))?;

        Ok(parse_model_output(&raw))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
