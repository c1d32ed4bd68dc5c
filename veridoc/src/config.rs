//! Configuration for the question-answering pipeline.
//!
//! [`Settings`] is an explicit value handed to [`QaPipeline`](crate::QaPipeline);
//! there is no global instance. Build one with [`Settings::builder`] or load
//! it from the environment with [`Settings::from_env`].

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::guardrail::refusal::{default_domain_terms, default_off_topic_terms};
use crate::guardrail::{GroundingConfig, PiiKind, PiiScrubber, RefusalConfig, RelevanceAggregate};

/// Prefix of every environment variable read by [`Settings::from_env`].
pub const ENV_PREFIX: &str = "VERIDOC_";

/// Thresholds and vocabularies for the guardrail stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSettings {
    /// Minimum aggregate evidence score before generation.
    pub min_relevance_score: f32,
    /// How evidence scores are aggregated for the relevance rule.
    pub relevance_aggregate: RelevanceAggregate,
    /// Minimum fraction of grounded claims after generation.
    pub min_grounding_score: f32,
    /// Minimum support for a single claim to count as grounded.
    pub claim_support_threshold: f32,
    /// Claims shorter than this many characters are not scored.
    pub min_claim_chars: usize,
    /// Vocabulary of the corpus domain.
    pub domain_terms: Vec<String>,
    /// Vocabulary that signals an unrelated query.
    pub off_topic_terms: Vec<String>,
    /// Active PII pattern names.
    pub pii_patterns: Vec<String>,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            min_relevance_score: 0.3,
            relevance_aggregate: RelevanceAggregate::Mean,
            min_grounding_score: 0.5,
            claim_support_threshold: 0.5,
            min_claim_chars: 10,
            domain_terms: default_domain_terms(),
            off_topic_terms: default_off_topic_terms(),
            pii_patterns: PiiKind::ALL.iter().map(|kind| kind.name().to_string()).collect(),
        }
    }
}

impl GuardrailSettings {
    /// Thresholds for the refusal policy.
    pub fn refusal_config(&self) -> RefusalConfig {
        RefusalConfig {
            min_relevance_score: self.min_relevance_score,
            relevance_aggregate: self.relevance_aggregate,
            min_grounding_score: self.min_grounding_score,
            domain_terms: self.domain_terms.clone(),
            off_topic_terms: self.off_topic_terms.clone(),
        }
    }

    /// Thresholds for the grounding checker.
    pub fn grounding_config(&self) -> GroundingConfig {
        GroundingConfig {
            min_grounding_score: self.min_grounding_score,
            claim_support_threshold: self.claim_support_threshold,
            min_claim_chars: self.min_claim_chars,
        }
    }

    /// A scrubber restricted to the configured patterns.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an unknown pattern name.
    pub fn pii_scrubber(&self) -> Result<PiiScrubber> {
        PiiScrubber::with_patterns(&self.pii_patterns)
    }
}

/// Configuration parameters for ingestion and querying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of evidence chunks retrieved per query.
    pub top_k: usize,
    /// Output token limit for generation.
    pub max_tokens: u32,
    /// Embedding model name.
    pub embedding_model: String,
    /// Generation model name.
    pub llm_model: String,
    /// Whether scrubbing, refusal and grounding stages run.
    pub guardrails_enabled: bool,
    /// API key for the model provider.
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Guardrail thresholds.
    pub guardrails: GuardrailSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            max_tokens: 1024,
            embedding_model: "text-embedding-004".to_string(),
            llm_model: "gemini-2.0-flash".to_string(),
            guardrails_enabled: true,
            api_key: None,
            guardrails: GuardrailSettings::default(),
        }
    }
}

impl Settings {
    /// Create a new builder for constructing [`Settings`].
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Load settings from `.env` and the process environment.
    ///
    /// Recognized variables: `VERIDOC_CHUNK_SIZE`, `VERIDOC_CHUNK_OVERLAP`,
    /// `VERIDOC_TOP_K`, `VERIDOC_MAX_TOKENS`, `VERIDOC_EMBEDDING_MODEL`,
    /// `VERIDOC_LLM_MODEL`, `VERIDOC_GUARDRAILS_ENABLED`,
    /// `VERIDOC_MIN_RELEVANCE_SCORE`, `VERIDOC_RELEVANCE_AGGREGATE`,
    /// `VERIDOC_MIN_GROUNDING_SCORE`, `VERIDOC_CLAIM_SUPPORT_THRESHOLD`,
    /// `VERIDOC_PII_PATTERNS` (comma separated), and `GOOGLE_API_KEY` or
    /// `GEMINI_API_KEY` for the API key.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a variable cannot be parsed or the
    /// resulting settings are invalid.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine; variables may come from the shell.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Settings::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
        };

        let mut builder = Settings::builder();
        if let Some(value) = var("CHUNK_SIZE") {
            builder = builder.chunk_size(parse_var("CHUNK_SIZE", &value)?);
        }
        if let Some(value) = var("CHUNK_OVERLAP") {
            builder = builder.chunk_overlap(parse_var("CHUNK_OVERLAP", &value)?);
        }
        if let Some(value) = var("TOP_K") {
            builder = builder.top_k(parse_var("TOP_K", &value)?);
        }
        if let Some(value) = var("MAX_TOKENS") {
            builder = builder.max_tokens(parse_var("MAX_TOKENS", &value)?);
        }
        if let Some(value) = var("EMBEDDING_MODEL") {
            builder = builder.embedding_model(value);
        }
        if let Some(value) = var("LLM_MODEL") {
            builder = builder.llm_model(value);
        }
        if let Some(value) = var("GUARDRAILS_ENABLED") {
            builder = builder.guardrails_enabled(parse_bool("GUARDRAILS_ENABLED", &value)?);
        }
        if let Some(value) = var("MIN_RELEVANCE_SCORE") {
            builder = builder.min_relevance_score(parse_var("MIN_RELEVANCE_SCORE", &value)?);
        }
        if let Some(value) = var("RELEVANCE_AGGREGATE") {
            let aggregate = match value.trim().to_lowercase().as_str() {
                "mean" => RelevanceAggregate::Mean,
                "max" => RelevanceAggregate::Max,
                other => {
                    return Err(RagError::ConfigError(format!(
                        "{ENV_PREFIX}RELEVANCE_AGGREGATE must be 'mean' or 'max', got '{other}'"
                    )));
                }
            };
            builder = builder.relevance_aggregate(aggregate);
        }
        if let Some(value) = var("MIN_GROUNDING_SCORE") {
            builder = builder.min_grounding_score(parse_var("MIN_GROUNDING_SCORE", &value)?);
        }
        if let Some(value) = var("CLAIM_SUPPORT_THRESHOLD") {
            builder =
                builder.claim_support_threshold(parse_var("CLAIM_SUPPORT_THRESHOLD", &value)?);
        }
        if let Some(value) = var("PII_PATTERNS") {
            builder = builder.pii_patterns(
                value.split(',').map(str::trim).filter(|name| !name.is_empty()),
            );
        }
        if let Some(key) = lookup("GOOGLE_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            builder = builder.api_key(key);
        }

        builder.build()
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        RagError::ConfigError(format!("invalid value '{value}' for {ENV_PREFIX}{name}: {e}"))
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::ConfigError(format!(
            "invalid boolean '{value}' for {ENV_PREFIX}{name}"
        ))),
    }
}

/// Builder for constructing validated [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.settings.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.settings.chunk_overlap = overlap;
        self
    }

    /// Set the number of evidence chunks retrieved per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.settings.top_k = k;
        self
    }

    /// Set the output token limit for generation.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.settings.max_tokens = max_tokens;
        self
    }

    /// Set the embedding model name.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.settings.embedding_model = model.into();
        self
    }

    /// Set the generation model name.
    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.settings.llm_model = model.into();
        self
    }

    /// Enable or disable the guardrail stages.
    pub fn guardrails_enabled(mut self, enabled: bool) -> Self {
        self.settings.guardrails_enabled = enabled;
        self
    }

    /// Set the model provider API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.settings.api_key = Some(key.into());
        self
    }

    /// Replace all guardrail settings at once.
    pub fn guardrails(mut self, guardrails: GuardrailSettings) -> Self {
        self.settings.guardrails = guardrails;
        self
    }

    /// Set the minimum aggregate evidence score.
    pub fn min_relevance_score(mut self, score: f32) -> Self {
        self.settings.guardrails.min_relevance_score = score;
        self
    }

    /// Set how evidence scores are aggregated.
    pub fn relevance_aggregate(mut self, aggregate: RelevanceAggregate) -> Self {
        self.settings.guardrails.relevance_aggregate = aggregate;
        self
    }

    /// Set the minimum grounding score.
    pub fn min_grounding_score(mut self, score: f32) -> Self {
        self.settings.guardrails.min_grounding_score = score;
        self
    }

    /// Set the per-claim support threshold.
    pub fn claim_support_threshold(mut self, threshold: f32) -> Self {
        self.settings.guardrails.claim_support_threshold = threshold;
        self
    }

    /// Set the active PII pattern names.
    pub fn pii_patterns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.guardrails.pii_patterns = names.into_iter().map(Into::into).collect();
        self
    }

    /// Build the [`Settings`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0` or `max_tokens == 0`
    /// - a score threshold lies outside `[0, 1]`
    /// - a PII pattern name is unknown
    pub fn build(self) -> Result<Settings> {
        let settings = self.settings;

        if settings.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if settings.chunk_overlap >= settings.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                settings.chunk_overlap, settings.chunk_size
            )));
        }
        if settings.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if settings.max_tokens == 0 {
            return Err(RagError::ConfigError("max_tokens must be greater than zero".to_string()));
        }

        let guardrails = &settings.guardrails;
        for (name, value) in [
            ("min_relevance_score", guardrails.min_relevance_score),
            ("min_grounding_score", guardrails.min_grounding_score),
            ("claim_support_threshold", guardrails.claim_support_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RagError::ConfigError(format!(
                    "{name} ({value}) must be between 0.0 and 1.0"
                )));
            }
        }
        if let Some(unknown) =
            guardrails.pii_patterns.iter().find(|name| PiiKind::from_name(name).is_none())
        {
            return Err(RagError::ConfigError(format!("unknown PII pattern '{unknown}'")));
        }

        Ok(settings)
    }
}
