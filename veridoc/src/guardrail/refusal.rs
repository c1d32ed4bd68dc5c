//! Refusal policy: decides when the system must not answer.
//!
//! [`RefusalPolicy::evaluate`] is a pure function of its arguments and the
//! thresholds fixed at construction. Rules are checked in a fixed order and
//! the first one that fires wins:
//!
//! 1. no evidence → [`RefusalReason::NoContext`]
//! 2. aggregate relevance below the minimum → [`RefusalReason::LowRelevance`]
//! 3. query looks unrelated to the corpus → [`RefusalReason::OffTopic`]
//! 4. grounding score below the minimum → [`RefusalReason::LowGrounding`]
//! 5. otherwise → [`RefusalReason::None`]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{Citation, RetrievedEvidence};
use crate::guardrail::lexical::{contains_phrase, content_tokens, normalize};

/// Why an answer was withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// No refusal.
    None,
    /// Retrieval returned nothing.
    NoContext,
    /// Retrieved evidence is not similar enough to the query.
    LowRelevance,
    /// The query is outside the corpus domain.
    OffTopic,
    /// The generated answer is not supported by the evidence.
    LowGrounding,
}

impl RefusalReason {
    /// Stable identifier used in responses and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RefusalReason::None => "none",
            RefusalReason::NoContext => "no_context",
            RefusalReason::LowRelevance => "low_relevance",
            RefusalReason::OffTopic => "off_topic",
            RefusalReason::LowGrounding => "low_grounding",
        }
    }

    /// The answer shown to the user when refusing for this reason.
    pub fn user_message(self) -> &'static str {
        match self {
            RefusalReason::None => "No se pudo generar una respuesta para esta pregunta.",
            RefusalReason::NoContext => {
                "No encontré información en los documentos disponibles para responder esta pregunta."
            }
            RefusalReason::LowRelevance => {
                "Los documentos encontrados no son lo suficientemente relevantes para responder con seguridad. \
                 Intente reformular la pregunta con más detalle."
            }
            RefusalReason::OffTopic => {
                "La pregunta parece estar fuera del ámbito de los documentos disponibles."
            }
            RefusalReason::LowGrounding => {
                "No puedo dar una respuesta suficientemente respaldada por los documentos disponibles."
            }
        }
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How evidence scores are combined for the relevance rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceAggregate {
    /// Arithmetic mean of all scores.
    #[default]
    Mean,
    /// Highest score.
    Max,
}

/// Thresholds and vocabularies for [`RefusalPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefusalConfig {
    /// Minimum aggregate evidence score.
    pub min_relevance_score: f32,
    /// How evidence scores are aggregated.
    pub relevance_aggregate: RelevanceAggregate,
    /// Minimum grounding score.
    pub min_grounding_score: f32,
    /// Words or phrases that mark a query as belonging to the corpus domain.
    pub domain_terms: Vec<String>,
    /// Words or phrases that mark a query as likely unrelated to the corpus.
    pub off_topic_terms: Vec<String>,
}

impl Default for RefusalConfig {
    fn default() -> Self {
        Self {
            min_relevance_score: 0.3,
            relevance_aggregate: RelevanceAggregate::Mean,
            min_grounding_score: 0.5,
            domain_terms: default_domain_terms(),
            off_topic_terms: default_off_topic_terms(),
        }
    }
}

/// Public-administration vocabulary of the default corpus.
pub fn default_domain_terms() -> Vec<String> {
    [
        "ley", "decreto", "norma", "normativa", "reglamento", "resolución", "artículo", "plazo",
        "trámite", "procedimiento", "entidad", "municipalidad", "ministerio", "contrato",
        "contratación", "sanción", "recurso", "tributo", "impuesto", "licencia", "funcionario",
        "servidor público", "expediente", "directiva", "ordenanza", "administrativo",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Topics that signal a query is unrelated to a regulatory corpus.
pub fn default_off_topic_terms() -> Vec<String> {
    [
        "receta", "cocina", "cocinar", "fútbol", "película", "series", "música", "canción",
        "chiste", "horóscopo", "videojuego", "clima", "recipe", "cooking", "football", "movie",
        "song", "joke", "horoscope", "weather",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefusalResult {
    /// Whether the answer must be withheld.
    pub should_refuse: bool,
    /// The rule that fired, or [`RefusalReason::None`].
    pub reason: RefusalReason,
    /// Diagnostic explanation of the decision.
    pub message: Option<String>,
}

impl RefusalResult {
    fn accept() -> Self {
        Self { should_refuse: false, reason: RefusalReason::None, message: None }
    }

    fn refuse(reason: RefusalReason, message: String) -> Self {
        Self { should_refuse: true, reason, message: Some(message) }
    }
}

/// User-facing payload for a refused query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefusalResponse {
    /// Explanation shown in place of an answer.
    pub answer: String,
    /// Always empty.
    pub citations: Vec<Citation>,
    /// Always 0.0.
    pub confidence: f32,
    /// Always true.
    pub refusal: bool,
    /// The rule that fired.
    pub reason: RefusalReason,
    /// Diagnostic detail from the evaluation.
    pub notes: Option<String>,
}

/// Stateless decision function over evidence, query and grounding score.
#[derive(Debug, Clone, Default)]
pub struct RefusalPolicy {
    config: RefusalConfig,
}

impl RefusalPolicy {
    /// Create a policy with the given thresholds.
    pub fn new(config: RefusalConfig) -> Self {
        Self { config }
    }

    /// The thresholds in effect.
    pub fn config(&self) -> &RefusalConfig {
        &self.config
    }

    /// Decide whether to refuse. See the module docs for rule order.
    pub fn evaluate(
        &self,
        evidence: &[RetrievedEvidence],
        query: Option<&str>,
        grounding_score: Option<f32>,
    ) -> RefusalResult {
        if evidence.is_empty() {
            return RefusalResult::refuse(
                RefusalReason::NoContext,
                "retrieval returned no evidence".to_string(),
            );
        }

        let relevance = self.aggregate_relevance(evidence);
        if relevance < self.config.min_relevance_score {
            return RefusalResult::refuse(
                RefusalReason::LowRelevance,
                format!(
                    "relevance {relevance:.2} below minimum {:.2}",
                    self.config.min_relevance_score
                ),
            );
        }

        if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
            if self.is_off_topic(query, evidence) {
                return RefusalResult::refuse(
                    RefusalReason::OffTopic,
                    "query matches off-topic vocabulary and shares no terms with the evidence"
                        .to_string(),
                );
            }
        }

        if let Some(score) = grounding_score {
            if score < self.config.min_grounding_score {
                return RefusalResult::refuse(
                    RefusalReason::LowGrounding,
                    format!(
                        "grounding score {score:.2} below minimum {:.2}",
                        self.config.min_grounding_score
                    ),
                );
            }
        }

        RefusalResult::accept()
    }

    /// Build the user-facing payload for a refusal.
    pub fn format_refusal_response(&self, result: &RefusalResult) -> RefusalResponse {
        RefusalResponse {
            answer: result.reason.user_message().to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            refusal: true,
            reason: result.reason,
            notes: result.message.clone(),
        }
    }

    fn aggregate_relevance(&self, evidence: &[RetrievedEvidence]) -> f32 {
        match self.config.relevance_aggregate {
            RelevanceAggregate::Mean => {
                evidence.iter().map(|e| e.score).sum::<f32>() / evidence.len() as f32
            }
            RelevanceAggregate::Max => {
                evidence.iter().map(|e| e.score).fold(f32::NEG_INFINITY, f32::max)
            }
        }
    }

    /// Off-topic only when the query uses off-topic vocabulary, no domain
    /// vocabulary, and no content word from the evidence.
    fn is_off_topic(&self, query: &str, evidence: &[RetrievedEvidence]) -> bool {
        let normalized = normalize(query);
        let mentions = |terms: &[String]| terms.iter().any(|t| contains_phrase(&normalized, t));

        if !mentions(self.config.off_topic_terms.as_slice())
            || mentions(self.config.domain_terms.as_slice())
        {
            return false;
        }

        let query_tokens = content_tokens(query);
        let shares_vocabulary = evidence.iter().any(|e| {
            let evidence_tokens = content_tokens(&e.content);
            query_tokens.iter().any(|t| evidence_tokens.contains(t))
        });
        !shares_vocabulary
    }
}
