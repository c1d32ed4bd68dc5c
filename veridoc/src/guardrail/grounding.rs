//! Lexical grounding check of generated answers against retrieved evidence.
//!
//! The check is a heuristic, not an entailment model. An answer is split into
//! sentence-like claims and each claim is scored by how much of its vocabulary
//! appears in the evidence. Paraphrases can be flagged as ungrounded and
//! fabricated sentences that reuse evidence vocabulary can pass; the
//! thresholds in [`GroundingConfig`] are tuning knobs, not guarantees.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::document::RetrievedEvidence;
use crate::guardrail::lexical::{content_tokens, normalize};

/// Thresholds for [`GroundingChecker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// Minimum fraction of grounded claims for an answer to count as grounded.
    pub min_grounding_score: f32,
    /// Minimum support a single claim needs to count as grounded.
    pub claim_support_threshold: f32,
    /// Claims shorter than this many characters are ignored.
    pub min_claim_chars: usize,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self { min_grounding_score: 0.5, claim_support_threshold: 0.5, min_claim_chars: 10 }
    }
}

/// Support score of one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSupport {
    /// The claim text.
    pub claim: String,
    /// Fraction of the claim's content words found in the evidence.
    pub support: f32,
    /// Whether `support` reached the per-claim threshold.
    pub grounded: bool,
}

/// Diagnostics attached to a [`GroundingResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingDetails {
    /// Number of claims that were scored.
    pub total_claims: usize,
    /// Number of claims that reached the per-claim threshold.
    pub grounded_claims: usize,
    /// The per-claim threshold in effect.
    pub claim_support_threshold: f32,
    /// Per-claim scores in answer order.
    pub claims: Vec<ClaimSupport>,
}

/// Outcome of a grounding check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingResult {
    /// Fraction of grounded claims, 1.0 when there are no claims.
    pub score: f32,
    /// Whether `score` meets the configured minimum.
    pub is_grounded: bool,
    /// Unsupported claims in the order they appear in the answer.
    pub ungrounded_claims: Vec<String>,
    /// Per-claim diagnostics.
    pub details: GroundingDetails,
}

/// Scores how well an answer is textually supported by evidence.
#[derive(Debug, Clone, Default)]
pub struct GroundingChecker {
    config: GroundingConfig,
}

impl GroundingChecker {
    /// Create a checker with the given thresholds.
    pub fn new(config: GroundingConfig) -> Self {
        Self { config }
    }

    /// The thresholds in effect.
    pub fn config(&self) -> &GroundingConfig {
        &self.config
    }

    /// Check `answer` against the concatenated content of `evidence`.
    ///
    /// Answers without any claim of meaningful length (e.g. "Ok") are
    /// vacuously grounded with a score of 1.0.
    pub fn check(&self, answer: &str, evidence: &[RetrievedEvidence]) -> GroundingResult {
        let corpus =
            evidence.iter().map(|e| e.content.as_str()).collect::<Vec<_>>().join("\n");
        let corpus_tokens = content_tokens(&corpus);
        let corpus_normalized = normalize(&corpus);

        let claims: Vec<ClaimSupport> = split_claims(answer)
            .into_iter()
            .filter(|claim| claim.chars().count() >= self.config.min_claim_chars)
            .map(|claim| {
                let support = claim_support(claim, &corpus_tokens, &corpus_normalized);
                ClaimSupport {
                    claim: claim.to_string(),
                    support,
                    grounded: support >= self.config.claim_support_threshold,
                }
            })
            .collect();

        let grounded_claims = claims.iter().filter(|c| c.grounded).count();
        let score =
            if claims.is_empty() { 1.0 } else { grounded_claims as f32 / claims.len() as f32 };
        let ungrounded_claims =
            claims.iter().filter(|c| !c.grounded).map(|c| c.claim.clone()).collect();

        GroundingResult {
            score,
            is_grounded: score >= self.config.min_grounding_score,
            ungrounded_claims,
            details: GroundingDetails {
                total_claims: claims.len(),
                grounded_claims,
                claim_support_threshold: self.config.claim_support_threshold,
                claims,
            },
        }
    }
}

/// Split at sentence punctuation followed by whitespace (or the end), and at
/// line breaks. Decimal points and abbreviations glued to the next word stay
/// inside their claim.
fn split_claims(answer: &str) -> Vec<&str> {
    let mut claims = Vec::new();
    let mut start = 0;
    let mut chars = answer.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' | ';' => chars.peek().is_none_or(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            claims.push(answer[start..end].trim());
            start = end;
        }
    }
    claims.push(answer[start..].trim());

    claims.into_iter().filter(|claim| !claim.is_empty()).collect()
}

fn claim_support(claim: &str, corpus_tokens: &HashSet<String>, corpus_normalized: &str) -> f32 {
    let claim_tokens = content_tokens(claim);
    if claim_tokens.is_empty() {
        return 1.0;
    }

    let claim_normalized = normalize(claim);
    if corpus_normalized.contains(&claim_normalized) {
        return 1.0;
    }

    let hits = claim_tokens.iter().filter(|token| corpus_tokens.contains(*token)).count();
    hits as f32 / claim_tokens.len() as f32
}
