//! Citation enrichment and fallback confidence.

use crate::document::{Citation, RetrievedEvidence};
use crate::generation::DeclaredCitation;

/// Number of evidence chunks turned into citations when the model declares none.
pub const SYNTHESIZED_CITATIONS: usize = 3;

/// Characters of evidence content quoted in a synthesized citation.
pub const EXCERPT_CHARS: usize = 150;

/// Source name used when neither the model nor the evidence provides one.
pub const UNKNOWN_SOURCE: &str = "Desconocido";

/// Evidence scores above this count as high quality for the confidence bonus.
const HIGH_SCORE: f32 = 0.7;
const BONUS_PER_HIGH_SCORE: f32 = 0.05;
const MAX_BONUS: f32 = 0.15;

/// Attach evidence metadata to model-declared citations.
///
/// A declared citation is matched to the first evidence chunk whose source
/// contains, or is contained in, the declared source (case-insensitive); the
/// match supplies `source_uri` and `relevance_score`. Unmatched citations keep
/// a relevance of 0.0. When the model declares nothing, citations are built
/// from the top [`SYNTHESIZED_CITATIONS`] evidence chunks instead.
pub fn enrich_citations(
    declared: &[DeclaredCitation],
    evidence: &[RetrievedEvidence],
) -> Vec<Citation> {
    if declared.is_empty() {
        return evidence.iter().take(SYNTHESIZED_CITATIONS).map(synthesize).collect();
    }

    declared
        .iter()
        .map(|citation| {
            let matched = find_source(&citation.source, evidence);
            Citation {
                quote: citation.quote.clone(),
                source: if citation.source.is_empty() {
                    UNKNOWN_SOURCE.to_string()
                } else {
                    citation.source.clone()
                },
                page: citation.page,
                source_uri: matched.and_then(RetrievedEvidence::source_uri),
                relevance_score: matched.map_or(0.0, |e| e.score),
            }
        })
        .collect()
}

fn find_source<'a>(
    source: &str,
    evidence: &'a [RetrievedEvidence],
) -> Option<&'a RetrievedEvidence> {
    let wanted = source.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    evidence.iter().find(|e| {
        let candidate = e.source().to_lowercase();
        !candidate.is_empty() && (candidate.contains(&wanted) || wanted.contains(&candidate))
    })
}

fn synthesize(evidence: &RetrievedEvidence) -> Citation {
    Citation {
        quote: excerpt(&evidence.content),
        source: if evidence.source().is_empty() {
            UNKNOWN_SOURCE.to_string()
        } else {
            evidence.source().to_string()
        },
        page: evidence.page(),
        source_uri: evidence.source_uri(),
        relevance_score: evidence.score,
    }
}

/// The first [`EXCERPT_CHARS`] characters, with an ellipsis when truncated.
fn excerpt(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}

/// Confidence derived from evidence scores, used when the model gives none.
///
/// Mean score plus 0.05 per score above 0.7 (bonus capped at 0.15), capped
/// at 1.0 and rounded to two decimals. No evidence means 0.0.
pub fn fallback_confidence(evidence: &[RetrievedEvidence]) -> f32 {
    if evidence.is_empty() {
        return 0.0;
    }

    let mean = evidence.iter().map(|e| e.score).sum::<f32>() / evidence.len() as f32;
    let high = evidence.iter().filter(|e| e.score > HIGH_SCORE).count();
    let bonus = (high as f32 * BONUS_PER_HIGH_SCORE).min(MAX_BONUS);

    ((mean + bonus).min(1.0) * 100.0).round() / 100.0
}
