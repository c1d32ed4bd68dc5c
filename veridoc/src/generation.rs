//! Answer generation: the generator seam, prompt construction and tolerant
//! parsing of model output.
//!
//! Models are asked for a JSON object but do not always comply. The output is
//! parsed by an ordered fallback chain whose result records which step
//! succeeded, see [`ParsedOutput`].

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::document::RetrievedEvidence;
use crate::error::Result;

/// Confidence assigned to free-text answers recovered from unparseable output.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Instructions that pin the model to the evidence and to a JSON reply.
pub const SYSTEM_PROMPT: &str = r#"Eres un asistente especializado en normativa pública.
Respondes preguntas usando ÚNICAMENTE la información de los documentos proporcionados.

REGLAS:
1. Usa solo información presente en los documentos.
2. Incluye citas textuales exactas de los documentos, no paráfrasis.
3. Si los documentos no contienen información suficiente, responde con "refusal": true y "citations": [].
4. Sé preciso y conciso, y responde en español.

Responde EXCLUSIVAMENTE con un objeto JSON válido con esta forma:
{
  "answer": "respuesta",
  "citations": [
    {"quote": "cita textual", "source": "nombre del documento", "page": 1}
  ],
  "confidence": 0.0,
  "refusal": false,
  "notes": "limitaciones o aclaraciones (opcional)"
}

"confidence" va de 0.0 (ninguna seguridad) a 1.0 (total seguridad). No escribas texto fuera del JSON."#;

/// Produces a structured answer from a question and its evidence.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Ask the model to answer `query` from `evidence`.
    ///
    /// Malformed model output is not an error; it degrades to
    /// [`ParsedOutput::FallbackFreeText`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationError`](crate::RagError::GenerationError)
    /// when the model call itself fails.
    async fn generate(
        &self,
        query: &str,
        evidence: &[RetrievedEvidence],
        max_tokens: u32,
    ) -> Result<ParsedOutput>;

    /// Name of the model, reported in responses and stats.
    fn model_name(&self) -> &str;
}

/// A citation as declared by the model, before enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredCitation {
    /// The quoted excerpt.
    #[serde(default)]
    pub quote: String,
    /// The document name the model attributes the quote to.
    #[serde(default)]
    pub source: String,
    /// The page, if the model gave a usable one.
    #[serde(default, deserialize_with = "lenient_page")]
    pub page: Option<u32>,
}

/// The structured answer the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    /// The answer text.
    pub answer: String,
    /// Citations declared by the model.
    #[serde(default)]
    pub citations: Vec<DeclaredCitation>,
    /// Self-reported confidence, if any.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Whether the model itself declined to answer.
    #[serde(default)]
    pub refusal: bool,
    /// Free-form caveats.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Which step of the parsing chain produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    /// The whole output was valid JSON.
    Parsed,
    /// JSON was found inside surrounding text.
    Recovered,
    /// No JSON could be found; the raw text became the answer.
    Fallback,
}

/// Model output after the parsing fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput {
    /// The raw output parsed directly.
    Parsed(GeneratedAnswer),
    /// A JSON object was recovered from a fenced or bare block in the output.
    RecoveredFromEmbeddedBlock(GeneratedAnswer),
    /// Nothing parsed; the raw output is used as a low-confidence answer.
    FallbackFreeText {
        /// The synthesized answer.
        answer: GeneratedAnswer,
        /// The unparseable model output.
        raw: String,
    },
}

impl ParsedOutput {
    /// The structured answer, whichever step produced it.
    pub fn answer(&self) -> &GeneratedAnswer {
        match self {
            ParsedOutput::Parsed(answer) | ParsedOutput::RecoveredFromEmbeddedBlock(answer) => {
                answer
            }
            ParsedOutput::FallbackFreeText { answer, .. } => answer,
        }
    }

    /// Consume the output, returning the answer and the raw text when parsing failed.
    pub fn into_parts(self) -> (GeneratedAnswer, Option<String>) {
        match self {
            ParsedOutput::Parsed(answer) | ParsedOutput::RecoveredFromEmbeddedBlock(answer) => {
                (answer, None)
            }
            ParsedOutput::FallbackFreeText { answer, raw } => (answer, Some(raw)),
        }
    }

    /// Which parsing step succeeded.
    pub fn status(&self) -> ParseStatus {
        match self {
            ParsedOutput::Parsed(_) => ParseStatus::Parsed,
            ParsedOutput::RecoveredFromEmbeddedBlock(_) => ParseStatus::Recovered,
            ParsedOutput::FallbackFreeText { .. } => ParseStatus::Fallback,
        }
    }
}

/// Parse raw model output: direct JSON, then embedded blocks, then free text.
pub fn parse_model_output(raw: &str) -> ParsedOutput {
    if let Ok(answer) = serde_json::from_str::<GeneratedAnswer>(raw.trim()) {
        return ParsedOutput::Parsed(answer);
    }

    let candidates = fenced_blocks(raw).into_iter().chain(bare_object(raw));
    for candidate in candidates {
        if let Ok(answer) = serde_json::from_str::<GeneratedAnswer>(candidate) {
            return ParsedOutput::RecoveredFromEmbeddedBlock(answer);
        }
    }

    ParsedOutput::FallbackFreeText {
        answer: GeneratedAnswer {
            answer: raw.trim().to_string(),
            citations: Vec::new(),
            confidence: Some(FALLBACK_CONFIDENCE),
            refusal: false,
            notes: None,
        },
        raw: raw.to_string(),
    }
}

/// Bodies of ```-fenced blocks, with an optional language tag line skipped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = match after.find('\n') {
            Some(i) if !after[..i].contains('{') => i + 1,
            _ => 0,
        };
        let Some(close) = after[body_start..].find("```") else {
            break;
        };
        blocks.push(after[body_start..body_start + close].trim());
        rest = &after[body_start + close + 3..];
    }

    blocks
}

/// The span from the first `{` to the last `}`.
fn bare_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Accept pages given as numbers or numeric strings; anything else is `None`.
fn lenient_page<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u32::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Build the full prompt: instructions, numbered evidence, then the question.
pub fn build_prompt(query: &str, evidence: &[RetrievedEvidence]) -> String {
    let context = evidence
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let source = if e.source().is_empty() { "Desconocido" } else { e.source() };
            let page = e.page().map_or_else(|| "?".to_string(), |p| p.to_string());
            format!("[Documento {}: {source}, Página {page}]\n{}", i + 1, e.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "{SYSTEM_PROMPT}\n\nDOCUMENTOS DE REFERENCIA:\n{context}\n\nPREGUNTA DEL USUARIO:\n{query}\n\n\
         Responde SOLO con el JSON estructurado:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_direct_json() {
        let raw = r#"{"answer": "Veinte días.", "citations": [{"quote": "20 días", "source": "ley.pdf", "page": 3}], "confidence": 0.9, "refusal": false}"#;
        let parsed = parse_model_output(raw);

        assert_eq!(parsed.status(), ParseStatus::Parsed);
        assert_eq!(parsed.answer().answer, "Veinte días.");
        assert_eq!(parsed.answer().citations[0].page, Some(3));
        assert_eq!(parsed.answer().confidence, Some(0.9));
    }

    #[test]
    fn test_json_in_markdown() {
        let raw = "Aquí está:\n```json\n{\"answer\": \"Sí.\", \"refusal\": false}\n```\nSaludos";
        let parsed = parse_model_output(raw);

        assert_eq!(parsed.status(), ParseStatus::Recovered);
        assert_eq!(parsed.answer().answer, "Sí.");
        assert!(parsed.answer().citations.is_empty());
        assert_eq!(parsed.answer().confidence, None);
    }

    #[test]
    fn test_untagged_fence() {
        let raw = "```\n{\"answer\": \"No.\"}\n```";
        assert_eq!(parse_model_output(raw).status(), ParseStatus::Recovered);
    }

    #[test]
    fn test_bare_object_in_text() {
        let raw = "Respuesta: {\"answer\": \"Tres.\", \"notes\": null} fin.";
        let parsed = parse_model_output(raw);

        assert_eq!(parsed.status(), ParseStatus::Recovered);
        assert_eq!(parsed.answer().answer, "Tres.");
    }

    #[test]
    fn test_plain_text_falls_back() {
        let raw = "  El plazo es de veinte días.  ";
        let (answer, raw_text) = parse_model_output(raw).into_parts();

        assert_eq!(answer.answer, "El plazo es de veinte días.");
        assert_eq!(answer.confidence, Some(FALLBACK_CONFIDENCE));
        assert!(answer.citations.is_empty());
        assert!(!answer.refusal);
        assert_eq!(raw_text.as_deref(), Some(raw));
    }

    #[test]
    fn test_json_without_answer_falls_back() {
        let parsed = parse_model_output(r#"{"citations": []}"#);
        assert_eq!(parsed.status(), ParseStatus::Fallback);
    }

    #[test]
    fn test_lenient_pages() {
        let raw = r#"{"answer": "a", "citations": [
            {"quote": "q", "source": "s", "page": "7"},
            {"quote": "q", "source": "s", "page": "siete"},
            {"quote": "q", "source": "s", "page": null},
            {"quote": "q", "source": "s"}
        ]}"#;
        let parsed = parse_model_output(raw);
        let pages: Vec<_> = parsed.answer().citations.iter().map(|c| c.page).collect();

        assert_eq!(pages, vec![Some(7), None, None, None]);
    }

    #[test]
    fn test_prompt_numbers_evidence() {
        let evidence = vec![RetrievedEvidence {
            content: "Texto de la ley.".to_string(),
            metadata: HashMap::from([
                ("source".to_string(), "ley.pdf".to_string()),
                ("page".to_string(), "4".to_string()),
            ]),
            score: 0.8,
        }];

        let prompt = build_prompt("¿Qué dice?", &evidence);

        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.contains("[Documento 1: ley.pdf, Página 4]\nTexto de la ley."));
        assert!(prompt.contains("PREGUNTA DEL USUARIO:\n¿Qué dice?"));
    }
}
