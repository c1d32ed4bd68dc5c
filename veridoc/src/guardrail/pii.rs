//! Detection and redaction of personally identifiable information.
//!
//! Covers Peruvian national IDs (DNI), tax IDs (RUC), email addresses and
//! mobile phone numbers. Both free text and nested JSON records can be
//! scrubbed; the latter is what gets written to logs.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagError, Result};

/// The kinds of PII the scrubber knows about.
///
/// Variants are listed in detection order: a span claimed by an earlier kind
/// is never reconsidered by a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    /// National identity document: 8 digits.
    Dni,
    /// Taxpayer registry number: 11 digits.
    Ruc,
    /// Email address.
    Email,
    /// Local mobile number: 9 digits starting with 9.
    Phone,
}

impl PiiKind {
    /// Every kind, in detection order.
    pub const ALL: [PiiKind; 4] = [PiiKind::Dni, PiiKind::Ruc, PiiKind::Email, PiiKind::Phone];

    /// The configuration name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            PiiKind::Dni => "dni",
            PiiKind::Ruc => "ruc",
            PiiKind::Email => "email",
            PiiKind::Phone => "phone",
        }
    }

    /// Look up a kind by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// The token substituted for a match of this kind.
    pub fn redaction_token(self) -> &'static str {
        match self {
            PiiKind::Dni => "[DNI_REDACTED]",
            PiiKind::Ruc => "[RUC_REDACTED]",
            PiiKind::Email => "[EMAIL_REDACTED]",
            PiiKind::Phone => "[PHONE_REDACTED]",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            PiiKind::Dni => r"[0-9]{8}",
            PiiKind::Ruc => r"[0-9]{11}",
            PiiKind::Email => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            PiiKind::Phone => r"(?:\+51[ -]?)?9[0-9]{2}[ -]?[0-9]{3}[ -]?[0-9]{3}",
        }
    }

    /// Numeric kinds must not be a slice of a longer digit run.
    fn needs_digit_boundary(self) -> bool {
        !matches!(self, PiiKind::Email)
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single PII occurrence in a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMatch {
    /// What kind of PII was found.
    pub kind: PiiKind,
    /// The matched text as originally written. For audit use only.
    pub value: String,
    /// Byte offset where the match starts.
    pub start: usize,
    /// Byte offset one past the end of the match.
    pub end: usize,
}

/// Finds and redacts PII in text and structured records.
///
/// # Example
///
/// ```rust,ignore
/// use veridoc::guardrail::PiiScrubber;
///
/// let scrubber = PiiScrubber::new();
/// let (clean, matches) = scrubber.scrub("DNI: 12345678");
/// assert_eq!(clean, "DNI: [DNI_REDACTED]");
/// ```
#[derive(Debug, Clone)]
pub struct PiiScrubber {
    patterns: Vec<(PiiKind, Regex)>,
}

impl Default for PiiScrubber {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiScrubber {
    /// Create a scrubber with every known pattern active.
    pub fn new() -> Self {
        Self { patterns: PiiKind::ALL.into_iter().map(|kind| (kind, compile(kind))).collect() }
    }

    /// Create a scrubber restricted to the named patterns.
    ///
    /// Detection order stays fixed regardless of the order of `names`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an unknown pattern name.
    pub fn with_patterns<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let kind = PiiKind::from_name(name).ok_or_else(|| {
                RagError::ConfigError(format!("unknown PII pattern '{name}'"))
            })?;
            selected.push(kind);
        }

        let patterns = PiiKind::ALL
            .into_iter()
            .filter(|kind| selected.contains(kind))
            .map(|kind| (kind, compile(kind)))
            .collect();
        Ok(Self { patterns })
    }

    /// The active kinds, in detection order.
    pub fn kinds(&self) -> impl Iterator<Item = PiiKind> + '_ {
        self.patterns.iter().map(|(kind, _)| *kind)
    }

    /// Find all PII in `text`.
    ///
    /// Matches are grouped by kind in detection order and, within a kind,
    /// ordered by position.
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let mut matches: Vec<PiiMatch> = Vec::new();

        for (kind, regex) in &self.patterns {
            for found in regex.find_iter(text) {
                let (start, end) = (found.start(), found.end());
                if kind.needs_digit_boundary() && !on_digit_boundary(text, start, end) {
                    continue;
                }
                if matches.iter().any(|m| start < m.end && m.start < end) {
                    continue;
                }
                matches.push(PiiMatch {
                    kind: *kind,
                    value: found.as_str().to_string(),
                    start,
                    end,
                });
            }
        }

        matches
    }

    /// Replace every detected span with its redaction token.
    ///
    /// Returns the redacted text and the matches found. Text without PII is
    /// returned unchanged.
    pub fn scrub(&self, text: &str) -> (String, Vec<PiiMatch>) {
        let matches = self.detect(text);
        if matches.is_empty() {
            return (text.to_string(), matches);
        }

        let mut spans: Vec<&PiiMatch> = matches.iter().collect();
        spans.sort_by_key(|m| m.start);

        let mut redacted = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in spans {
            redacted.push_str(&text[cursor..m.start]);
            redacted.push_str(m.kind.redaction_token());
            cursor = m.end;
        }
        redacted.push_str(&text[cursor..]);

        (redacted, matches)
    }

    /// Redact every string in a JSON record, at any depth.
    ///
    /// Object keys and non-string values are left untouched.
    pub fn scrub_for_logs(&self, record: &Value) -> Value {
        match record {
            Value::String(s) => Value::String(self.scrub(s).0),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.scrub_for_logs(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), self.scrub_for_logs(v))).collect(),
            ),
            other => other.clone(),
        }
    }
}

fn compile(kind: PiiKind) -> Regex {
    // Patterns are static literals exercised by the tests below.
    Regex::new(kind.pattern()).expect("static PII pattern is valid")
}

/// True when the span is not directly preceded or followed by an ASCII digit.
fn on_digit_boundary(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let before = start > 0 && bytes[start - 1].is_ascii_digit();
    let after = end < bytes.len() && bytes[end].is_ascii_digit();
    !before && !after
}
