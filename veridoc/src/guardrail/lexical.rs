//! Token helpers shared by the grounding and topicality heuristics.

use std::collections::HashSet;

/// Function words ignored when comparing vocabulary (Spanish and English).
const STOP_WORDS: &[&str] = &[
    "los", "las", "una", "unos", "unas", "del", "que", "por", "para", "con", "sin", "sus",
    "les", "como", "más", "mas", "pero", "este", "esta", "estos", "estas", "ese", "esa", "esos",
    "esas", "según", "ser", "está", "están", "han", "fue", "son", "sobre", "entre", "cual",
    "cuál", "cuando", "donde", "dónde", "qué", "cómo", "hay", "puede", "debe", "también",
    "the", "and", "for", "with", "from", "that", "this", "are", "was", "were", "has", "have",
    "not", "but", "what", "which", "how", "can",
];

/// Lowercased alphanumeric runs of `text`.
pub(crate) fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Tokens that carry meaning: numbers, plus words of three or more letters
/// that are not stop words.
pub(crate) fn content_tokens(text: &str) -> HashSet<String> {
    tokens(text)
        .filter(|token| {
            token.chars().all(|c| c.is_ascii_digit())
                || (token.chars().count() >= 3 && !STOP_WORDS.contains(&token.as_str()))
        })
        .collect()
}

/// The token sequence of `text` joined by single spaces.
pub(crate) fn normalize(text: &str) -> String {
    tokens(text).collect::<Vec<_>>().join(" ")
}

/// Whether `term` (one or more words) occurs in `normalized` on word boundaries.
pub(crate) fn contains_phrase(normalized: &str, term: &str) -> bool {
    let term = normalize(term);
    if term.is_empty() {
        return false;
    }
    format!(" {normalized} ").contains(&format!(" {term} "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_tokens_drop_stop_words_and_short_words() {
        let found = content_tokens("El plazo es de 20 días, según la norma.");
        let mut found: Vec<_> = found.into_iter().collect();
        found.sort();
        assert_eq!(found, vec!["20", "días", "norma", "plazo"]);
    }

    #[test]
    fn phrases_match_on_word_boundaries() {
        let normalized = normalize("¿Cuál es el plazo del recurso de apelación?");
        assert!(contains_phrase(&normalized, "recurso de apelación"));
        assert!(!contains_phrase(&normalized, "curso"));
    }
}
