//! Lexical term derivation shared by indexing and querying.
//!
//! Words are runs of alphanumerics and `_`. Each word yields its lowercase
//! form, and identifiers additionally yield their `snake_case` and
//! `camelCase` parts, so `parseFile`, `parse_file` and `parse file` all
//! share the terms `parse` and `file`.

/// Terms shorter than this are dropped.
const MIN_TERM_LEN: usize = 2;

/// Tokenize `text` into lexical terms, keeping duplicates (term frequency
/// matters to the scorer).
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        let trimmed = word.trim_matches('_');
        if trimmed.is_empty() {
            continue;
        }
        let whole = trimmed.to_lowercase();
        let parts = split_identifier(trimmed);
        if whole.chars().count() >= MIN_TERM_LEN {
            terms.push(whole.clone());
        }
        if parts.len() > 1 {
            for part in parts {
                if part.chars().count() >= MIN_TERM_LEN && part != whole {
                    terms.push(part);
                }
            }
        }
    }
    terms
}

/// Tokenize and deduplicate, preserving first-seen order. Used for queries.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Split an identifier on `_` and lower→upper / acronym boundaries.
fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for piece in word.split('_').filter(|p| !p.is_empty()) {
        let chars: Vec<char> = piece.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            let boundary = i > 0
                && c.is_uppercase()
                && (chars[i - 1].is_lowercase()
                    || chars[i - 1].is_ascii_digit()
                    || (chars[i - 1].is_uppercase()
                        && chars.get(i + 1).is_some_and(|n| n.is_lowercase())));
            if boundary && !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}
