//! Query expansion collaborator.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Output of an `expand(query)` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub expanded_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "general_intent")]
    pub intent: String,
    #[serde(default)]
    pub hypothetical_snippet: Option<String>,
}

fn general_intent() -> String {
    "general".to_string()
}

impl ExpandedQuery {
    /// The degraded form used when the expander is absent or fails.
    pub fn fallback(query: &str) -> Self {
        Self {
            expanded_text: query.to_string(),
            keywords: Vec::new(),
            intent: general_intent(),
            hypothetical_snippet: None,
        }
    }

    /// Text sent to the embedder: expanded text plus the hypothetical snippet.
    pub fn dense_text(&self) -> String {
        match &self.hypothetical_snippet {
            Some(snippet) if !snippet.trim().is_empty() => {
                format!("{}\n{}", self.expanded_text, snippet)
            }
            _ => self.expanded_text.clone(),
        }
    }
}

/// Opaque `expand(query_text) -> ExpandedQuery` collaborator.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str) -> Result<ExpandedQuery>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_uses_raw_query_and_general_intent() {
        let q = ExpandedQuery::fallback("auth flow");
        assert_eq!(q.expanded_text, "auth flow");
        assert_eq!(q.intent, "general");
        assert!(q.keywords.is_empty());
        assert_eq!(q.dense_text(), "auth flow");
    }

    #[test]
    fn dense_text_appends_snippet() {
        let q = ExpandedQuery {
            expanded_text: "jwt validation".to_string(),
            keywords: vec!["jwt".to_string()],
            intent: "implementation".to_string(),
            hypothetical_snippet: Some("func ValidateJWT() {}".to_string()),
        };
        assert_eq!(q.dense_text(), "jwt validation\nfunc ValidateJWT() {}");
    }

    #[test]
    fn missing_fields_deserialize_with_defaults() {
        let q: ExpandedQuery = serde_json::from_str(r#"{"expanded_text":"x"}"#).unwrap();
        assert_eq!(q.intent, "general");
        assert!(q.hypothetical_snippet.is_none());
    }
}
