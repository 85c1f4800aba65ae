//! Query expansion over an OpenAI-compatible `chat/completions` endpoint.
//!
//! Works against a local Ollama (`http://localhost:11434/v1`) or the
//! OpenAI API. The model is asked for a JSON object
//! `{expanded, keywords, intent, hypotheticalCode}`; missing fields fall
//! back to the raw query. Transport or parse failures surface as errors and
//! the retriever degrades to [`ExpandedQuery::fallback`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use code_harness_core::expansion::{ExpandedQuery, QueryExpander};

use crate::config::ExpansionConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub fn create_expander(config: &ExpansionConfig) -> Result<Option<Arc<dyn QueryExpander>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "ollama" => Ok(Some(Arc::new(ChatExpander::new(config, None)?))),
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Some(Arc::new(ChatExpander::new(config, Some(key))?)))
        }
        other => bail!("Unknown expansion provider: {}", other),
    }
}

pub struct ChatExpander {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ChatExpander {
    pub fn new(config: &ExpansionConfig, api_key: Option<String>) -> Result<Self> {
        let base = if config.provider == "openai" && config.url.contains("localhost:11434") {
            OPENAI_BASE_URL.to_string()
        } else {
            config.url.trim_end_matches('/').to_string()
        };
        Ok(Self {
            endpoint: format!("{}/chat/completions", base),
            model: config.model.clone(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

fn prompt(query: &str) -> String {
    format!(
        "Act as a retrieval optimizer for a codebase index holding source code, PDFs and Markdown. \
         Convert the request into JSON.\n\n\
         Request: \"{}\"\n\n\
         Output JSON with fields:\n\
         - expanded: a dense technical description of the implementation logic or documented concept.\n\
         - keywords: technical identifiers, library names or compliance terms.\n\
         - intent: one of definition, usage, configuration, compliance, logic flow.\n\
         - hypotheticalCode: a snippet of the target code or a likely documentation section header.",
        query
    )
}

#[derive(Debug, Deserialize, Default)]
struct ExpansionPayload {
    #[serde(default)]
    expanded: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default, rename = "hypotheticalCode")]
    hypothetical_code: Option<String>,
}

/// Pull `choices[0].message.content` out of a chat completion and decode it.
fn parse_completion(query: &str, json: &serde_json::Value) -> Result<ExpandedQuery> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))?;
    let payload: ExpansionPayload =
        serde_json::from_str(content.trim()).context("expansion content is not valid JSON")?;

    let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
    Ok(ExpandedQuery {
        expanded_text: non_empty(payload.expanded).unwrap_or_else(|| query.to_string()),
        keywords: payload
            .keywords
            .into_iter()
            .filter(|k| !k.trim().is_empty())
            .collect(),
        intent: non_empty(payload.intent).unwrap_or_else(|| "general".to_string()),
        hypothetical_snippet: non_empty(payload.hypothetical_code),
    })
}

#[async_trait]
impl QueryExpander for ChatExpander {
    async fn expand(&self, query: &str) -> Result<ExpandedQuery> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt(query) }],
            "response_format": { "type": "json_object" },
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("expansion endpoint unreachable: {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Expansion API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_completion(query, &json)
    }
}
