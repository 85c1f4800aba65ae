//! Cross-encoder re-ranking over HTTP.
//!
//! Posts `{model, query, documents}` to the configured URL. Accepts the two
//! common response shapes: `{"results": [{"index", "relevance_score"}]}`
//! and a bare `[{"index", "score"}]` array.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use code_harness_core::rerank::{RerankCandidate, Reranker};

use crate::config::RerankConfig;

pub fn create_reranker(config: &RerankConfig) -> Result<Option<Arc<dyn Reranker>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "http" => Ok(Some(Arc::new(HttpReranker::new(config)?))),
        other => bail!("Unknown rerank provider: {}", other),
    }
}

pub struct HttpReranker {
    url: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("rerank.url required for http provider"))?;
        Ok(Self {
            url,
            model: config.model.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

fn parse_scores(json: &serde_json::Value, candidates: &[RerankCandidate]) -> Result<Vec<(String, f64)>> {
    let items = json
        .get("results")
        .and_then(|r| r.as_array())
        .or_else(|| json.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: expected a results array"))?;

    let mut scores = Vec::with_capacity(items.len());
    for item in items {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing index"))?
            as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing score"))?;
        // Out-of-range indexes are ignored; those candidates keep their score.
        if let Some(candidate) = candidates.get(index) {
            scores.push((candidate.chunk_id.clone(), score));
        }
    }
    Ok(scores)
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<(String, f64)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let documents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        let mut body = serde_json::json!({
            "query": query,
            "documents": documents,
        });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("rerank endpoint unreachable: {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Rerank API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_scores(&json, candidates)
    }
}
