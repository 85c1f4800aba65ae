//! Re-rank collaborator.

use anyhow::Result;
use async_trait::async_trait;

/// A `(chunk_id, content)` pair sent for re-scoring.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk_id: String,
    pub content: String,
}

/// Opaque cross-encoder: `rerank(query, candidates) -> [(chunk_id, score)]`.
///
/// Candidates missing from the response keep their original score.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate])
        -> Result<Vec<(String, f64)>>;
}
