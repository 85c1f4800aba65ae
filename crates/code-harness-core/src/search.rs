//! Hybrid retrieval over a [`ChunkStore`].
//!
//! The algorithm works only through the store trait and the collaborator
//! traits; the application supplies concrete providers and records the
//! audit trail from the returned [`SearchOutcome`].
//!
//! # Pipeline
//!
//! 1. Expand the query (fallback: raw text, `intent = "general"`).
//! 2. Embed the expanded text; on failure continue lexical-only.
//! 3. Fetch `candidate_k` dense candidates and, when hybrid, `candidate_k`
//!    lexical candidates, both scoped to the repository filter.
//! 4. Merge with the configured [`MergeStrategy`]. Chunks found by both
//!    sources become `HYBRID`.
//! 5. Drop chunks the principal's role may not see, reporting each drop.
//! 6. Optionally re-rank the survivors (failure keeps the merged scores).
//! 7. Sort by score descending, then `chunk_id` ascending, and truncate.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::access::is_visible;
use crate::embedding::Embedder;
use crate::expansion::{ExpandedQuery, QueryExpander};
use crate::lexical;
use crate::models::{AccessPrincipal, Chunk, MatchType, SearchResult};
use crate::rerank::{RerankCandidate, Reranker};
use crate::store::{ChunkStore, ScoredChunk, SearchFilter};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Candidates fetched from each index.
    pub candidate_k: usize,
    /// Maximum results returned.
    pub final_limit: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            candidate_k: 80,
            final_limit: 12,
        }
    }
}

/// Per-request switches.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub use_hybrid: bool,
    pub use_rerank: bool,
    /// Overrides [`SearchParams::final_limit`] when set.
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_hybrid: true,
            use_rerank: false,
            limit: None,
        }
    }
}

/// Inputs for one search call.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Repository ids to search; `None` searches every repository.
    pub repo_filter: Option<Vec<String>>,
    pub principal: &'a AccessPrincipal,
    pub options: SearchOptions,
}

/// A merged candidate prior to access filtering.
#[derive(Debug, Clone)]
pub struct MergedHit {
    pub chunk: Chunk,
    pub score: f64,
    pub match_type: MatchType,
}

/// Pluggable dense + lexical fusion.
pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn merge(&self, dense: &[ScoredChunk], lexical: &[ScoredChunk]) -> Vec<MergedHit>;
}

/// Reciprocal Rank Fusion: `score = Σ 1 / (k + rank)` over the sources a
/// chunk appears in, with 1-based ranks.
#[derive(Debug, Clone)]
pub struct ReciprocalRankFusion {
    pub k: f64,
}

impl Default for ReciprocalRankFusion {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

impl MergeStrategy for ReciprocalRankFusion {
    fn name(&self) -> &'static str {
        "rrf"
    }

    fn merge(&self, dense: &[ScoredChunk], lexical: &[ScoredChunk]) -> Vec<MergedHit> {
        let mut merged: HashMap<&str, MergedHit> = HashMap::new();
        for (source, list) in [(MatchType::Dense, dense), (MatchType::Lexical, lexical)] {
            for (rank, hit) in list.iter().enumerate() {
                let contribution = 1.0 / (self.k + rank as f64 + 1.0);
                merged
                    .entry(hit.chunk.id.as_str())
                    .and_modify(|m| {
                        m.score += contribution;
                        m.match_type = MatchType::Hybrid;
                    })
                    .or_insert_with(|| MergedHit {
                        chunk: hit.chunk.clone(),
                        score: contribution,
                        match_type: source,
                    });
            }
        }
        merged.into_values().collect()
    }
}

/// Min-max normalized weighted sum:
/// `hybrid = (1 - α) × lexical + α × dense` for chunks in both sources;
/// single-source chunks keep their own normalized score.
#[derive(Debug, Clone)]
pub struct WeightedSum {
    pub alpha: f64,
}

impl MergeStrategy for WeightedSum {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn merge(&self, dense: &[ScoredChunk], lexical: &[ScoredChunk]) -> Vec<MergedHit> {
        let norm_dense = normalize_scores(dense);
        let norm_lexical = normalize_scores(lexical);
        let lex_map: HashMap<&str, f64> = norm_lexical
            .iter()
            .map(|(c, s)| (c.chunk.id.as_str(), *s))
            .collect();

        let mut merged: HashMap<&str, MergedHit> = HashMap::new();
        for (c, v) in &norm_dense {
            let hit = match lex_map.get(c.chunk.id.as_str()) {
                Some(k) => MergedHit {
                    chunk: c.chunk.clone(),
                    score: (1.0 - self.alpha) * k + self.alpha * v,
                    match_type: MatchType::Hybrid,
                },
                None => MergedHit {
                    chunk: c.chunk.clone(),
                    score: *v,
                    match_type: MatchType::Dense,
                },
            };
            merged.insert(c.chunk.id.as_str(), hit);
        }
        for (c, k) in &norm_lexical {
            merged.entry(c.chunk.id.as_str()).or_insert_with(|| MergedHit {
                chunk: c.chunk.clone(),
                score: *k,
                match_type: MatchType::Lexical,
            });
        }
        merged.into_values().collect()
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ScoredChunk]) -> Vec<(&ScoredChunk, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// What a search produced, including what the caller must audit.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// Chunks removed by the access filter.
    pub denied: Vec<Chunk>,
    pub expanded: ExpandedQuery,
    /// Collaborators that failed or were absent during this call.
    pub degraded: Vec<&'static str>,
}

/// Retrieval engine: collaborators plus the merge strategy.
#[derive(Clone)]
pub struct Retriever {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub expander: Option<Arc<dyn QueryExpander>>,
    pub reranker: Option<Arc<dyn Reranker>>,
    pub merge: Arc<dyn MergeStrategy>,
    pub params: SearchParams,
}

impl Retriever {
    pub fn new(params: SearchParams) -> Self {
        Self {
            embedder: None,
            expander: None,
            reranker: None,
            merge: Arc::new(ReciprocalRankFusion::default()),
            params,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_merge(mut self, merge: Arc<dyn MergeStrategy>) -> Self {
        self.merge = merge;
        self
    }

    async fn expand(&self, query: &str, degraded: &mut Vec<&'static str>) -> ExpandedQuery {
        let Some(expander) = &self.expander else {
            return ExpandedQuery::fallback(query);
        };
        match expander.expand(query).await {
            Ok(expanded) if !expanded.expanded_text.trim().is_empty() => expanded,
            Ok(_) => ExpandedQuery::fallback(query),
            Err(e) => {
                warn!(error = %e, "query expansion unavailable, using raw query");
                degraded.push("expansion");
                ExpandedQuery::fallback(query)
            }
        }
    }

    async fn embed(&self, text: &str, degraded: &mut Vec<&'static str>) -> Option<Vec<f32>> {
        let Some(embedder) = &self.embedder else {
            degraded.push("embedding");
            return None;
        };
        match embedder.embed(&[text.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() && !vectors[0].is_empty() => {
                Some(vectors.swap_remove(0))
            }
            Ok(_) => {
                warn!("embedder returned no vector, continuing lexical-only");
                degraded.push("embedding");
                None
            }
            Err(e) => {
                warn!(error = %e, "embedding unavailable, continuing lexical-only");
                degraded.push("embedding");
                None
            }
        }
    }

    /// Run one search. Only store failures propagate; collaborator failures
    /// degrade the result.
    pub async fn search<S: ChunkStore + ?Sized>(
        &self,
        store: &S,
        req: &SearchRequest<'_>,
    ) -> Result<SearchOutcome> {
        let mut degraded = Vec::new();
        let query = req.query.trim();
        if query.is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                denied: Vec::new(),
                expanded: ExpandedQuery::fallback(query),
                degraded,
            });
        }

        let expanded = self.expand(query, &mut degraded).await;
        let query_vec = self.embed(&expanded.dense_text(), &mut degraded).await;

        let mut terms = lexical::query_terms(query);
        for keyword in &expanded.keywords {
            for term in lexical::query_terms(keyword) {
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }

        let filter = SearchFilter {
            repo_ids: req.repo_filter.clone(),
            access_groups: None,
        };
        let k = self.params.candidate_k.max(1);

        let dense = match &query_vec {
            Some(v) => store.search_dense(v, k, &filter).await?,
            None => Vec::new(),
        };
        // Without a query vector, lexical search is the best-effort fallback.
        let run_lexical = req.options.use_hybrid || query_vec.is_none();
        let lexical_hits = if run_lexical {
            store.search_lexical(&terms, k, &filter).await?
        } else {
            Vec::new()
        };
        debug!(
            dense = dense.len(),
            lexical = lexical_hits.len(),
            strategy = self.merge.name(),
            "retrieved candidates"
        );

        let merged = if req.options.use_hybrid && query_vec.is_some() {
            self.merge.merge(&dense, &lexical_hits)
        } else if query_vec.is_some() {
            single_source(dense, MatchType::Dense)
        } else {
            single_source(lexical_hits, MatchType::Lexical)
        };

        let role = req.principal.role;
        let (mut visible, denied): (Vec<MergedHit>, Vec<MergedHit>) = merged
            .into_iter()
            .partition(|hit| is_visible(role, hit.chunk.access_group));
        if !denied.is_empty() {
            debug!(role = %role, dropped = denied.len(), "access filter removed chunks");
        }

        if req.options.use_rerank && !visible.is_empty() {
            self.rerank(query, &mut visible, &mut degraded).await;
        }

        // Reranker scores and merged scores are not comparable: candidates
        // the reranker left unscored go after every scored one.
        visible.sort_by(|a, b| {
            let a_ranked = a.match_type == MatchType::Reranked;
            let b_ranked = b.match_type == MatchType::Reranked;
            b_ranked
                .cmp(&a_ranked)
                .then_with(|| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        let limit = req.options.limit.unwrap_or(self.params.final_limit);
        visible.truncate(limit);

        Ok(SearchOutcome {
            results: visible
                .into_iter()
                .map(|hit| SearchResult {
                    chunk_id: hit.chunk.id.clone(),
                    score: hit.score,
                    match_type: hit.match_type,
                    chunk: hit.chunk,
                })
                .collect(),
            denied: denied.into_iter().map(|hit| hit.chunk).collect(),
            expanded,
            degraded,
        })
    }

    async fn rerank(
        &self,
        query: &str,
        hits: &mut [MergedHit],
        degraded: &mut Vec<&'static str>,
    ) {
        let Some(reranker) = &self.reranker else {
            degraded.push("rerank");
            return;
        };
        let candidates: Vec<RerankCandidate> = hits
            .iter()
            .map(|h| RerankCandidate {
                chunk_id: h.chunk.id.clone(),
                content: h.chunk.content.clone(),
            })
            .collect();
        match reranker.rerank(query, &candidates).await {
            Ok(scores) => {
                let scores: HashMap<String, f64> = scores.into_iter().collect();
                for hit in hits.iter_mut() {
                    if let Some(score) = scores.get(&hit.chunk.id) {
                        hit.score = *score;
                        hit.match_type = MatchType::Reranked;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "rerank unavailable, keeping merged scores");
                degraded.push("rerank");
            }
        }
    }
}

fn single_source(hits: Vec<ScoredChunk>, match_type: MatchType) -> Vec<MergedHit> {
    hits.into_iter()
        .map(|h| MergedHit {
            chunk: h.chunk,
            score: h.score,
            match_type,
        })
        .collect()
}
