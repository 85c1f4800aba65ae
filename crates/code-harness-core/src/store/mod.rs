//! Chunk storage abstraction.
//!
//! The [`ChunkStore`] trait is the single shared mutable resource of the
//! system: the primary chunk set, a dense vector index, and a lexical
//! index, kept consistent with each other at every observable point.
//!
//! Implementations must be `Send + Sync` and must make
//! [`upsert`](ChunkStore::upsert) atomic per `(repo_id, path)`: a reader sees
//! either the complete old set or the complete new set, never a mix and
//! never an empty window.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{AccessGroup, Chunk};

/// Restricts search to a set of repositories and access groups.
///
/// `None` means "no restriction" on that axis.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub repo_ids: Option<Vec<String>>,
    pub access_groups: Option<Vec<AccessGroup>>,
}

impl SearchFilter {
    pub fn repos(repo_ids: Vec<String>) -> Self {
        Self {
            repo_ids: Some(repo_ids),
            access_groups: None,
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.repo_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == &chunk.repo_id))
            && self
                .access_groups
                .as_ref()
                .map_or(true, |groups| groups.contains(&chunk.access_group))
    }
}

/// A chunk with the raw score of the index that produced it.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity (dense) or BM25 (lexical).
    pub score: f64,
}

/// Per-repository counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepoStats {
    pub file_count: u64,
    pub chunk_count: u64,
}

/// A previously stored embedding, keyed by chunk id.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub content_hash: String,
    pub vector: Vec<f32>,
}

/// Abstract chunk store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](ChunkStore::upsert) | Atomically replace all chunks of one file |
/// | [`delete_path`](ChunkStore::delete_path) | Remove one file's chunks |
/// | [`delete_repo`](ChunkStore::delete_repo) | Remove a whole repository |
/// | [`search_dense`](ChunkStore::search_dense) | Cosine nearest neighbours |
/// | [`search_lexical`](ChunkStore::search_lexical) | BM25 over lexical terms |
/// | [`verify`](ChunkStore::verify) | Cross-check primary and index tables |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace every chunk of `(repo_id, path)` with `chunks` and record
    /// `file_hash` as the content last indexed for that path.
    async fn upsert(&self, repo_id: &str, path: &str, file_hash: &str, chunks: Vec<Chunk>)
        -> Result<()>;

    /// Remove every chunk of `(repo_id, path)`. Returns whether the path was known.
    async fn delete_path(&self, repo_id: &str, path: &str) -> Result<bool>;

    /// Remove every chunk and file record owned by `repo_id`.
    async fn delete_repo(&self, repo_id: &str) -> Result<()>;

    /// Hash of the file content last indexed at `(repo_id, path)`.
    async fn file_hash(&self, repo_id: &str, path: &str) -> Result<Option<String>>;

    /// Stored vectors for the chunks currently at `(repo_id, path)`.
    async fn existing_vectors(&self, repo_id: &str, path: &str)
        -> Result<HashMap<String, StoredVector>>;

    /// Every path with a file record in `repo_id`, sorted.
    async fn list_paths(&self, repo_id: &str) -> Result<Vec<String>>;

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Top-`k` chunks by cosine similarity to `vector`, best first.
    async fn search_dense(&self, vector: &[f32], k: usize, filter: &SearchFilter)
        -> Result<Vec<ScoredChunk>>;

    /// Top-`k` chunks by BM25 over `terms`, best first.
    async fn search_lexical(&self, terms: &[String], k: usize, filter: &SearchFilter)
        -> Result<Vec<ScoredChunk>>;

    async fn stats(&self, repo_id: &str) -> Result<RepoStats>;

    /// Consistency problems found for `repo_id`; empty when healthy.
    async fn verify(&self, repo_id: &str) -> Result<Vec<String>>;
}

/// Sort best-first with `chunk_id` ascending as the tie-break, then keep `k`.
pub fn rank_and_truncate(results: &mut Vec<ScoredChunk>, k: usize) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(k);
}
