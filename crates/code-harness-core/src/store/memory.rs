//! In-memory [`ChunkStore`] for tests and embedding in other hosts.
//!
//! All state (primary chunks, file records, the BM25 postings) sits behind
//! one `parking_lot::RwLock`, so an upsert swaps a file's chunks in a single
//! write section and every search runs against one consistent snapshot.
//! Dense search is brute-force cosine similarity.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::embedding::cosine_similarity;
use crate::lexical;
use crate::models::Chunk;

use super::{rank_and_truncate, ChunkStore, RepoStats, ScoredChunk, SearchFilter, StoredVector};

/// BM25 term-frequency saturation.
const BM25_K1: f64 = 1.2;
/// BM25 length normalization.
const BM25_B: f64 = 0.75;

struct FileEntry {
    hash: String,
    chunk_ids: Vec<String>,
}

#[derive(Default)]
struct LexicalIndex {
    /// term → chunk id → term frequency
    postings: HashMap<String, HashMap<String, u32>>,
    /// chunk id → (document length, distinct terms)
    docs: HashMap<String, (u32, Vec<String>)>,
    total_len: u64,
}

impl LexicalIndex {
    fn insert(&mut self, chunk: &Chunk) {
        let terms = lexical::tokenize(&chunk.lexical_text());
        let mut tf: BTreeMap<String, u32> = BTreeMap::new();
        for t in &terms {
            *tf.entry(t.clone()).or_insert(0) += 1;
        }
        for (term, count) in &tf {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(chunk.id.clone(), *count);
        }
        self.total_len += terms.len() as u64;
        self.docs
            .insert(chunk.id.clone(), (terms.len() as u32, tf.into_keys().collect()));
    }

    fn remove(&mut self, chunk_id: &str) {
        let Some((len, terms)) = self.docs.remove(chunk_id) else {
            return;
        };
        self.total_len -= len as u64;
        for term in terms {
            if let Some(list) = self.postings.get_mut(&term) {
                list.remove(chunk_id);
                if list.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    fn score(&self, terms: &[String]) -> HashMap<&str, f64> {
        let n = self.docs.len() as f64;
        let mut scores: HashMap<&str, f64> = HashMap::new();
        if n == 0.0 {
            return scores;
        }
        let avgdl = (self.total_len as f64 / n).max(1.0);
        for term in terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let df = list.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for (chunk_id, &tf) in list {
                let dl = self.docs.get(chunk_id).map(|(l, _)| *l).unwrap_or(0) as f64;
                let tf = tf as f64;
                let s = idf * tf * (BM25_K1 + 1.0)
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl));
                *scores.entry(chunk_id.as_str()).or_insert(0.0) += s;
            }
        }
        scores
    }
}

#[derive(Default)]
struct State {
    chunks: HashMap<String, Chunk>,
    files: HashMap<(String, String), FileEntry>,
    lexical: LexicalIndex,
}

impl State {
    fn remove_file(&mut self, repo_id: &str, path: &str) -> bool {
        let Some(entry) = self.files.remove(&(repo_id.to_string(), path.to_string())) else {
            return false;
        };
        for id in entry.chunk_ids {
            self.chunks.remove(&id);
            self.lexical.remove(&id);
        }
        true
    }
}

/// In-memory chunk store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn upsert(
        &self,
        repo_id: &str,
        path: &str,
        file_hash: &str,
        chunks: Vec<Chunk>,
    ) -> Result<()> {
        let mut state = self.state.write();
        state.remove_file(repo_id, path);
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            state.lexical.insert(&chunk);
            chunk_ids.push(chunk.id.clone());
            state.chunks.insert(chunk.id.clone(), chunk);
        }
        state.files.insert(
            (repo_id.to_string(), path.to_string()),
            FileEntry {
                hash: file_hash.to_string(),
                chunk_ids,
            },
        );
        Ok(())
    }

    async fn delete_path(&self, repo_id: &str, path: &str) -> Result<bool> {
        Ok(self.state.write().remove_file(repo_id, path))
    }

    async fn delete_repo(&self, repo_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let paths: Vec<String> = state
            .files
            .keys()
            .filter(|(r, _)| r == repo_id)
            .map(|(_, p)| p.clone())
            .collect();
        for path in paths {
            state.remove_file(repo_id, &path);
        }
        Ok(())
    }

    async fn file_hash(&self, repo_id: &str, path: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .files
            .get(&(repo_id.to_string(), path.to_string()))
            .map(|f| f.hash.clone()))
    }

    async fn existing_vectors(
        &self,
        repo_id: &str,
        path: &str,
    ) -> Result<HashMap<String, StoredVector>> {
        let state = self.state.read();
        let Some(entry) = state.files.get(&(repo_id.to_string(), path.to_string())) else {
            return Ok(HashMap::new());
        };
        Ok(entry
            .chunk_ids
            .iter()
            .filter_map(|id| state.chunks.get(id))
            .filter(|c| !c.dense_vector.is_empty())
            .map(|c| {
                (
                    c.id.clone(),
                    StoredVector {
                        content_hash: c.content_hash.clone(),
                        vector: c.dense_vector.clone(),
                    },
                )
            })
            .collect())
    }

    async fn list_paths(&self, repo_id: &str) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .state
            .read()
            .files
            .keys()
            .filter(|(r, _)| r == repo_id)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        Ok(self.state.read().chunks.get(chunk_id).cloned())
    }

    async fn search_dense(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read();
        let mut results: Vec<ScoredChunk> = state
            .chunks
            .values()
            .filter(|c| !c.dense_vector.is_empty() && filter.matches(c))
            .map(|c| ScoredChunk {
                score: cosine_similarity(vector, &c.dense_vector) as f64,
                chunk: c.clone(),
            })
            .filter(|s| s.score > 0.0)
            .collect();
        rank_and_truncate(&mut results, k);
        Ok(results)
    }

    async fn search_lexical(
        &self,
        terms: &[String],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read();
        let mut results: Vec<ScoredChunk> = state
            .lexical
            .score(terms)
            .into_iter()
            .filter_map(|(id, score)| state.chunks.get(id).map(|c| (c, score)))
            .filter(|(c, _)| filter.matches(c))
            .map(|(c, score)| ScoredChunk {
                chunk: c.clone(),
                score,
            })
            .collect();
        rank_and_truncate(&mut results, k);
        Ok(results)
    }

    async fn stats(&self, repo_id: &str) -> Result<RepoStats> {
        let state = self.state.read();
        let mut stats = RepoStats::default();
        for ((r, _), entry) in &state.files {
            if r == repo_id {
                stats.file_count += 1;
                stats.chunk_count += entry.chunk_ids.len() as u64;
            }
        }
        Ok(stats)
    }

    async fn verify(&self, repo_id: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut problems = Vec::new();
        let mut owned = 0usize;
        for ((r, path), entry) in &state.files {
            if r != repo_id {
                continue;
            }
            for id in &entry.chunk_ids {
                owned += 1;
                match state.chunks.get(id) {
                    None => problems.push(format!("{}: chunk {} missing from primary set", path, id)),
                    Some(c) if &c.source_path != path => {
                        problems.push(format!("chunk {} owned by {} but records {}", id, path, c.source_path))
                    }
                    Some(_) => {}
                }
                if !state.lexical.docs.contains_key(id) {
                    problems.push(format!("{}: chunk {} missing from lexical index", path, id));
                }
            }
        }
        let primary = state.chunks.values().filter(|c| c.repo_id == repo_id).count();
        if primary != owned {
            problems.push(format!(
                "{} chunks in primary set but {} owned by file records",
                primary, owned
            ));
        }
        Ok(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessGroup, ChunkKind, Span};

    fn chunk(id: &str, path: &str, content: &str, group: AccessGroup, vector: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            repo_id: "proj".to_string(),
            source_path: path.to_string(),
            kind: ChunkKind::Function,
            span: Span::Lines {
                start_line: 1,
                end_line: 2,
            },
            symbol: None,
            language: None,
            content: content.to_string(),
            content_hash: format!("h-{}", id),
            access_group: group,
            dense_vector: vector,
        }
    }

    fn terms(q: &str) -> Vec<String> {
        lexical::query_terms(q)
    }

    #[tokio::test]
    async fn upsert_replaces_previous_chunks() {
        let store = InMemoryStore::new();
        store
            .upsert("proj", "a.go", "h1", vec![chunk("c1", "a.go", "old body", AccessGroup::Public, vec![])])
            .await
            .unwrap();
        store
            .upsert(
                "proj",
                "a.go",
                "h2",
                vec![
                    chunk("c2", "a.go", "new body", AccessGroup::Public, vec![]),
                    chunk("c3", "a.go", "another", AccessGroup::Public, vec![]),
                ],
            )
            .await
            .unwrap();
        assert!(store.get("c1").await.unwrap().is_none());
        assert_eq!(store.stats("proj").await.unwrap().chunk_count, 2);
        assert_eq!(store.file_hash("proj", "a.go").await.unwrap().as_deref(), Some("h2"));
        assert!(store.search_lexical(&terms("old"), 10, &SearchFilter::default()).await.unwrap().is_empty());
        assert!(store.verify("proj").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lexical_ranks_by_bm25() {
        let store = InMemoryStore::new();
        store
            .upsert(
                "proj",
                "a.go",
                "h",
                vec![
                    chunk("c1", "a.go", "token token token validation", AccessGroup::Public, vec![]),
                    chunk("c2", "a.go", "token rendering charts and many other words here", AccessGroup::Public, vec![]),
                    chunk("c3", "a.go", "nothing relevant", AccessGroup::Public, vec![]),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search_lexical(&terms("token"), 10, &SearchFilter::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn dense_respects_filter_and_k() {
        let store = InMemoryStore::new();
        store
            .upsert(
                "proj",
                "a.go",
                "h",
                vec![
                    chunk("c1", "a.go", "x", AccessGroup::Public, vec![1.0, 0.0]),
                    chunk("c2", "a.go", "y", AccessGroup::Restricted, vec![0.9, 0.1]),
                    chunk("c3", "a.go", "z", AccessGroup::Public, vec![0.5, 0.5]),
                ],
            )
            .await
            .unwrap();
        let filter = SearchFilter {
            repo_ids: Some(vec!["proj".to_string()]),
            access_groups: Some(vec![AccessGroup::Public]),
        };
        let hits = store.search_dense(&[1.0, 0.0], 1, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "c1");

        let other = SearchFilter::repos(vec!["elsewhere".to_string()]);
        assert!(store.search_dense(&[1.0, 0.0], 5, &other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_path_and_repo() {
        let store = InMemoryStore::new();
        store.upsert("proj", "a.go", "h", vec![chunk("c1", "a.go", "alpha", AccessGroup::Public, vec![])]).await.unwrap();
        store.upsert("proj", "b.go", "h", vec![chunk("c2", "b.go", "beta", AccessGroup::Public, vec![])]).await.unwrap();
        assert!(store.delete_path("proj", "a.go").await.unwrap());
        assert!(!store.delete_path("proj", "a.go").await.unwrap());
        assert_eq!(store.list_paths("proj").await.unwrap(), vec!["b.go".to_string()]);
        store.delete_repo("proj").await.unwrap();
        assert_eq!(store.stats("proj").await.unwrap(), RepoStats::default());
        assert!(store.search_lexical(&terms("beta"), 10, &SearchFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_vectors_only_for_embedded_chunks() {
        let store = InMemoryStore::new();
        store
            .upsert(
                "proj",
                "a.go",
                "h",
                vec![
                    chunk("c1", "a.go", "x", AccessGroup::Public, vec![0.1, 0.2]),
                    chunk("c2", "a.go", "y", AccessGroup::Public, vec![]),
                ],
            )
            .await
            .unwrap();
        let vectors = store.existing_vectors("proj", "a.go").await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors["c1"].content_hash, "h-c1");
    }

    #[tokio::test]
    async fn concurrent_readers_never_see_partial_upsert() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let set = |gen: usize| -> Vec<Chunk> {
            (0..4)
                .map(|i| chunk(&format!("g{}-{}", gen, i), "a.go", &format!("shared gen{}", gen), AccessGroup::Public, vec![]))
                .collect()
        };
        store.upsert("proj", "a.go", "h0", set(0)).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for gen in 1..200 {
                    store.upsert("proj", "a.go", &format!("h{}", gen), set(gen)).await.unwrap();
                }
            })
        };
        for _ in 0..200 {
            let hits = store
                .search_lexical(&terms("shared"), 100, &SearchFilter::default())
                .await
                .unwrap();
            assert_eq!(hits.len(), 4, "observed a partial chunk set");
            let prefix = hits[0].chunk.id.split('-').next().unwrap().to_string();
            assert!(hits.iter().all(|h| h.chunk.id.starts_with(&format!("{}-", prefix))));
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
