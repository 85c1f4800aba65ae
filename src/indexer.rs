//! Indexing pipeline.
//!
//! Turns one repository-relative path into chunk store mutations:
//!
//! ```text
//! ignored? ─yes─▶ SKIP
//!    │no
//! exists? ─no──▶ Delete(repo, path)
//!    │yes
//! hash == stored? ─yes─▶ no-op
//!    │no
//! parse ─▶ classify access ─▶ embed (reusing stored vectors) ─▶ Upsert
//! ```
//!
//! Concurrency: a shared semaphore bounds how many files are processed at
//! once, and a per-path mutex keeps at most one parse of a given path in
//! flight. The permit is always taken before the path lock, so a path lock
//! holder can always make progress.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use code_harness_core::access::AccessClassifier;
use code_harness_core::chunk::{self, FileCategory, Parser};
use code_harness_core::embedding::Embedder;
use code_harness_core::error::{HarnessError, Result};
use code_harness_core::events::IndexEventLog;
use code_harness_core::ignore::IgnoreMatcher;
use code_harness_core::models::{Chunk, IndexEvent, IndexEventKind, Repository};
use code_harness_core::store::ChunkStore;

use crate::progress::ReindexProgress;

/// Compiled per-repository policy used by the pipeline and the watcher.
#[derive(Debug, Clone)]
pub struct RepoContext {
    pub repo_id: String,
    pub root: PathBuf,
    ignore: IgnoreMatcher,
    classifier: AccessClassifier,
}

impl RepoContext {
    pub fn from_repository(repo: &Repository) -> Result<Self> {
        Ok(Self {
            repo_id: repo.id.clone(),
            root: repo.root_path.clone(),
            ignore: IgnoreMatcher::new(&repo.ignore_patterns)?,
            classifier: AccessClassifier::new(&repo.access_rules, repo.default_access)?,
        })
    }

    pub fn is_ignored(&self, rel_path: &str) -> bool {
        self.ignore.is_ignored(rel_path)
    }

    /// Repository-relative `/`-separated path for an absolute path under
    /// the root, or `None` for the root itself and paths outside it.
    pub fn relative(&self, abs: &Path) -> Option<String> {
        let rel = abs.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}

/// What happened to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { chunks: usize },
    Unchanged,
    Deleted,
    Skipped(String),
    /// The path does not exist and was never indexed.
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReindexSummary {
    pub total: u64,
    pub indexed: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: bool,
}

impl ReindexSummary {
    fn record(&mut self, outcome: &Result<FileOutcome>) {
        match outcome {
            Ok(FileOutcome::Indexed { .. }) => self.indexed += 1,
            Ok(FileOutcome::Unchanged) => self.unchanged += 1,
            Ok(FileOutcome::Deleted) => self.deleted += 1,
            Ok(FileOutcome::Skipped(_)) | Ok(FileOutcome::Missing) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Receives reindex progress; implemented by the engine to persist it.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_progress(&self, progress: &ReindexProgress);
}

pub struct NoopObserver;

#[async_trait]
impl ProgressObserver for NoopObserver {
    async fn on_progress(&self, _progress: &ReindexProgress) {}
}

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub workers: usize,
    pub max_file_bytes: u64,
    pub max_tokens: usize,
    pub embed_batch: usize,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_file_bytes: 2 * 1024 * 1024,
            max_tokens: 700,
            embed_batch: 64,
        }
    }
}

pub struct Indexer {
    store: Arc<dyn ChunkStore>,
    parser: Parser,
    embedder: Option<Arc<dyn Embedder>>,
    events: Arc<IndexEventLog>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    path_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    max_file_bytes: u64,
    embed_batch: usize,
    parses: AtomicU64,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Option<Arc<dyn Embedder>>,
        events: Arc<IndexEventLog>,
        settings: IndexerSettings,
    ) -> Self {
        let worker_count = settings.workers.max(1);
        Self {
            store,
            parser: Parser::new(settings.max_tokens),
            embedder,
            events,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            path_locks: parking_lot::Mutex::new(HashMap::new()),
            max_file_bytes: settings.max_file_bytes,
            embed_batch: settings.embed_batch.max(1),
            parses: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<IndexEventLog> {
        &self.events
    }

    /// Number of parser invocations since startup.
    pub fn parse_count(&self) -> u64 {
        self.parses.load(Ordering::Relaxed)
    }

    fn record(&self, ctx: &RepoContext, rel: &str, kind: IndexEventKind, detail: impl Into<String>) {
        self.events.push(IndexEvent::new(&ctx.repo_id, rel, kind, detail));
    }

    /// Bring the store in line with the current on-disk state of `rel`.
    pub async fn process_path(&self, ctx: &RepoContext, rel: &str) -> Result<FileOutcome> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| HarnessError::Store(anyhow!(e)))?;

        let key = format!("{}\0{}", ctx.repo_id, rel);
        let lock = {
            let mut locks = self.path_locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let outcome = {
            let _guard = lock.lock().await;
            self.process_inner(ctx, rel).await
        };
        {
            let mut locks = self.path_locks.lock();
            // Only the map and this call hold it: nobody is queued behind us.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&key);
            }
        }
        outcome
    }

    async fn process_inner(&self, ctx: &RepoContext, rel: &str) -> Result<FileOutcome> {
        if ctx.is_ignored(rel) {
            self.record(ctx, rel, IndexEventKind::Skip, "matches ignore pattern");
            return Ok(FileOutcome::Skipped("ignored".to_string()));
        }

        let abs = ctx.root.join(rel);
        let meta = match tokio::fs::metadata(&abs).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.remove(ctx, rel).await;
            }
            Err(e) => {
                tracing::warn!(repo_id = %ctx.repo_id, path = rel, error = %e, "cannot stat file");
                self.record(ctx, rel, IndexEventKind::Skip, format!("unreadable: {}", e));
                return Ok(FileOutcome::Skipped(e.to_string()));
            }
        };
        if !meta.is_file() {
            return Ok(FileOutcome::Skipped("not a regular file".to_string()));
        }
        if meta.len() > self.max_file_bytes {
            self.record(
                ctx,
                rel,
                IndexEventKind::Skip,
                format!("{} bytes exceeds max_file_bytes", meta.len()),
            );
            return Ok(FileOutcome::Skipped("too large".to_string()));
        }

        let bytes = match tokio::fs::read(&abs).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.remove(ctx, rel).await;
            }
            Err(e) => {
                tracing::warn!(repo_id = %ctx.repo_id, path = rel, error = %e, "cannot read file");
                self.record(ctx, rel, IndexEventKind::Skip, format!("unreadable: {}", e));
                return Ok(FileOutcome::Skipped(e.to_string()));
            }
        };

        let file_hash = chunk::content_hash(&bytes);
        let previous = self.store.file_hash(&ctx.repo_id, rel).await?;
        if previous.as_deref() == Some(file_hash.as_str()) {
            tracing::debug!(repo_id = %ctx.repo_id, path = rel, "unchanged");
            return Ok(FileOutcome::Unchanged);
        }

        let Some(category) = chunk::detect(rel, &bytes) else {
            self.record(ctx, rel, IndexEventKind::Skip, "unsupported file type");
            if previous.is_some() {
                self.store.delete_path(&ctx.repo_id, rel).await?;
            }
            return Ok(FileOutcome::Skipped("unsupported".to_string()));
        };

        let change = if previous.is_some() {
            IndexEventKind::Modify
        } else {
            IndexEventKind::Create
        };
        self.record(ctx, rel, change, "queued");

        let mut chunks = self.parse(ctx, rel, category, bytes).await;
        let group = ctx.classifier.classify(rel);
        for c in &mut chunks {
            c.access_group = group;
        }
        let complete = self.attach_vectors(ctx, rel, &mut chunks).await?;

        let count = chunks.len();
        // Without every vector the hash is withheld, so the next event re-embeds.
        let recorded_hash = if complete { file_hash.as_str() } else { "" };
        self.store
            .upsert(&ctx.repo_id, rel, recorded_hash, chunks)
            .await?;
        tracing::info!(repo_id = %ctx.repo_id, path = rel, chunks = count, "indexed");
        Ok(FileOutcome::Indexed { chunks: count })
    }

    /// Parse on the blocking pool. Failures yield zero chunks.
    async fn parse(
        &self,
        ctx: &RepoContext,
        rel: &str,
        category: FileCategory,
        bytes: Vec<u8>,
    ) -> Vec<Chunk> {
        self.parses.fetch_add(1, Ordering::Relaxed);
        let parser = self.parser.clone();
        let repo_id = ctx.repo_id.clone();
        let path = rel.to_string();
        let result = tokio::task::spawn_blocking(move || parser.parse(&repo_id, &path, &bytes)).await;

        let kind = match category {
            FileCategory::Code(_) => IndexEventKind::AstParse,
            _ => IndexEventKind::DocExtract,
        };
        match result {
            Ok(Ok(chunks)) => {
                self.record(ctx, rel, kind, format!("{} chunks", chunks.len()));
                chunks
            }
            Ok(Err(e)) => {
                tracing::warn!(repo_id = %ctx.repo_id, path = rel, error = %e, "parse failed");
                self.record(ctx, rel, IndexEventKind::Skip, format!("parse failed: {}", e));
                Vec::new()
            }
            Err(e) => {
                tracing::error!(repo_id = %ctx.repo_id, path = rel, error = %e, "parser task failed");
                self.record(ctx, rel, IndexEventKind::Skip, "parser crashed");
                Vec::new()
            }
        }
    }

    /// Fill `dense_vector`, reusing stored vectors whose chunk id and
    /// content hash are unchanged. Embedder failures leave chunks
    /// lexical-only. Returns false when some chunk is left without a vector.
    async fn attach_vectors(&self, ctx: &RepoContext, rel: &str, chunks: &mut [Chunk]) -> Result<bool> {
        let Some(embedder) = &self.embedder else {
            return Ok(true);
        };
        if chunks.is_empty() {
            return Ok(true);
        }

        let existing = self.store.existing_vectors(&ctx.repo_id, rel).await?;
        let mut pending = Vec::new();
        for (i, c) in chunks.iter_mut().enumerate() {
            match existing.get(&c.id) {
                Some(stored)
                    if stored.content_hash == c.content_hash
                        && stored.vector.len() == embedder.dims() =>
                {
                    c.dense_vector = stored.vector.clone();
                }
                _ => pending.push(i),
            }
        }
        let reused = chunks.len() - pending.len();

        let mut complete = true;
        for batch in pending.chunks(self.embed_batch) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].lexical_text()).collect();
            match embedder.embed(&texts).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    for (&i, v) in batch.iter().zip(vectors) {
                        chunks[i].dense_vector = v;
                    }
                }
                Ok(vectors) => {
                    tracing::warn!(
                        repo_id = %ctx.repo_id,
                        path = rel,
                        expected = texts.len(),
                        got = vectors.len(),
                        "embedder returned wrong batch size"
                    );
                    complete = false;
                    break;
                }
                Err(e) => {
                    tracing::warn!(repo_id = %ctx.repo_id, path = rel, error = %e, "embedding failed; indexing lexical-only");
                    complete = false;
                    break;
                }
            }
        }
        tracing::debug!(repo_id = %ctx.repo_id, path = rel, reused, embedded = pending.len(), complete, "vectors attached");
        Ok(complete)
    }

    /// Delete `rel` and, when it was a directory, every stored path under it.
    async fn remove(&self, ctx: &RepoContext, rel: &str) -> Result<FileOutcome> {
        let mut removed = self.store.delete_path(&ctx.repo_id, rel).await?;
        let prefix = format!("{}/", rel);
        for path in self.store.list_paths(&ctx.repo_id).await? {
            if path.starts_with(&prefix) && self.store.delete_path(&ctx.repo_id, &path).await? {
                self.record(ctx, &path, IndexEventKind::Delete, "removed from disk");
                removed = true;
            }
        }
        if removed {
            self.record(ctx, rel, IndexEventKind::Delete, "removed from disk");
            tracing::info!(repo_id = %ctx.repo_id, path = rel, "deleted");
            Ok(FileOutcome::Deleted)
        } else {
            Ok(FileOutcome::Missing)
        }
    }

    /// Walk the whole tree and process every file as a modification.
    ///
    /// Paths that are stored but no longer on disk are deleted. Progress is
    /// reported after each completed file. Cancellation stops scheduling
    /// new files; in-flight ones finish before this returns.
    pub async fn reindex(
        self: &Arc<Self>,
        ctx: Arc<RepoContext>,
        cancel: CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> Result<ReindexSummary> {
        if !ctx.root.is_dir() {
            return Err(HarnessError::PathInaccessible(ctx.root.clone()));
        }

        let walk_ctx = Arc::clone(&ctx);
        let on_disk = tokio::task::spawn_blocking(move || walk(&walk_ctx))
            .await
            .map_err(|e| HarnessError::Store(anyhow!(e)))??;

        let stored = self.store.list_paths(&ctx.repo_id).await?;
        let stale: Vec<String> = stored
            .into_iter()
            .filter(|p| !on_disk.contains(p))
            .collect();

        let work: Vec<String> = on_disk.into_iter().chain(stale).collect();
        let total = work.len() as u64;
        let mut summary = ReindexSummary {
            total,
            ..Default::default()
        };
        tracing::info!(repo_id = %ctx.repo_id, files = total, "reindex started");
        observer
            .on_progress(&ReindexProgress::new(&ctx.repo_id, 0, total))
            .await;

        let mut queue = work.into_iter();
        let mut tasks = JoinSet::new();
        let mut done = 0u64;
        loop {
            while tasks.len() < self.worker_count && !cancel.is_cancelled() {
                let Some(rel) = queue.next() else { break };
                let this = Arc::clone(self);
                let ctx = Arc::clone(&ctx);
                tasks.spawn(async move {
                    let outcome = this.process_path(&ctx, &rel).await;
                    (rel, outcome)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            done += 1;
            match joined {
                Ok((rel, outcome)) => {
                    if let Err(e) = &outcome {
                        tracing::error!(repo_id = %ctx.repo_id, path = %rel, error = %e, "file failed");
                    }
                    summary.record(&outcome);
                }
                Err(e) => {
                    tracing::error!(repo_id = %ctx.repo_id, error = %e, "index task panicked");
                    summary.failed += 1;
                }
            }
            observer
                .on_progress(&ReindexProgress::new(&ctx.repo_id, done, total))
                .await;
        }

        summary.cancelled = cancel.is_cancelled() && done < total;
        if summary.cancelled {
            tracing::info!(repo_id = %ctx.repo_id, done, total, "reindex cancelled");
        } else {
            tracing::info!(
                repo_id = %ctx.repo_id,
                indexed = summary.indexed,
                unchanged = summary.unchanged,
                deleted = summary.deleted,
                "reindex finished"
            );
        }
        Ok(summary)
    }
}

/// Every non-ignored regular file under the root, as sorted relative paths.
fn walk(ctx: &RepoContext) -> Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    let walker = WalkDir::new(&ctx.root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || ctx
                    .relative(entry.path())
                    .map_or(true, |rel| !ctx.is_ignored(&rel))
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.depth() == 0 {
                    return Err(HarnessError::PathInaccessible(ctx.root.clone()));
                }
                tracing::warn!(repo_id = %ctx.repo_id, error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(rel) = ctx.relative(entry.path()) {
            files.insert(rel);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_harness_core::embedding::HashEmbedder;
    use code_harness_core::models::{AccessGroup, AccessRule, RepoStatus};
    use code_harness_core::store::memory::InMemoryStore;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn repository(root: &Path, ignore: &[&str], rules: Vec<AccessRule>) -> Repository {
        Repository {
            id: "proj".to_string(),
            name: "proj".to_string(),
            root_path: root.to_path_buf(),
            ignore_patterns: ignore.iter().map(|s| s.to_string()).collect(),
            access_rules: rules,
            default_access: AccessGroup::Public,
            status: RepoStatus::Active,
            progress: None,
            file_count: 0,
            chunk_count: 0,
            last_indexed_at: None,
            last_error: None,
        }
    }

    fn indexer(store: Arc<InMemoryStore>) -> Arc<Indexer> {
        Arc::new(Indexer::new(
            store,
            Some(Arc::new(HashEmbedder::new(64))),
            Arc::new(IndexEventLog::new(100)),
            IndexerSettings::default(),
        ))
    }

    const GO_SRC: &str = "package main\n\nfunc Handle() int {\n\treturn 1\n}\n";

    #[tokio::test]
    async fn indexes_then_skips_unchanged_then_deletes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.go"), GO_SRC).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let ctx = RepoContext::from_repository(&repository(tmp.path(), &[], vec![])).unwrap();

        assert_eq!(
            indexer.process_path(&ctx, "a.go").await.unwrap(),
            FileOutcome::Indexed { chunks: 1 }
        );
        assert_eq!(indexer.process_path(&ctx, "a.go").await.unwrap(), FileOutcome::Unchanged);
        assert_eq!(indexer.parse_count(), 1);

        let stored = store.list_paths("proj").await.unwrap();
        assert_eq!(stored, vec!["a.go"]);

        std::fs::remove_file(tmp.path().join("a.go")).unwrap();
        assert_eq!(indexer.process_path(&ctx, "a.go").await.unwrap(), FileOutcome::Deleted);
        assert_eq!(store.stats("proj").await.unwrap().chunk_count, 0);

        let kinds: Vec<IndexEventKind> = indexer.events().recent().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![IndexEventKind::Delete, IndexEventKind::AstParse, IndexEventKind::Create]
        );
    }

    /// Fails the first batch, then embeds normally.
    struct FlakyEmbedder {
        failed: std::sync::atomic::AtomicBool,
        inner: HashEmbedder,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dims(&self) -> usize {
            self.inner.dims()
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn failed_embedding_is_retried_on_next_event() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.go"), GO_SRC).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = Indexer::new(
            store.clone(),
            Some(Arc::new(FlakyEmbedder {
                failed: std::sync::atomic::AtomicBool::new(false),
                inner: HashEmbedder::new(64),
            })),
            Arc::new(IndexEventLog::new(100)),
            IndexerSettings::default(),
        );
        let ctx = RepoContext::from_repository(&repository(tmp.path(), &[], vec![])).unwrap();

        assert_eq!(
            indexer.process_path(&ctx, "a.go").await.unwrap(),
            FileOutcome::Indexed { chunks: 1 }
        );
        assert!(store.existing_vectors("proj", "a.go").await.unwrap().is_empty());
        // Stored lexical-only.
        assert_eq!(store.stats("proj").await.unwrap().chunk_count, 1);

        assert_eq!(
            indexer.process_path(&ctx, "a.go").await.unwrap(),
            FileOutcome::Indexed { chunks: 1 }
        );
        let vectors = store.existing_vectors("proj", "a.go").await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert!(vectors.values().all(|v| v.vector.len() == 64));

        assert_eq!(indexer.process_path(&ctx, "a.go").await.unwrap(), FileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn ignored_paths_never_produce_chunks() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/lib")).unwrap();
        std::fs::write(tmp.path().join("node_modules/lib/x.go"), GO_SRC).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let ctx = RepoContext::from_repository(&repository(tmp.path(), &["node_modules/**"], vec![])).unwrap();

        let outcome = indexer.process_path(&ctx, "node_modules/lib/x.go").await.unwrap();
        assert!(matches!(outcome, FileOutcome::Skipped(_)));
        assert_eq!(store.stats("proj").await.unwrap().chunk_count, 0);
        assert_eq!(indexer.events().recent()[0].kind, IndexEventKind::Skip);
    }

    #[tokio::test]
    async fn parse_failure_records_zero_chunks() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.pdf"), b"%PDF-1.4 garbage").unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let ctx = RepoContext::from_repository(&repository(tmp.path(), &[], vec![])).unwrap();

        assert_eq!(
            indexer.process_path(&ctx, "broken.pdf").await.unwrap(),
            FileOutcome::Indexed { chunks: 0 }
        );
        assert!(store.file_hash("proj", "broken.pdf").await.unwrap().is_some());
        assert_eq!(indexer.process_path(&ctx, "broken.pdf").await.unwrap(), FileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn access_rules_stamp_chunks() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("secrets")).unwrap();
        std::fs::write(tmp.path().join("secrets/keys.go"), GO_SRC).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let rules = vec![AccessRule {
            pattern: "secrets/**".to_string(),
            group: AccessGroup::Restricted,
        }];
        let ctx = RepoContext::from_repository(&repository(tmp.path(), &[], rules)).unwrap();
        indexer.process_path(&ctx, "secrets/keys.go").await.unwrap();

        let hits = store
            .search_lexical(
                &code_harness_core::lexical::query_terms("Handle"),
                10,
                &Default::default(),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.access_group, AccessGroup::Restricted);
        assert!(!hits[0].chunk.dense_vector.is_empty());
    }

    struct Recorder(Mutex<Vec<u8>>);

    #[async_trait]
    impl ProgressObserver for Recorder {
        async fn on_progress(&self, progress: &ReindexProgress) {
            self.0.lock().push(progress.percent);
        }
    }

    #[tokio::test]
    async fn reindex_walks_tree_reports_progress_and_drops_stale() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.go"), GO_SRC).unwrap();
        std::fs::write(tmp.path().join("notes.md"), "# Title\n\nbody text\n").unwrap();
        std::fs::write(tmp.path().join("debug.log"), "noise").unwrap();
        let store = Arc::new(InMemoryStore::new());
        store.upsert("proj", "gone.go", "h", vec![]).await.unwrap();
        let indexer = indexer(store.clone());
        let ctx = Arc::new(
            RepoContext::from_repository(&repository(tmp.path(), &["*.log"], vec![])).unwrap(),
        );

        let recorder = Recorder(Mutex::new(Vec::new()));
        let summary = indexer
            .reindex(Arc::clone(&ctx), CancellationToken::new(), &recorder)
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.deleted, 1);
        assert!(!summary.cancelled);
        assert_eq!(store.list_paths("proj").await.unwrap(), vec!["a.go", "notes.md"]);

        let percents = recorder.0.lock().clone();
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn cancelled_reindex_schedules_nothing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.go"), GO_SRC).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let ctx = Arc::new(RepoContext::from_repository(&repository(tmp.path(), &[], vec![])).unwrap());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = indexer.reindex(ctx, cancel, &NoopObserver).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(store.stats("proj").await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn reindex_of_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store);
        let ctx = Arc::new(
            RepoContext::from_repository(&repository(&tmp.path().join("gone"), &[], vec![])).unwrap(),
        );
        let err = indexer
            .reindex(ctx, CancellationToken::new(), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::PathInaccessible(_)));
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let ctx = RepoContext::from_repository(&repository(Path::new("/repo"), &[], vec![])).unwrap();
        assert_eq!(ctx.relative(Path::new("/repo/src/a.go")).as_deref(), Some("src/a.go"));
        assert_eq!(ctx.relative(Path::new("/repo")), None);
        assert_eq!(ctx.relative(Path::new("/elsewhere/a.go")), None);
    }
}
