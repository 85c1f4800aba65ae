//! The `Engine` facade.
//!
//! Wires configuration, the SQLite chunk store, the registry, the indexing
//! pipeline, the watchers, and the retriever together, and exposes the
//! logical operations a transport layer maps 1:1 onto wire calls:
//!
//! | Operation | Method |
//! |-----------|--------|
//! | `Search` | [`Engine::search`] |
//! | `Register` | [`Engine::register`] |
//! | `Deregister` | [`Engine::deregister`] |
//! | `TriggerReindex` | [`Engine::trigger_reindex`] |
//! | `Get(chunk_id)` | [`Engine::get`] |
//!
//! Every search and resource read is recorded in the access log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use code_harness_core::access::is_visible;
use code_harness_core::error::{HarnessError, Result};
use code_harness_core::events::{AccessLog, IndexEventLog};
use code_harness_core::models::{
    AccessAction, AccessLogEntry, AccessPrincipal, AccessStatus, Chunk, IndexEvent, RepoStatus,
    Repository, Role, SearchResult,
};
use code_harness_core::search::{
    MergeStrategy, ReciprocalRankFusion, Retriever, SearchOptions, SearchParams, SearchRequest,
    WeightedSum,
};
use code_harness_core::store::ChunkStore;

use crate::auth::{CredentialResolver, StaticTokenResolver};
use crate::config::Config;
use crate::indexer::{Indexer, IndexerSettings, ProgressObserver, ReindexSummary, RepoContext};
use crate::progress::{ProgressReporter, ReindexProgress};
use crate::registry::{NewRepository, Registry};
use crate::sqlite_store::SqliteStore;
use crate::watcher::{spawn_watcher, WatchHandle};
use crate::{db, embedding, expansion, migrate, rerank};

/// Resource name recorded for search calls.
const SEARCH_RESOURCE: &str = "tool://search_codebase";

pub struct Engine {
    config: Config,
    store: Arc<SqliteStore>,
    registry: Registry,
    indexer: Arc<Indexer>,
    retriever: Retriever,
    resolver: Arc<dyn CredentialResolver>,
    events: Arc<IndexEventLog>,
    access_log: Arc<AccessLog>,
    reindexing: parking_lot::Mutex<HashMap<String, RunningReindex>>,
    watchers: parking_lot::Mutex<HashMap<String, WatchHandle>>,
}

/// A reindex in progress. The tracker lets callers wait for it to return.
struct RunningReindex {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

fn merge_strategy(config: &Config) -> Arc<dyn MergeStrategy> {
    match config.retrieval.merge.as_str() {
        "weighted" => Arc::new(WeightedSum {
            alpha: config.retrieval.hybrid_alpha,
        }),
        _ => Arc::new(ReciprocalRankFusion {
            k: config.retrieval.rrf_k,
        }),
    }
}

impl Engine {
    /// Connect, migrate, build collaborators, drop rows of unregistered
    /// repositories, and check every repository's index integrity.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let registry = Registry::new(pool, config.indexing.default_ignore.clone());
        let events = Arc::new(IndexEventLog::new(config.audit.index_events));
        let access_log = Arc::new(AccessLog::new(config.audit.access_log));

        let embedder = embedding::create_embedder(&config.embedding)?;
        let mut retriever = Retriever::new(SearchParams {
            candidate_k: config.retrieval.candidate_k,
            final_limit: config.retrieval.final_limit,
        })
        .with_merge(merge_strategy(&config));
        if let Some(embedder) = &embedder {
            retriever = retriever.with_embedder(Arc::clone(embedder));
        }
        if let Some(expander) = expansion::create_expander(&config.expansion)? {
            retriever = retriever.with_expander(expander);
        }
        if let Some(reranker) = rerank::create_reranker(&config.rerank)? {
            retriever = retriever.with_reranker(reranker);
        }

        let indexer = Arc::new(Indexer::new(
            Arc::clone(&store) as Arc<dyn ChunkStore>,
            embedder,
            Arc::clone(&events),
            IndexerSettings {
                workers: config.indexing.workers,
                max_file_bytes: config.indexing.max_file_bytes,
                max_tokens: config.indexing.max_tokens,
                embed_batch: config.embedding.batch_size,
            },
        ));
        let resolver = Arc::new(StaticTokenResolver::from_config(&config.auth)?);

        let engine = Self {
            config,
            store,
            registry,
            indexer,
            retriever,
            resolver,
            events,
            access_log,
            reindexing: parking_lot::Mutex::new(HashMap::new()),
            watchers: parking_lot::Mutex::new(HashMap::new()),
        };
        let purged = engine.store.purge_unregistered().await?;
        if purged > 0 {
            tracing::warn!(rows = purged, "removed index rows of unregistered repositories");
        }
        engine.check_integrity().await?;
        Ok(engine)
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolve(&self, credential: Option<&str>) -> Result<AccessPrincipal> {
        self.resolver.resolve(credential)
    }

    // ============ Registry ============

    pub async fn register(&self, new: NewRepository) -> Result<Repository> {
        self.registry.register(new).await
    }

    /// Stop the repository's watcher and any running reindex, wait for
    /// their in-flight files, delete all of its chunks, and remove it from
    /// the registry.
    pub async fn deregister(&self, id: &str) -> Result<()> {
        self.registry.get(id).await?;
        let handle = self.watchers.lock().remove(id);
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.stop_reindex(id).await;
        self.store.delete_repo(id).await?;
        self.registry.deregister(id).await?;
        Ok(())
    }

    pub async fn repository(&self, id: &str) -> Result<Repository> {
        self.registry.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<Repository>> {
        self.registry.list().await
    }

    // ============ Indexing ============

    /// Full reindex: INDEXING → walk → ACTIVE, or ERROR on an inaccessible
    /// root or a failed integrity check.
    pub async fn trigger_reindex(
        &self,
        id: &str,
        principal: &AccessPrincipal,
        reporter: &dyn ProgressReporter,
    ) -> Result<ReindexSummary> {
        let resource = format!("repo://{}", id);
        if principal.role == Role::Viewer {
            let reason = "role VIEWER may not trigger a reindex";
            self.audit(principal, AccessAction::Reindex, resource, AccessStatus::Denied, Some(reason.to_string()));
            return Err(HarnessError::AccessDenied(reason.to_string()));
        }

        let repo = self.registry.get(id).await?;
        let ctx = Arc::new(RepoContext::from_repository(&repo)?);

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        {
            let mut running = self.reindexing.lock();
            if running.contains_key(id) {
                return Err(HarnessError::Store(anyhow::anyhow!(
                    "reindex of '{}' already running",
                    id
                )));
            }
            running.insert(
                id.to_string(),
                RunningReindex {
                    cancel: cancel.clone(),
                    tracker: tracker.clone(),
                },
            );
        }
        self.audit(principal, AccessAction::Reindex, resource, AccessStatus::Granted, None);

        // Stored hashes of an ERROR repository can't be trusted; rebuild from scratch.
        let clear = repo.status == RepoStatus::Error;
        let result = tracker
            .track_future(self.run_reindex(id, ctx, clear, cancel, reporter))
            .await;
        self.reindexing.lock().remove(id);
        tracker.close();
        result
    }

    async fn run_reindex(
        &self,
        id: &str,
        ctx: Arc<RepoContext>,
        clear: bool,
        cancel: CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ReindexSummary> {
        if clear {
            self.store.delete_repo(id).await?;
        }
        self.registry.begin_indexing(id).await?;
        let observer = RegistryObserver {
            registry: &self.registry,
            reporter,
            last_percent: AtomicU8::new(0),
        };

        let summary = match self.indexer.reindex(ctx, cancel, &observer).await {
            Ok(summary) => summary,
            Err(e) => {
                self.registry.mark_error(id, &e.to_string()).await?;
                return Err(e);
            }
        };

        let problems = self.store.verify(id).await?;
        if !problems.is_empty() {
            let detail = problems.join("; ");
            self.registry
                .mark_error(id, &format!("index corruption: {}", detail))
                .await?;
            return Err(HarnessError::IndexCorruption {
                repo_id: id.to_string(),
                detail,
            });
        }
        self.registry.mark_active(id).await?;
        Ok(summary)
    }

    /// Cancel a running reindex. In-flight files finish; nothing new starts.
    pub fn cancel_reindex(&self, id: &str) -> bool {
        match self.reindexing.lock().get(id) {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel a running reindex and wait until it has returned.
    async fn stop_reindex(&self, id: &str) {
        let tracker = self.reindexing.lock().get(id).map(|running| {
            running.cancel.cancel();
            running.tracker.clone()
        });
        if let Some(tracker) = tracker {
            tracker.close();
            tracker.wait().await;
        }
    }

    /// Verify every repository; mismatches mark it ERROR until reindexed.
    pub async fn check_integrity(&self) -> Result<Vec<String>> {
        let mut corrupted = Vec::new();
        for repo in self.registry.list().await? {
            if repo.status == RepoStatus::Error {
                continue;
            }
            let problems = self.store.verify(&repo.id).await?;
            if !problems.is_empty() {
                let detail = problems.join("; ");
                tracing::error!(repo_id = %repo.id, detail = %detail, "index corruption detected");
                self.registry
                    .mark_error(&repo.id, &format!("index corruption: {}", detail))
                    .await?;
                corrupted.push(repo.id);
            }
        }
        Ok(corrupted)
    }

    /// Start the filesystem watcher for `id`. Idempotent.
    pub async fn watch(&self, id: &str) -> Result<()> {
        if self.watchers.lock().contains_key(id) {
            return Ok(());
        }
        let repo = self.registry.get(id).await?;
        let ctx = Arc::new(RepoContext::from_repository(&repo)?);
        let handle = spawn_watcher(
            ctx,
            Arc::clone(&self.indexer) as Arc<dyn crate::watcher::PathProcessor>,
            Arc::clone(&self.events),
            Duration::from_millis(self.config.indexing.debounce_ms),
            CancellationToken::new(),
        )?;
        self.watchers.lock().insert(id.to_string(), handle);
        Ok(())
    }

    pub async fn unwatch(&self, id: &str) -> bool {
        let handle = self.watchers.lock().remove(id);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every watcher and every reindex, waiting for in-flight files.
    pub async fn shutdown(&self) {
        let handles: Vec<WatchHandle> = self.watchers.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.shutdown().await;
        }
        let trackers: Vec<TaskTracker> = self
            .reindexing
            .lock()
            .values()
            .map(|running| {
                running.cancel.cancel();
                running.tracker.clone()
            })
            .collect();
        for tracker in trackers {
            tracker.close();
            tracker.wait().await;
        }
    }

    /// Index a single repository-relative path now, bypassing the debounce.
    pub async fn index_path(&self, id: &str, rel: &str) -> Result<crate::indexer::FileOutcome> {
        let repo = self.registry.get(id).await?;
        let ctx = RepoContext::from_repository(&repo)?;
        self.indexer.process_path(&ctx, rel).await
    }

    // ============ Retrieval ============

    /// Hybrid search scoped to `repo_filter` (all repositories when `None`).
    ///
    /// Repositories in ERROR are excluded until reindexed. Chunks the
    /// principal may not see are dropped and logged as DENIED.
    pub async fn search(
        &self,
        query: &str,
        repo_filter: Option<Vec<String>>,
        principal: &AccessPrincipal,
        options: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let repos = self.registry.list().await?;
        let searchable = |id: &str| {
            repos
                .iter()
                .any(|r| r.id == id && r.status != RepoStatus::Error)
        };
        let scope: Vec<String> = match repo_filter {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !repos.iter().any(|r| &r.id == *id)) {
                    return Err(HarnessError::RepositoryNotFound(unknown.clone()));
                }
                ids.into_iter().filter(|id| searchable(id)).collect()
            }
            None => repos
                .iter()
                .filter(|r| r.status != RepoStatus::Error)
                .map(|r| r.id.clone())
                .collect(),
        };

        let request = SearchRequest {
            query,
            repo_filter: Some(scope),
            principal,
            options,
        };
        let outcome = self.retriever.search(self.store.as_ref(), &request).await?;

        for chunk in &outcome.denied {
            self.audit(
                principal,
                AccessAction::Search,
                chunk.resource_uri(),
                AccessStatus::Denied,
                Some(format!(
                    "access group {} not visible to role {}",
                    chunk.access_group, principal.role
                )),
            );
        }
        if !outcome.degraded.is_empty() {
            tracing::info!(degraded = ?outcome.degraded, "search ran with degraded collaborators");
        }
        self.audit(principal, AccessAction::Search, SEARCH_RESOURCE.to_string(), AccessStatus::Granted, None);
        tracing::debug!(
            principal = %principal.subject,
            results = outcome.results.len(),
            denied = outcome.denied.len(),
            "search"
        );
        Ok(outcome.results)
    }

    /// Read one chunk by id.
    pub async fn get(&self, chunk_id: &str, principal: &AccessPrincipal) -> Result<Chunk> {
        let chunk = self
            .store
            .get(chunk_id)
            .await?
            .ok_or_else(|| HarnessError::ChunkNotFound(chunk_id.to_string()))?;
        let resource = chunk.resource_uri();
        if !is_visible(principal.role, chunk.access_group) {
            let reason = format!(
                "access group {} not visible to role {}",
                chunk.access_group, principal.role
            );
            self.audit(principal, AccessAction::ReadResource, resource, AccessStatus::Denied, Some(reason.clone()));
            return Err(HarnessError::AccessDenied(reason));
        }
        self.audit(principal, AccessAction::ReadResource, resource, AccessStatus::Granted, None);
        Ok(chunk)
    }

    // ============ Audit ============

    /// Most recent index events, newest first.
    pub fn index_events(&self) -> Vec<IndexEvent> {
        self.events.recent()
    }

    /// Most recent access log entries, newest first.
    pub fn access_log(&self) -> Vec<AccessLogEntry> {
        self.access_log.recent()
    }

    fn audit(
        &self,
        principal: &AccessPrincipal,
        action: AccessAction,
        resource: String,
        status: AccessStatus,
        reason: Option<String>,
    ) {
        if status == AccessStatus::Denied {
            tracing::info!(
                principal = %principal.subject,
                action = %action,
                resource = %resource,
                reason = reason.as_deref().unwrap_or(""),
                "access denied"
            );
        }
        self.access_log.push(AccessLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            principal: principal.subject.clone(),
            role: principal.role,
            action,
            resource,
            status,
            reason,
        });
    }
}

/// Persists progress to the registry and echoes it to a reporter.
struct RegistryObserver<'a> {
    registry: &'a Registry,
    reporter: &'a dyn ProgressReporter,
    last_percent: AtomicU8,
}

#[async_trait]
impl ProgressObserver for RegistryObserver<'_> {
    async fn on_progress(&self, progress: &ReindexProgress) {
        self.reporter.report(progress);
        let previous = self.last_percent.swap(progress.percent, Ordering::Relaxed);
        if previous == progress.percent && progress.done != 0 {
            return;
        }
        if let Err(e) = self
            .registry
            .set_progress(&progress.repo_id, progress.percent)
            .await
        {
            tracing::warn!(repo_id = %progress.repo_id, error = %e, "failed to persist progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::progress::NoProgress;
    use code_harness_core::models::{AccessGroup, AccessRule};
    use tempfile::TempDir;

    async fn engine(tmp: &TempDir) -> Engine {
        let config = Config {
            db: DbConfig {
                path: tmp.path().join("data/chx.sqlite"),
            },
            ..Default::default()
        };
        Engine::open(config).await.unwrap()
    }

    fn admin() -> AccessPrincipal {
        AccessPrincipal::new("local-user", Role::Admin)
    }

    #[tokio::test]
    async fn viewer_sees_only_public_twin_and_denials_are_logged() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(root.join("secret")).unwrap();
        let body = "package main\n\nfunc RotateSigningKeys() {}\n";
        std::fs::write(root.join("public.go"), body).unwrap();
        std::fs::write(root.join("secret/private.go"), body).unwrap();

        let engine = engine(&tmp).await;
        engine
            .register(
                NewRepository::new("proj", &root).with_access_rules(vec![AccessRule {
                    pattern: "secret/**".to_string(),
                    group: AccessGroup::Restricted,
                }]),
            )
            .await
            .unwrap();
        engine
            .trigger_reindex("proj", &admin(), &NoProgress)
            .await
            .unwrap();

        let viewer = AccessPrincipal::new("guest", Role::Viewer);
        let results = engine
            .search("RotateSigningKeys", None, &viewer, SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_path, "public.go");

        let log = engine.access_log();
        assert_eq!(log[0].status, AccessStatus::Granted);
        assert_eq!(log[0].resource, SEARCH_RESOURCE);
        assert!(log.iter().any(|e| e.status == AccessStatus::Denied
            && e.resource == "code://proj/secret/private.go"));

        let admin_results = engine
            .search("RotateSigningKeys", None, &admin(), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(admin_results.len(), 2);
    }

    #[tokio::test]
    async fn get_enforces_visibility() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.go"), "package a\n\nfunc A() {}\n").unwrap();

        let engine = engine(&tmp).await;
        let mut new = NewRepository::new("proj", &root);
        new.default_access = AccessGroup::Internal;
        engine.register(new).await.unwrap();
        engine.trigger_reindex("proj", &admin(), &NoProgress).await.unwrap();

        let hit = engine
            .search("func", Some(vec!["proj".to_string()]), &admin(), SearchOptions::default())
            .await
            .unwrap()
            .remove(0);

        let dev = AccessPrincipal::new("dev", Role::Developer);
        assert_eq!(engine.get(&hit.chunk_id, &dev).await.unwrap().id, hit.chunk_id);

        let viewer = AccessPrincipal::new("guest", Role::Viewer);
        assert!(matches!(
            engine.get(&hit.chunk_id, &viewer).await,
            Err(HarnessError::AccessDenied(_))
        ));
        assert_eq!(engine.access_log()[0].action, AccessAction::ReadResource);
        assert!(matches!(
            engine.get("missing", &dev).await,
            Err(HarnessError::ChunkNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reindex_of_vanished_root_marks_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        let engine = engine(&tmp).await;
        engine.register(NewRepository::new("proj", &root)).await.unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let err = engine
            .trigger_reindex("proj", &admin(), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::PathInaccessible(_)));
        let repo = engine.repository("proj").await.unwrap();
        assert_eq!(repo.status, RepoStatus::Error);
        assert!(repo.last_error.is_some());
    }

    #[tokio::test]
    async fn viewer_cannot_reindex() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        let engine = engine(&tmp).await;
        engine.register(NewRepository::new("proj", &root)).await.unwrap();

        let viewer = AccessPrincipal::new("guest", Role::Viewer);
        assert!(matches!(
            engine.trigger_reindex("proj", &viewer, &NoProgress).await,
            Err(HarnessError::AccessDenied(_))
        ));
        assert_eq!(engine.access_log()[0].action, AccessAction::Reindex);
    }

    #[tokio::test]
    async fn unknown_repo_filter_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp).await;
        assert!(matches!(
            engine
                .search("x", Some(vec!["ghost".to_string()]), &admin(), SearchOptions::default())
                .await,
            Err(HarnessError::RepositoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn deregister_waits_for_running_reindex() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("late.go"), "package a\n\nfunc Late() {}\n").unwrap();
        let engine = engine(&tmp).await;
        let repo = engine.register(NewRepository::new("proj", &root)).await.unwrap();

        // A reindex whose last file is still being written when deregister runs.
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let indexer = Arc::clone(&engine.indexer);
        let ctx = RepoContext::from_repository(&repo).unwrap();
        tracker.spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            indexer.process_path(&ctx, "late.go").await.unwrap();
        });
        engine
            .reindexing
            .lock()
            .insert("proj".to_string(), RunningReindex { cancel: cancel.clone(), tracker });

        engine.deregister("proj").await.unwrap();
        assert!(cancel.is_cancelled());
        assert!(engine.store.list_paths("proj").await.unwrap().is_empty());
        assert_eq!(engine.store.stats("proj").await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn error_repo_keeps_chunks_while_reindex_is_running() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.go"), "package a\n\nfunc A() {}\n").unwrap();
        let engine = engine(&tmp).await;
        engine.register(NewRepository::new("proj", &root)).await.unwrap();
        engine.trigger_reindex("proj", &admin(), &NoProgress).await.unwrap();
        engine.registry.mark_error("proj", "disk full").await.unwrap();

        engine.reindexing.lock().insert(
            "proj".to_string(),
            RunningReindex {
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
        );
        assert!(engine.trigger_reindex("proj", &admin(), &NoProgress).await.is_err());
        assert_eq!(engine.repository("proj").await.unwrap().chunk_count, 1);

        engine.reindexing.lock().remove("proj");
        engine.trigger_reindex("proj", &admin(), &NoProgress).await.unwrap();
        let repo = engine.repository("proj").await.unwrap();
        assert_eq!(repo.status, RepoStatus::Active);
        assert_eq!(repo.chunk_count, 1);
    }

    #[tokio::test]
    async fn open_purges_rows_of_unregistered_repos() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.go"), "package a\n\nfunc A() {}\n").unwrap();
        {
            let engine = engine(&tmp).await;
            engine.register(NewRepository::new("proj", &root)).await.unwrap();
            engine.trigger_reindex("proj", &admin(), &NoProgress).await.unwrap();
            // Registry row gone, chunks left behind.
            engine.registry.deregister("proj").await.unwrap();
            assert_eq!(engine.store.list_paths("proj").await.unwrap(), vec!["a.go"]);
        }

        let engine = engine(&tmp).await;
        assert!(engine.store.list_paths("proj").await.unwrap().is_empty());
        for table in ["chunks", "chunks_fts", "chunk_vectors", "files"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(engine.store.pool())
                .await
                .unwrap();
            assert_eq!(count, 0, "{} not purged", table);
        }

        engine.register(NewRepository::new("proj", &root)).await.unwrap();
        let repo = engine.repository("proj").await.unwrap();
        assert_eq!(repo.chunk_count, 0);
        assert_eq!(repo.file_count, 0);
    }

    #[tokio::test]
    async fn corruption_detected_at_open_marks_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.go"), "package a\n\nfunc A() {}\n").unwrap();
        {
            let engine = engine(&tmp).await;
            engine.register(NewRepository::new("proj", &root)).await.unwrap();
            engine.trigger_reindex("proj", &admin(), &NoProgress).await.unwrap();
            sqlx::query("DELETE FROM chunks_fts")
                .execute(engine.store.pool())
                .await
                .unwrap();
        }

        let engine = engine(&tmp).await;
        let repo = engine.repository("proj").await.unwrap();
        assert_eq!(repo.status, RepoStatus::Error);
        assert!(repo.last_error.unwrap().contains("index corruption"));

        let results = engine
            .search("func", None, &admin(), SearchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());

        engine.trigger_reindex("proj", &admin(), &NoProgress).await.unwrap();
        assert_eq!(engine.repository("proj").await.unwrap().status, RepoStatus::Active);
        let results = engine
            .search("func", None, &admin(), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
