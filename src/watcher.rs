//! Filesystem watcher.
//!
//! One watcher per repository. A blocking thread owns the `notify` watcher
//! and forwards raw paths over a channel; an async dispatcher classifies
//! each path (SKIP when ignored, otherwise QUEUED) and hands queued paths
//! to a [`Debouncer`], which collapses bursts on the same path into a
//! single call to the [`PathProcessor`] once the path has been quiet for
//! the debounce window.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use walkdir::WalkDir;

use code_harness_core::error::{HarnessError, Result};
use code_harness_core::events::IndexEventLog;
use code_harness_core::models::{IndexEvent, IndexEventKind};

use crate::indexer::{FileOutcome, Indexer, RepoContext};

/// Consumer of debounced paths.
#[async_trait]
pub trait PathProcessor: Send + Sync {
    async fn process(&self, ctx: &RepoContext, rel: &str);
}

#[async_trait]
impl PathProcessor for Indexer {
    async fn process(&self, ctx: &RepoContext, rel: &str) {
        match self.process_path(ctx, rel).await {
            Ok(FileOutcome::Indexed { chunks }) => {
                tracing::debug!(repo_id = %ctx.repo_id, path = rel, chunks, "watcher indexed")
            }
            Ok(_) => {}
            Err(e) => tracing::error!(repo_id = %ctx.repo_id, path = rel, error = %e, "watcher failed to index"),
        }
    }
}

/// Per-path trailing-edge debounce.
///
/// Every scheduled path gets a fresh generation number; after the window
/// only the task holding the latest generation for that path fires. Timer
/// tasks are tracked so [`Debouncer::close`] can wait for in-flight work.
pub struct Debouncer {
    window: Duration,
    ctx: Arc<RepoContext>,
    processor: Arc<dyn PathProcessor>,
    pending: Arc<parking_lot::Mutex<HashMap<String, u64>>>,
    generation: AtomicU64,
    tracker: TaskTracker,
    closed: CancellationToken,
}

impl Debouncer {
    pub fn new(window: Duration, ctx: Arc<RepoContext>, processor: Arc<dyn PathProcessor>) -> Self {
        Self {
            window,
            ctx,
            processor,
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Queue `rel`. Ignored once the debouncer is closed.
    pub fn schedule(&self, rel: String) {
        if self.closed.is_cancelled() {
            return;
        }
        let gen = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.lock().insert(rel.clone(), gen);

        let window = self.window;
        let pending = Arc::clone(&self.pending);
        let ctx = Arc::clone(&self.ctx);
        let processor = Arc::clone(&self.processor);
        let closed = self.closed.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }
            let fire = {
                let mut pending = pending.lock();
                if pending.get(&rel) == Some(&gen) {
                    pending.remove(&rel);
                    true
                } else {
                    false
                }
            };
            if fire {
                processor.process(&ctx, &rel).await;
            }
        });
    }

    /// Paths waiting for their quiet period to elapse.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every pending path and wait for calls already in progress.
    pub async fn close(&self) {
        self.closed.cancel();
        self.pending.lock().clear();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Running watcher for one repository. Dropping it does not stop it; call
/// [`WatchHandle::stop`].
pub struct WatchHandle {
    repo_id: String,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the dispatcher and any in-flight indexing to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Start watching `ctx.root` recursively.
///
/// Fails with `PathInaccessible` if the root cannot be watched.
pub fn spawn_watcher(
    ctx: Arc<RepoContext>,
    processor: Arc<dyn PathProcessor>,
    events: Arc<IndexEventLog>,
    debounce: Duration,
    cancel: CancellationToken,
) -> Result<WatchHandle> {
    let (watch_tx, watch_rx) = std_mpsc::channel();
    let mut watcher = RecommendedWatcher::new(watch_tx, NotifyConfig::default())
        .map_err(|e| HarnessError::Store(e.into()))?;
    watcher
        .watch(&ctx.root, RecursiveMode::Recursive)
        .map_err(|_| HarnessError::PathInaccessible(ctx.root.clone()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let thread_cancel = cancel.clone();
    let repo_id = ctx.repo_id.clone();
    std::thread::Builder::new()
        .name(format!("chx-watch-{}", repo_id))
        .spawn(move || forward_events(watcher, watch_rx, tx, thread_cancel))
        .map_err(|e| HarnessError::Store(e.into()))?;

    let debouncer = Debouncer::new(debounce, Arc::clone(&ctx), processor);
    let task = tokio::spawn(dispatch(ctx, rx, debouncer, events, cancel.clone()));
    tracing::info!(repo_id = %repo_id, debounce_ms = debounce.as_millis() as u64, "watching");

    Ok(WatchHandle {
        repo_id,
        cancel,
        task,
    })
}

/// Blocking loop that owns the notify watcher until cancelled.
fn forward_events(
    _watcher: RecommendedWatcher,
    watch_rx: std_mpsc::Receiver<notify::Result<Event>>,
    tx: mpsc::UnboundedSender<PathBuf>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match watch_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Ok(event)) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    continue;
                }
                for path in event.paths {
                    if tx.send(path).is_err() {
                        return;
                    }
                }
            }
            Ok(Err(err)) => tracing::warn!("watcher error: {err:?}"),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

async fn dispatch(
    ctx: Arc<RepoContext>,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    debouncer: Debouncer,
    events: Arc<IndexEventLog>,
    cancel: CancellationToken,
) {
    loop {
        let path = tokio::select! {
            _ = cancel.cancelled() => break,
            path = rx.recv() => match path {
                Some(path) => path,
                None => break,
            },
        };
        let Some(rel) = ctx.relative(&path) else {
            continue;
        };
        if !classify(&ctx, &events, &rel) {
            continue;
        }
        if path.is_dir() {
            // A directory moved in may carry files that never get their own event.
            for file in files_under(&ctx, &path) {
                debouncer.schedule(file);
            }
        } else {
            debouncer.schedule(rel);
        }
    }
    debouncer.close().await;
    tracing::info!(repo_id = %ctx.repo_id, "watcher stopped");
}

/// True when `rel` should be queued; ignored paths are recorded as SKIP.
fn classify(ctx: &RepoContext, events: &IndexEventLog, rel: &str) -> bool {
    if ctx.is_ignored(rel) {
        tracing::debug!(repo_id = %ctx.repo_id, path = rel, "skipped (ignored)");
        events.push(IndexEvent::new(&ctx.repo_id, rel, IndexEventKind::Skip, "matches ignore pattern"));
        return false;
    }
    true
}

fn files_under(ctx: &RepoContext, dir: &std::path::Path) -> Vec<String> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            ctx.relative(e.path())
                .map_or(true, |rel| !ctx.is_ignored(&rel))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| ctx.relative(e.path()))
        .collect()
}
