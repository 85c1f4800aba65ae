//! `chx repo ...` and `chx watch` command handlers.

use std::path::Path;

use anyhow::Result;

use code_harness_core::models::{AccessGroup, AccessPrincipal, AccessRule};

use crate::engine::Engine;
use crate::progress::ProgressMode;
use crate::registry::{format_indexed_at, NewRepository};

/// Parse a `pattern=GROUP` access rule argument.
pub fn parse_access_rule(s: &str) -> Result<AccessRule, String> {
    let pos = s
        .rfind('=')
        .ok_or_else(|| format!("invalid PATTERN=GROUP: no '=' found in '{}'", s))?;
    let group: AccessGroup = s[pos + 1..].parse()?;
    Ok(AccessRule {
        pattern: s[..pos].to_string(),
        group,
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn run_add(
    engine: &Engine,
    principal: &AccessPrincipal,
    name: &str,
    path: &Path,
    ignore: Vec<String>,
    access_rules: Vec<AccessRule>,
    default_access: AccessGroup,
    no_index: bool,
    progress: ProgressMode,
) -> Result<()> {
    let mut new = NewRepository::new(name, path).with_access_rules(access_rules);
    if !ignore.is_empty() {
        new = new.with_ignore(ignore);
    }
    new.default_access = default_access;

    let repo = engine.register(new).await?;
    println!("Registered {} ({}) at {}", repo.id, repo.name, repo.root_path.display());
    if no_index {
        return Ok(());
    }
    run_reindex(engine, principal, &repo.id, progress).await
}

pub async fn run_remove(engine: &Engine, id: &str) -> Result<()> {
    engine.deregister(id).await?;
    println!("Removed {}", id);
    Ok(())
}

pub async fn run_list(engine: &Engine, json: bool) -> Result<()> {
    let repos = engine.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&repos)?);
        return Ok(());
    }
    if repos.is_empty() {
        println!("No repositories registered.");
        return Ok(());
    }

    println!(
        "{:<20} {:<9} {:>6} {:>8}   {:<19}   {}",
        "ID", "STATUS", "FILES", "CHUNKS", "LAST INDEXED", "ROOT"
    );
    println!("{}", "-".repeat(96));
    for repo in &repos {
        let status = match repo.progress {
            Some(p) => format!("{} {}%", repo.status, p),
            None => repo.status.to_string(),
        };
        println!(
            "{:<20} {:<9} {:>6} {:>8}   {:<19}   {}",
            repo.id,
            status,
            repo.file_count,
            repo.chunk_count,
            format_indexed_at(repo.last_indexed_at),
            repo.root_path.display()
        );
        if let Some(ref err) = repo.last_error {
            println!("{:<20} error: {}", "", err);
        }
    }
    Ok(())
}

pub async fn run_reindex(
    engine: &Engine,
    principal: &AccessPrincipal,
    id: &str,
    progress: ProgressMode,
) -> Result<()> {
    let reporter = progress.reporter();
    let summary = engine.trigger_reindex(id, principal, reporter.as_ref()).await?;
    println!(
        "Reindexed {}: {} files, {} indexed, {} unchanged, {} deleted, {} skipped, {} failed{}",
        id,
        summary.total,
        summary.indexed,
        summary.unchanged,
        summary.deleted,
        summary.skipped,
        summary.failed,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

/// Watch and reindex each repository (all when `ids` is empty) until
/// Ctrl-C.
pub async fn run_watch(
    engine: &Engine,
    principal: &AccessPrincipal,
    ids: Vec<String>,
    progress: ProgressMode,
) -> Result<()> {
    let ids = if ids.is_empty() {
        engine.list().await?.into_iter().map(|r| r.id).collect()
    } else {
        ids
    };
    if ids.is_empty() {
        println!("No repositories registered.");
        return Ok(());
    }

    start_watching(engine, principal, &ids, progress).await?;
    println!("Watching {} (Ctrl-C to stop)", ids.join(", "));

    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;
    Ok(())
}

/// Start each watcher before its reindex, so edits made while the walk
/// runs are still picked up.
pub async fn start_watching(
    engine: &Engine,
    principal: &AccessPrincipal,
    ids: &[String],
    progress: ProgressMode,
) -> Result<()> {
    for id in ids {
        engine.watch(id).await?;
        run_reindex(engine, principal, id, progress).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig, IndexingConfig};
    use code_harness_core::models::Role;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn start_watching_indexes_and_follows_edits() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap().join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.go"), "package a\n\nfunc A() {}\n").unwrap();
        let engine = Engine::open(Config {
            db: DbConfig {
                path: tmp.path().join("data/chx.sqlite"),
            },
            indexing: IndexingConfig {
                debounce_ms: 50,
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
        engine.register(NewRepository::new("proj", &root)).await.unwrap();
        let admin = AccessPrincipal::new("local-user", Role::Admin);

        start_watching(&engine, &admin, &["proj".to_string()], ProgressMode::Off)
            .await
            .unwrap();
        assert_eq!(engine.repository("proj").await.unwrap().chunk_count, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(root.join("b.go"), "package a\n\nfunc B() {}\n").unwrap();
        let mut chunks = 0;
        for _ in 0..50 {
            chunks = engine.repository("proj").await.unwrap().chunk_count;
            if chunks == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(chunks, 2);
        engine.shutdown().await;
    }

    #[test]
    fn access_rule_argument() {
        let rule = parse_access_rule("src/auth/**=restricted").unwrap();
        assert_eq!(rule.pattern, "src/auth/**");
        assert_eq!(rule.group, AccessGroup::Restricted);
        assert!(parse_access_rule("src/**").is_err());
        assert!(parse_access_rule("src/**=secret").is_err());
    }
}
