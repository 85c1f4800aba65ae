//! Persistent repository registry.
//!
//! Each managed repository is one row in `repositories`. File and chunk
//! counts are not stored; they are read from the chunk store tables on
//! every lookup so they can never drift from what search actually sees.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use code_harness_core::access::{derive_repo_id, AccessClassifier};
use code_harness_core::error::{HarnessError, Result};
use code_harness_core::ignore::IgnoreMatcher;
use code_harness_core::models::{AccessGroup, AccessRule, RepoStatus, Repository};

/// Arguments to [`Registry::register`].
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub name: String,
    pub root_path: PathBuf,
    /// `None` applies the configured default ignore set.
    pub ignore_patterns: Option<Vec<String>>,
    pub access_rules: Vec<AccessRule>,
    pub default_access: AccessGroup,
}

impl NewRepository {
    pub fn new(name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.into(),
            ignore_patterns: None,
            access_rules: Vec::new(),
            default_access: AccessGroup::Public,
        }
    }

    pub fn with_ignore(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = Some(patterns);
        self
    }

    pub fn with_access_rules(mut self, rules: Vec<AccessRule>) -> Self {
        self.access_rules = rules;
        self
    }
}

const SELECT_REPOSITORY: &str = r#"
    SELECT r.id, r.name, r.root_path, r.ignore_json, r.access_rules_json, r.default_access,
           r.status, r.progress, r.last_indexed_at, r.last_error,
           (SELECT COUNT(*) FROM files f WHERE f.repo_id = r.id) AS file_count,
           (SELECT COUNT(*) FROM chunks c WHERE c.repo_id = r.id) AS chunk_count
    FROM repositories r
"#;

fn db_err(e: sqlx::Error) -> HarnessError {
    HarnessError::Store(e.into())
}

fn decode_err(what: &str, detail: impl ToString) -> HarnessError {
    HarnessError::Store(anyhow::anyhow!("invalid {} in registry: {}", what, detail.to_string()))
}

fn repository_from_row(row: &SqliteRow) -> Result<Repository> {
    let ignore_json: String = row.get("ignore_json");
    let rules_json: String = row.get("access_rules_json");
    let default_access: String = row.get("default_access");
    let status: String = row.get("status");
    let progress: Option<i64> = row.get("progress");
    let last_indexed_at: Option<i64> = row.get("last_indexed_at");
    let root_path: String = row.get("root_path");
    let file_count: i64 = row.get("file_count");
    let chunk_count: i64 = row.get("chunk_count");

    Ok(Repository {
        id: row.get("id"),
        name: row.get("name"),
        root_path: PathBuf::from(root_path),
        ignore_patterns: serde_json::from_str(&ignore_json)
            .map_err(|e| decode_err("ignore_json", e))?,
        access_rules: serde_json::from_str(&rules_json)
            .map_err(|e| decode_err("access_rules_json", e))?,
        default_access: default_access
            .parse()
            .map_err(|e: String| decode_err("default_access", e))?,
        status: status.parse().map_err(|e: String| decode_err("status", e))?,
        progress: progress.map(|p| p.clamp(0, 100) as u8),
        file_count: file_count as u64,
        chunk_count: chunk_count as u64,
        last_indexed_at: last_indexed_at.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        last_error: row.get("last_error"),
    })
}

#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
    default_ignore: Vec<String>,
}

impl Registry {
    pub fn new(pool: SqlitePool, default_ignore: Vec<String>) -> Self {
        Self {
            pool,
            default_ignore,
        }
    }

    /// Validate and persist a new repository with status ACTIVE.
    ///
    /// Fails with `PathInaccessible` when the root is not a readable
    /// directory, `InvalidPattern` for a bad ignore or access glob, and
    /// `DuplicateRepository` when the derived id is taken.
    pub async fn register(&self, new: NewRepository) -> Result<Repository> {
        let id = derive_repo_id(&new.name)?;
        let root = canonical_dir(&new.root_path)?;

        let ignore_patterns = new
            .ignore_patterns
            .unwrap_or_else(|| self.default_ignore.clone());
        IgnoreMatcher::new(&ignore_patterns)?;
        AccessClassifier::new(&new.access_rules, new.default_access)?;

        let ignore_json = serde_json::to_string(&ignore_patterns).map_err(anyhow::Error::from)?;
        let rules_json = serde_json::to_string(&new.access_rules).map_err(anyhow::Error::from)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO repositories
                (id, name, root_path, ignore_json, access_rules_json, default_access,
                 status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(new.name.trim())
        .bind(root.to_string_lossy().as_ref())
        .bind(&ignore_json)
        .bind(&rules_json)
        .bind(new.default_access.as_str())
        .bind(RepoStatus::Active.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if inserted == 0 {
            return Err(HarnessError::DuplicateRepository(id));
        }
        tracing::info!(repo_id = %id, root = %root.display(), "registered repository");
        self.get(&id).await
    }

    /// Remove the registry row. Chunk cleanup is the caller's job.
    pub async fn deregister(&self, id: &str) -> Result<()> {
        let removed = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        if removed == 0 {
            return Err(HarnessError::RepositoryNotFound(id.to_string()));
        }
        tracing::info!(repo_id = %id, "deregistered repository");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Repository> {
        let sql = format!("{} WHERE r.id = ?", SELECT_REPOSITORY);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| HarnessError::RepositoryNotFound(id.to_string()))?;
        repository_from_row(&row)
    }

    pub async fn list(&self) -> Result<Vec<Repository>> {
        let sql = format!("{} ORDER BY r.id", SELECT_REPOSITORY);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(repository_from_row).collect()
    }

    /// Enter INDEXING with progress 0.
    pub async fn begin_indexing(&self, id: &str) -> Result<()> {
        self.update(
            id,
            "UPDATE repositories SET status = ?, progress = 0, last_error = NULL WHERE id = ?",
            RepoStatus::Indexing.as_str(),
        )
        .await
    }

    pub async fn set_progress(&self, id: &str, percent: u8) -> Result<()> {
        sqlx::query("UPDATE repositories SET progress = ? WHERE id = ? AND status = ?")
            .bind(percent.min(100) as i64)
            .bind(id)
            .bind(RepoStatus::Indexing.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Back to ACTIVE after a completed (or cancelled) index pass.
    pub async fn mark_active(&self, id: &str) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE repositories SET status = ?, progress = NULL, last_error = NULL, \
             last_indexed_at = ? WHERE id = ?",
        )
        .bind(RepoStatus::Active.as_str())
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if affected == 0 {
            return Err(HarnessError::RepositoryNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_error(&self, id: &str, reason: &str) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE repositories SET status = ?, progress = NULL, last_error = ? WHERE id = ?",
        )
        .bind(RepoStatus::Error.as_str())
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if affected == 0 {
            return Err(HarnessError::RepositoryNotFound(id.to_string()));
        }
        tracing::warn!(repo_id = %id, reason, "repository marked ERROR");
        Ok(())
    }

    async fn update(&self, id: &str, sql: &str, status: &str) -> Result<()> {
        let affected = sqlx::query(sql)
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        if affected == 0 {
            return Err(HarnessError::RepositoryNotFound(id.to_string()));
        }
        Ok(())
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .map_err(|_| HarnessError::PathInaccessible(path.to_path_buf()))?;
    if !root.is_dir() {
        return Err(HarnessError::PathInaccessible(path.to_path_buf()));
    }
    Ok(root)
}

/// Timestamp helper shared with the CLI printers.
pub fn format_indexed_at(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> Registry {
        let pool = db::connect_path(&tmp.path().join("chx.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Registry::new(pool, vec!["node_modules".to_string(), "*.log".to_string()])
    }

    #[tokio::test]
    async fn register_applies_default_ignore_and_derives_id() {
        let tmp = TempDir::new().unwrap();
        let registry = open(&tmp).await;
        let repo = registry
            .register(NewRepository::new("Main Backend", tmp.path()))
            .await
            .unwrap();
        assert_eq!(repo.id, "main-backend");
        assert_eq!(repo.status, RepoStatus::Active);
        assert_eq!(repo.ignore_patterns, vec!["node_modules", "*.log"]);
        assert_eq!(repo.chunk_count, 0);
        assert!(repo.last_indexed_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let registry = open(&tmp).await;
        registry
            .register(NewRepository::new("proj", tmp.path()))
            .await
            .unwrap();
        let err = registry
            .register(NewRepository::new("PROJ", tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateRepository(id) if id == "proj"));
    }

    #[tokio::test]
    async fn missing_root_is_inaccessible() {
        let tmp = TempDir::new().unwrap();
        let registry = open(&tmp).await;
        let err = registry
            .register(NewRepository::new("ghost", tmp.path().join("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::PathInaccessible(_)));
    }

    #[tokio::test]
    async fn status_transitions_persist() {
        let tmp = TempDir::new().unwrap();
        let registry = open(&tmp).await;
        registry
            .register(NewRepository::new("proj", tmp.path()).with_ignore(vec![]))
            .await
            .unwrap();

        registry.begin_indexing("proj").await.unwrap();
        registry.set_progress("proj", 40).await.unwrap();
        let repo = registry.get("proj").await.unwrap();
        assert_eq!(repo.status, RepoStatus::Indexing);
        assert_eq!(repo.progress, Some(40));

        registry.mark_error("proj", "root vanished").await.unwrap();
        let repo = registry.get("proj").await.unwrap();
        assert_eq!(repo.status, RepoStatus::Error);
        assert_eq!(repo.last_error.as_deref(), Some("root vanished"));

        registry.mark_active("proj").await.unwrap();
        let repo = registry.get("proj").await.unwrap();
        assert_eq!(repo.status, RepoStatus::Active);
        assert!(repo.progress.is_none());
        assert!(repo.last_indexed_at.is_some());
    }

    #[tokio::test]
    async fn deregister_unknown_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let registry = open(&tmp).await;
        assert!(matches!(
            registry.deregister("nope").await,
            Err(HarnessError::RepositoryNotFound(_))
        ));
        assert!(registry.list().await.unwrap().is_empty());
    }
}
