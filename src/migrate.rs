use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table and index if missing. Safe to run on each startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create repositories table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            root_path TEXT NOT NULL,
            ignore_json TEXT NOT NULL DEFAULT '[]',
            access_rules_json TEXT NOT NULL DEFAULT '[]',
            default_access TEXT NOT NULL DEFAULT 'PUBLIC',
            status TEXT NOT NULL,
            progress INTEGER,
            last_indexed_at INTEGER,
            last_error TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per indexed file, including files that produced no chunks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            repo_id TEXT NOT NULL,
            path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (repo_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            span_json TEXT NOT NULL,
            symbol TEXT,
            language TEXT,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            access_group TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunk_vectors table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        // `_` is a token character so snake_case identifiers stay whole.
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                repo_id UNINDEXED,
                terms,
                tokenize = "unicode61 tokenchars '_'"
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_repo_path ON chunks(repo_id, source_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_repo ON chunk_vectors(repo_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("chx.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('repositories','files','chunks','chunk_vectors','chunks_fts') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["chunk_vectors", "chunks", "chunks_fts", "files", "repositories"]
        );
    }
}
