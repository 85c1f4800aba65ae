//! SQLite-backed [`ChunkStore`].
//!
//! The primary chunk set lives in `chunks`, dense vectors in
//! `chunk_vectors`, and lexical terms in the FTS5 table `chunks_fts`. An
//! upsert rewrites all three plus the `files` row inside one transaction; in
//! WAL mode readers keep seeing the previous committed snapshot until the
//! commit, so a path's chunk set is never observed half-replaced.
//!
//! Dense search loads candidate vectors and computes cosine similarity in
//! Rust. Lexical search uses FTS5 `bm25()`, negated so higher is better.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use code_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use code_harness_core::lexical;
use code_harness_core::models::{Chunk, Span};
use code_harness_core::store::{
    rank_and_truncate, ChunkStore, RepoStats, ScoredChunk, SearchFilter, StoredVector,
};

const CHUNK_COLUMNS: &str = "c.id, c.repo_id, c.source_path, c.kind, c.span_json, c.symbol, \
     c.language, c.content, c.content_hash, c.access_group";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Delete index rows whose repository is no longer registered, left by
    /// a deregistration interrupted between its two deletes. Returns the
    /// number of rows removed.
    pub async fn purge_unregistered(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for sql in [
            "DELETE FROM chunks_fts WHERE repo_id NOT IN (SELECT id FROM repositories)",
            "DELETE FROM chunk_vectors WHERE repo_id NOT IN (SELECT id FROM repositories)",
            "DELETE FROM chunks WHERE repo_id NOT IN (SELECT id FROM repositories)",
            "DELETE FROM files WHERE repo_id NOT IN (SELECT id FROM repositories)",
        ] {
            removed += sqlx::query(sql).execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let kind: String = row.get("kind");
    let group: String = row.get("access_group");
    let span_json: String = row.get("span_json");
    let span: Span = serde_json::from_str(&span_json).context("invalid span_json")?;
    Ok(Chunk {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        source_path: row.get("source_path"),
        kind: kind.parse().map_err(|e: String| anyhow!(e))?,
        span,
        symbol: row.get("symbol"),
        language: row.get("language"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        access_group: group.parse().map_err(|e: String| anyhow!(e))?,
        dense_vector: Vec::new(),
    })
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SearchFilter) {
    if let Some(ids) = &filter.repo_ids {
        if ids.is_empty() {
            qb.push(" AND 0");
        } else {
            qb.push(" AND c.repo_id IN (");
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(id.clone());
            }
            sep.push_unseparated(")");
        }
    }
    if let Some(groups) = &filter.access_groups {
        if groups.is_empty() {
            qb.push(" AND 0");
        } else {
            qb.push(" AND c.access_group IN (");
            let mut sep = qb.separated(", ");
            for group in groups {
                sep.push_bind(group.as_str());
            }
            sep.push_unseparated(")");
        }
    }
}

/// Quote each term as an FTS5 string and OR them together.
fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn remove_path_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    repo_id: &str,
    path: &str,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM chunks_fts WHERE chunk_id IN \
         (SELECT id FROM chunks WHERE repo_id = ? AND source_path = ?)",
    )
    .bind(repo_id)
    .bind(path)
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN \
         (SELECT id FROM chunks WHERE repo_id = ? AND source_path = ?)",
    )
    .bind(repo_id)
    .bind(path)
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE repo_id = ? AND source_path = ?")
        .bind(repo_id)
        .bind(path)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn upsert(
        &self,
        repo_id: &str,
        path: &str,
        file_hash: &str,
        chunks: Vec<Chunk>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        remove_path_rows(&mut tx, repo_id, path).await?;

        for chunk in &chunks {
            let span_json = serde_json::to_string(&chunk.span)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks
                    (id, repo_id, source_path, kind, span_json, symbol, language,
                     content, content_hash, access_group)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(repo_id)
            .bind(path)
            .bind(chunk.kind.as_str())
            .bind(&span_json)
            .bind(&chunk.symbol)
            .bind(&chunk.language)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(chunk.access_group.as_str())
            .execute(&mut *tx)
            .await?;

            let terms = lexical::tokenize(&chunk.lexical_text()).join(" ");
            sqlx::query("INSERT INTO chunks_fts (chunk_id, repo_id, terms) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(repo_id)
                .bind(&terms)
                .execute(&mut *tx)
                .await?;

            if !chunk.dense_vector.is_empty() {
                sqlx::query(
                    "INSERT OR REPLACE INTO chunk_vectors (chunk_id, repo_id, dims, embedding) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(repo_id)
                .bind(chunk.dense_vector.len() as i64)
                .bind(vec_to_blob(&chunk.dense_vector))
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO files (repo_id, path, content_hash, indexed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(repo_id, path) DO UPDATE SET
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(repo_id)
        .bind(path)
        .bind(file_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_path(&self, repo_id: &str, path: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        remove_path_rows(&mut tx, repo_id, path).await?;
        let removed = sqlx::query("DELETE FROM files WHERE repo_id = ? AND path = ?")
            .bind(repo_id)
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn delete_repo(&self, repo_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for sql in [
            "DELETE FROM chunks_fts WHERE repo_id = ?",
            "DELETE FROM chunk_vectors WHERE repo_id = ?",
            "DELETE FROM chunks WHERE repo_id = ?",
            "DELETE FROM files WHERE repo_id = ?",
        ] {
            sqlx::query(sql).bind(repo_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn file_hash(&self, repo_id: &str, path: &str) -> Result<Option<String>> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM files WHERE repo_id = ? AND path = ?")
                .bind(repo_id)
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    async fn existing_vectors(
        &self,
        repo_id: &str,
        path: &str,
    ) -> Result<HashMap<String, StoredVector>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.content_hash, v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE c.repo_id = ? AND c.source_path = ?
            "#,
        )
        .bind(repo_id)
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (
                    row.get::<String, _>("id"),
                    StoredVector {
                        content_hash: row.get("content_hash"),
                        vector: blob_to_vec(&blob),
                    },
                )
            })
            .collect())
    }

    async fn list_paths(&self, repo_id: &str) -> Result<Vec<String>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT path FROM files WHERE repo_id = ? ORDER BY path")
                .bind(repo_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(paths)
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let sql = format!(
            "SELECT {}, v.embedding FROM chunks c \
             LEFT JOIN chunk_vectors v ON v.chunk_id = c.id WHERE c.id = ?",
            CHUNK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut chunk = chunk_from_row(&row)?;
                let blob: Option<Vec<u8>> = row.get("embedding");
                chunk.dense_vector = blob.map(|b| blob_to_vec(&b)).unwrap_or_default();
                Ok(Some(chunk))
            }
            None => Ok(None),
        }
    }

    async fn search_dense(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {}, v.embedding FROM chunk_vectors v JOIN chunks c ON c.id = v.chunk_id WHERE 1=1",
            CHUNK_COLUMNS
        ));
        push_filter(&mut qb, filter);
        let rows = qb.build().fetch_all(&self.pool).await?;

        // Fetch all vectors and compute cosine similarity in Rust
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
            if score > 0.0 {
                results.push(ScoredChunk {
                    chunk: chunk_from_row(row)?,
                    score,
                });
            }
        }
        rank_and_truncate(&mut results, k);
        Ok(results)
    }

    async fn search_lexical(
        &self,
        terms: &[String],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {}, bm25(chunks_fts) AS rank FROM chunks_fts \
             JOIN chunks c ON c.id = chunks_fts.chunk_id WHERE chunks_fts MATCH ",
            CHUNK_COLUMNS
        ));
        qb.push_bind(match_expression(terms));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY rank, c.id LIMIT ").push_bind(k as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let rank: f64 = row.get("rank");
            results.push(ScoredChunk {
                chunk: chunk_from_row(row)?,
                score: -rank, // negate so higher = better
            });
        }
        rank_and_truncate(&mut results, k);
        Ok(results)
    }

    async fn stats(&self, repo_id: &str) -> Result<RepoStats> {
        let file_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(RepoStats {
            file_count: file_count as u64,
            chunk_count: chunk_count as u64,
        })
    }

    async fn verify(&self, repo_id: &str) -> Result<Vec<String>> {
        let checks: [(&str, &str); 4] = [
            (
                "chunks without a file record",
                "SELECT COUNT(*) FROM chunks c WHERE c.repo_id = ?1 AND NOT EXISTS \
                 (SELECT 1 FROM files f WHERE f.repo_id = c.repo_id AND f.path = c.source_path)",
            ),
            (
                "chunks missing from the lexical index",
                "SELECT COUNT(*) FROM chunks c WHERE c.repo_id = ?1 AND NOT EXISTS \
                 (SELECT 1 FROM chunks_fts t WHERE t.chunk_id = c.id)",
            ),
            (
                "lexical entries without a chunk",
                "SELECT COUNT(*) FROM chunks_fts t WHERE t.repo_id = ?1 AND NOT EXISTS \
                 (SELECT 1 FROM chunks c WHERE c.id = t.chunk_id)",
            ),
            (
                "vectors without a chunk",
                "SELECT COUNT(*) FROM chunk_vectors v WHERE v.repo_id = ?1 AND NOT EXISTS \
                 (SELECT 1 FROM chunks c WHERE c.id = v.chunk_id)",
            ),
        ];

        let mut problems = Vec::new();
        for (label, sql) in checks {
            let count: i64 = sqlx::query_scalar(sql)
                .bind(repo_id)
                .fetch_one(&self.pool)
                .await?;
            if count > 0 {
                problems.push(format!("{} {}", count, label));
            }
        }
        Ok(problems)
    }
}
