// File-level incremental cache for current-HEAD (workspace) indexing.
// Mark-and-sweep: every file walked this run is marked fresh against the
// previous run's cache rows; rows still stale afterward name files that
// disappeared since the last index and are deleted from both the SQL
// cache and the lexical index. This daemon serves one repository, so the
// table is keyed on `relative_path` alone and the in-memory freshness set
// is a plain `HashSet`.

use std::collections::HashSet;

use crate::error::DaemonError;
use crate::storage::sql::SqlDb;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub relative_path: String,
    pub content_hash: String,
}

pub struct FileCache {
    sql: SqlDb,
}

impl FileCache {
    pub fn new(sql: SqlDb) -> Self {
        Self { sql }
    }

    pub async fn migrate(&self) -> Result<(), DaemonError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file_cache (
                relative_path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                unique_hash TEXT NOT NULL,
                commit_hash TEXT NOT NULL
            )",
        )
        .execute(self.sql.pool())
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// All cached rows as of the start of this run, for freshness checks.
    pub async fn snapshot(&self) -> Result<Vec<CacheKey>, DaemonError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT relative_path, content_hash FROM file_cache")
                .fetch_all(self.sql.pool())
                .await
                .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|(relative_path, content_hash)| CacheKey { relative_path, content_hash })
            .collect())
    }

    pub async fn upsert(&self, relative_path: &str, content_hash: &str, unique_hash: &str, commit_hash: &str) -> Result<(), DaemonError> {
        sqlx::query(
            "INSERT INTO file_cache (relative_path, content_hash, unique_hash, commit_hash) VALUES (?, ?, ?, ?)
             ON CONFLICT(relative_path) DO UPDATE SET content_hash = excluded.content_hash, unique_hash = excluded.unique_hash, commit_hash = excluded.commit_hash",
        )
        .bind(relative_path)
        .bind(content_hash)
        .bind(unique_hash)
        .bind(commit_hash)
        .execute(self.sql.pool())
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Deletes every cached row whose `relative_path` is not in `seen`,
    /// returning the deleted paths so the caller can remove them from the
    /// lexical/semantic slots too.
    pub async fn sweep_stale(&self, seen: &HashSet<String>) -> Result<Vec<String>, DaemonError> {
        let all: Vec<(String,)> = sqlx::query_as("SELECT relative_path FROM file_cache")
            .fetch_all(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let stale: Vec<String> = all
            .into_iter()
            .map(|(path,)| path)
            .filter(|path| !seen.contains(path))
            .collect();

        for path in &stale {
            sqlx::query("DELETE FROM file_cache WHERE relative_path = ?")
                .bind(path)
                .execute(self.sql.pool())
                .await
                .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        }

        Ok(stale)
    }

    pub async fn clear(&self) -> Result<(), DaemonError> {
        sqlx::query("DELETE FROM file_cache")
            .execute(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, FileCache) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlDb::open(&dir.path().join("file_cache.db")).await.unwrap();
        let cache = FileCache::new(db);
        cache.migrate().await.unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn sweep_removes_only_rows_not_seen_this_run() {
        let (_dir, cache) = open_temp().await;
        cache.upsert("a.rs", "hash-a", "u-a", "c1").await.unwrap();
        cache.upsert("b.rs", "hash-b", "u-b", "c1").await.unwrap();

        let mut seen = HashSet::new();
        seen.insert("a.rs".to_string());

        let stale = cache.sweep_stale(&seen).await.unwrap();
        assert_eq!(stale, vec!["b.rs".to_string()]);

        let remaining = cache.snapshot().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].relative_path, "a.rs");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_relative_path() {
        let (_dir, cache) = open_temp().await;
        cache.upsert("a.rs", "hash-1", "u", "c1").await.unwrap();
        cache.upsert("a.rs", "hash-2", "u", "c1").await.unwrap();
        let snapshot = cache.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content_hash, "hash-2");
    }
}
