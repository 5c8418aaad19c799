// Embedded relational storage for the Blob Registry and Commit Store,
// built on `sqlx` against SQLite. Owns the connection-setup half (WAL
// mode, busy timeout, migrations) so callers elsewhere just need an
// already-open `SqlDb` handle.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;

use crate::error::DaemonError;

/// A thin handle around a `sqlx::SqlitePool`, opened with WAL mode and a
/// busy timeout so concurrent temporal-indexer workers and daemon RPC
/// handlers can share one file without `SQLITE_BUSY` under light
/// contention.
#[derive(Clone)]
pub struct SqlDb {
    pool: SqlitePool,
}

impl SqlDb {
    pub async fn open(path: &Path) -> Result<Self, DaemonError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DaemonError::StorageError(e.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| DaemonError::StorageError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate_blob_registry(&self) -> Result<(), DaemonError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blob_registry (
                blob_hash TEXT NOT NULL,
                point_id  INTEGER NOT NULL,
                PRIMARY KEY (blob_hash, point_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blob_registry_hash ON blob_registry (blob_hash)")
            .execute(&self.pool)
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        Ok(())
    }

    pub async fn migrate_commit_store(&self) -> Result<(), DaemonError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS commits (
                hash TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                author_name TEXT NOT NULL,
                author_email TEXT NOT NULL,
                message TEXT NOT NULL,
                parent_hashes TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trees (
                commit_hash TEXT NOT NULL,
                file_path TEXT NOT NULL,
                blob_hash TEXT NOT NULL,
                PRIMARY KEY (commit_hash, file_path)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trees_blob_commit ON trees (blob_hash, commit_hash)")
            .execute(&self.pool)
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS commit_branches (
                commit_hash TEXT NOT NULL,
                branch_name TEXT NOT NULL,
                is_head INTEGER NOT NULL,
                indexed_at INTEGER NOT NULL,
                PRIMARY KEY (commit_hash, branch_name)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_commit_branches_commit ON commit_branches (commit_hash)")
            .execute(&self.pool)
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_commit_branches_branch ON commit_branches (branch_name)")
            .execute(&self.pool)
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        Ok(())
    }
}
