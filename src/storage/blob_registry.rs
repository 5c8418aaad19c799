// Blob-hash deduplication table: `(blob_hash, point_id)` with uniqueness on
// the pair, so a blob reachable from many commits is embedded at most once
// per project. Writes are `INSERT OR IGNORE`, matching the idempotence the
// design requires for re-running `index_commits` after a partial or
// completed pass.

use crate::error::DaemonError;
use crate::semantic::index_store::PointId;

use super::sql::SqlDb;

pub struct BlobRegistry {
    sql: SqlDb,
}

impl BlobRegistry {
    pub fn new(sql: SqlDb) -> Self {
        Self { sql }
    }

    pub async fn has(&self, blob_hash: &str) -> Result<bool, DaemonError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM blob_registry WHERE blob_hash = ? LIMIT 1")
            .bind(blob_hash)
            .fetch_optional(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(row.is_some())
    }

    pub async fn register(&self, blob_hash: &str, point_id: PointId) -> Result<(), DaemonError> {
        sqlx::query("INSERT OR IGNORE INTO blob_registry (blob_hash, point_id) VALUES (?, ?)")
            .bind(blob_hash)
            .bind(point_id as i64)
            .execute(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub async fn register_many(&self, rows: &[(String, PointId)]) -> Result<(), DaemonError> {
        let mut tx = self.sql.pool().begin().await.map_err(|e| DaemonError::StorageError(e.to_string()))?;
        for (blob_hash, point_id) in rows {
            sqlx::query("INSERT OR IGNORE INTO blob_registry (blob_hash, point_id) VALUES (?, ?)")
                .bind(blob_hash)
                .bind(*point_id as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub async fn point_count(&self, blob_hash: &str) -> Result<u64, DaemonError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blob_registry WHERE blob_hash = ?")
            .bind(blob_hash)
            .fetch_one(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(row.0 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, SqlDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlDb::open(&dir.path().join("blob_registry.db")).await.unwrap();
        db.migrate_blob_registry().await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn has_is_false_until_registered() {
        let (_dir, db) = open_temp().await;
        let registry = BlobRegistry::new(db);
        assert!(!registry.has("deadbeef").await.unwrap());
        registry.register("deadbeef", 1).await.unwrap();
        assert!(registry.has("deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn register_is_idempotent_for_the_same_pair() {
        let (_dir, db) = open_temp().await;
        let registry = BlobRegistry::new(db);
        registry.register("deadbeef", 1).await.unwrap();
        registry.register("deadbeef", 1).await.unwrap();
        assert_eq!(registry.point_count("deadbeef").await.unwrap(), 1);
    }
}
