// `commits` / `trees` / `commit_branches` persistence. Per-commit writes
// use `INSERT OR REPLACE` so a reattempted commit (one that failed mid-way
// on a prior run and was therefore never recorded) simply overwrites
// whatever partial state a previous attempt left behind.

use crate::error::DaemonError;

use super::sql::SqlDb;

#[derive(Debug, Clone)]
pub struct CommitRow {
    pub hash: String,
    pub timestamp: i64,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub parent_hashes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TreeRow {
    pub file_path: String,
    pub blob_hash: String,
}

#[derive(Debug, Clone)]
pub struct CommitBranchRow {
    pub branch_name: String,
    pub is_head: bool,
    pub indexed_at: i64,
}

pub struct CommitStore {
    sql: SqlDb,
}

impl CommitStore {
    pub fn new(sql: SqlDb) -> Self {
        Self { sql }
    }

    /// Writes a commit row, its tree rows and its branch rows in a single
    /// transaction, so the commit graph is never observable in a partial
    /// state (the design's invariant: "every commit processed is
    /// accompanied by its trees rows before progression").
    pub async fn record_commit(
        &self,
        commit: &CommitRow,
        trees: &[TreeRow],
        branches: &[CommitBranchRow],
    ) -> Result<(), DaemonError> {
        let mut tx = self.sql.pool().begin().await.map_err(|e| DaemonError::StorageError(e.to_string()))?;

        sqlx::query(
            "INSERT OR REPLACE INTO commits (hash, timestamp, author_name, author_email, message, parent_hashes)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&commit.hash)
        .bind(commit.timestamp)
        .bind(&commit.author_name)
        .bind(&commit.author_email)
        .bind(&commit.message)
        .bind(commit.parent_hashes.join(","))
        .execute(&mut *tx)
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        for tree in trees {
            sqlx::query(
                "INSERT OR REPLACE INTO trees (commit_hash, file_path, blob_hash) VALUES (?, ?, ?)",
            )
            .bind(&commit.hash)
            .bind(&tree.file_path)
            .bind(&tree.blob_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        }

        for branch in branches {
            sqlx::query(
                "INSERT OR REPLACE INTO commit_branches (commit_hash, branch_name, is_head, indexed_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&commit.hash)
            .bind(&branch.branch_name)
            .bind(branch.is_head as i64)
            .bind(branch.indexed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub async fn has_commit(&self, hash: &str) -> Result<bool, DaemonError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM commits WHERE hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(row.is_some())
    }

    pub async fn total_commits(&self) -> Result<u64, DaemonError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM commits")
            .fetch_one(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(row.0 as u64)
    }

    pub async fn total_unique_blobs(&self) -> Result<u64, DaemonError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT blob_hash) FROM trees")
            .fetch_one(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(row.0 as u64)
    }

    pub async fn branches_for(&self, commit_hash: &str) -> Result<Vec<String>, DaemonError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT branch_name FROM commit_branches WHERE commit_hash = ?")
            .bind(commit_hash)
            .fetch_all(self.sql.pool())
            .await
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(rows.into_iter().map(|(b,)| b).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, SqlDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlDb::open(&dir.path().join("commits.db")).await.unwrap();
        db.migrate_commit_store().await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn recorded_commit_carries_its_trees_and_branches() {
        let (_dir, db) = open_temp().await;
        let store = CommitStore::new(db);

        let commit = CommitRow {
            hash: "abc123".into(),
            timestamp: 1_700_000_000,
            author_name: "dev".into(),
            author_email: "dev@example.com".into(),
            message: "initial commit".into(),
            parent_hashes: vec![],
        };
        let trees = vec![TreeRow { file_path: "a.rs".into(), blob_hash: "blob1".into() }];
        let branches = vec![CommitBranchRow { branch_name: "main".into(), is_head: true, indexed_at: 1_700_000_001 }];

        store.record_commit(&commit, &trees, &branches).await.unwrap();

        assert!(store.has_commit("abc123").await.unwrap());
        assert_eq!(store.total_commits().await.unwrap(), 1);
        assert_eq!(store.total_unique_blobs().await.unwrap(), 1);
        assert_eq!(store.branches_for("abc123").await.unwrap(), vec!["main".to_string()]);
    }

    #[tokio::test]
    async fn reattempting_a_commit_replaces_rather_than_duplicates() {
        let (_dir, db) = open_temp().await;
        let store = CommitStore::new(db);
        let commit = CommitRow {
            hash: "abc123".into(),
            timestamp: 1,
            author_name: "dev".into(),
            author_email: "dev@example.com".into(),
            message: "m".into(),
            parent_hashes: vec![],
        };
        store.record_commit(&commit, &[], &[]).await.unwrap();
        store.record_commit(&commit, &[], &[]).await.unwrap();
        assert_eq!(store.total_commits().await.unwrap(), 1);
    }
}
