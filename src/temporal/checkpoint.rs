// Checkpoint file: durable resume marker written every `checkpoint_interval`
// commits during temporal indexing, and deleted on successful completion.
// Writes are atomic (temp file + rename) so a reader never observes a
// torn write, the same discipline `application::config`'s `config.json`
// round-trip uses for other durable-but-small files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp_unix_secs: i64,
    pub last_commit: String,
    pub commits_processed: u64,
    pub total_blobs: u64,
    pub total_vectors: u64,
    pub all_branches: Vec<String>,
    pub repo_identity_hash: String,
}

const CURRENT_VERSION: u32 = 1;

impl Checkpoint {
    pub fn new(repo_identity_hash: String) -> Self {
        Self {
            version: CURRENT_VERSION,
            timestamp_unix_secs: 0,
            last_commit: String::new(),
            commits_processed: 0,
            total_blobs: 0,
            total_vectors: 0,
            all_branches: Vec::new(),
            repo_identity_hash,
        }
    }

    pub fn write_atomic(&self, path: &Path) -> Result<(), DaemonError> {
        let encoded = serde_json::to_vec_pretty(self).map_err(|e| DaemonError::StorageError(e.to_string()))?;
        atomic_write(path, &encoded)
    }

    /// Returns `Ok(None)` when the file is absent, corrupt, or fails the
    /// repo-identity check: all three are treated as "no checkpoint",
    /// so the caller starts from the beginning of history.
    pub fn read_if_valid(path: &Path, expected_repo_identity_hash: &str) -> Option<Self> {
        let raw = std::fs::read(path).ok()?;
        let checkpoint: Checkpoint = serde_json::from_slice(&raw).ok()?;
        if checkpoint.repo_identity_hash != expected_repo_identity_hash {
            return None;
        }
        Some(checkpoint)
    }

    pub fn delete(path: &Path) -> Result<(), DaemonError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::StorageError(e.to_string())),
        }
    }
}

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), DaemonError> {
    let parent = path.parent().ok_or_else(|| DaemonError::StorageError("checkpoint path has no parent".into()))?;
    std::fs::create_dir_all(parent).map_err(|e| DaemonError::StorageError(e.to_string()))?;

    let mut tmp_path: PathBuf = parent.to_path_buf();
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint");
    tmp_path.push(format!(".{file_name}.tmp"));

    std::fs::write(&tmp_path, bytes).map_err(|e| DaemonError::StorageError(e.to_string()))?;
    std::fs::rename(&tmp_path, path).map_err(|e| DaemonError::StorageError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = Checkpoint::new("repo-id".to_string());
        checkpoint.last_commit = "abc123".to_string();
        checkpoint.commits_processed = 1000;
        checkpoint.write_atomic(&path).unwrap();

        let loaded = Checkpoint::read_if_valid(&path, "repo-id").unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn mismatched_repo_identity_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        Checkpoint::new("repo-a".to_string()).write_atomic(&path).unwrap();
        assert!(Checkpoint::read_if_valid(&path, "repo-b").is_none());
    }

    #[test]
    fn corrupt_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(Checkpoint::read_if_valid(&path, "repo-id").is_none());
    }

    #[test]
    fn delete_is_idempotent_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        Checkpoint::delete(&path).unwrap();
        Checkpoint::delete(&path).unwrap();
    }
}
