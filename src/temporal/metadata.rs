// Temporal Metadata: a single file-backed document summarizing the state
// of historical indexing for this repository, rewritten atomically at the
// end of each `index_commits` run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::temporal::checkpoint::atomic_write;
use crate::temporal::indexer::BranchStrategy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalMetadata {
    pub last_indexed_commit: String,
    pub index_version: u32,
    pub total_commits: u64,
    pub total_unique_blobs: u64,
    pub deduplication_ratio: f64,
    pub indexing_mode: BranchStrategy,
    pub indexed_branches: Vec<String>,
    pub last_updated_unix_secs: i64,
    pub incremental_updates: u64,
}

const CURRENT_VERSION: u32 = 1;

impl TemporalMetadata {
    pub fn empty() -> Self {
        Self {
            last_indexed_commit: String::new(),
            index_version: CURRENT_VERSION,
            total_commits: 0,
            total_unique_blobs: 0,
            deduplication_ratio: 0.0,
            indexing_mode: BranchStrategy::Current,
            indexed_branches: Vec::new(),
            last_updated_unix_secs: 0,
            incremental_updates: 0,
        }
    }

    pub fn read(path: &Path) -> Option<Self> {
        let raw = std::fs::read(path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn write_atomic(&self, path: &Path) -> Result<(), DaemonError> {
        let encoded = serde_json::to_vec_pretty(self).map_err(|e| DaemonError::StorageError(e.to_string()))?;
        atomic_write(path, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temporal_meta.json");
        let mut meta = TemporalMetadata::empty();
        meta.total_commits = 42;
        meta.indexing_mode = BranchStrategy::All;
        meta.write_atomic(&path).unwrap();

        let loaded = TemporalMetadata::read(&path).unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TemporalMetadata::read(&dir.path().join("absent.json")).is_none());
    }
}
