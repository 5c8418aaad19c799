use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identity of the single repository this daemon serves. One daemon, one
/// repository, identified by its absolute root on disk: there is no
/// `RepositoryPool` here, only a single `RepoRef`.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RepoRef {
    root: PathBuf,
}

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("local repository must have an absolute path")]
    NonAbsoluteLocal,
    #[error("paths can't contain `..` or `.`")]
    InvalidPath,
    #[error("indexing error")]
    Anyhow {
        #[from]
        error: anyhow::Error,
    },
}

impl RepoRef {
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self, RepoError> {
        let root = root.as_ref();
        if !root.is_absolute() {
            return Err(RepoError::NonAbsoluteLocal);
        }
        if root.components().any(|c| {
            matches!(
                c,
                std::path::Component::CurDir | std::path::Component::ParentDir
            )
        }) {
            return Err(RepoError::InvalidPath);
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory this daemon persists its state under: `<root>/.code-indexer`.
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(".code-indexer")
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

/// Freshness facts about the repository on disk, gathered once per
/// indexing pass and threaded through the indexable sources.
#[derive(Debug, Clone, Default)]
pub struct RepoMetadata {
    pub last_commit_unix_secs: Option<i64>,
    pub commit_hash: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Error { message: String },
    Uninitialized,
    Cancelling,
    Cancelled,
    Queued,
    Syncing,
    Indexing,
    Done,
    Removed,
}

impl SyncStatus {
    pub fn indexable(&self) -> bool {
        matches!(self, Self::Done | Self::Queued | Self::Error { .. })
    }
}
