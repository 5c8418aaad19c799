use std::path::PathBuf;

use super::types::RepoRef;

/// Filesystem layout the daemon and the lightweight client agree on,
/// derived entirely from the repository root. One daemon serves exactly one
/// repository, so there is no repository pool here — every path hangs off
/// a single `RepoRef`.
#[derive(Debug, Clone)]
pub struct StateSource {
    config_dir: PathBuf,
}

impl StateSource {
    pub fn for_repo(reporef: &RepoRef) -> Self {
        Self {
            config_dir: reporef.config_dir(),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(self.index_dir())?;
        std::fs::create_dir_all(self.temporal_dir())?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config_dir.join("daemon.sock")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.config_dir.join("index")
    }

    pub fn temporal_dir(&self) -> PathBuf {
        self.index_dir().join("temporal")
    }

    pub fn commits_db(&self) -> PathBuf {
        self.temporal_dir().join("commits.db")
    }

    pub fn blob_registry_db(&self) -> PathBuf {
        self.temporal_dir().join("blob_registry.db")
    }

    pub fn temporal_metadata_file(&self) -> PathBuf {
        self.temporal_dir().join("temporal_meta.json")
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.temporal_dir().join("checkpoint.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_and_index_paths_hang_off_config_dir() {
        let reporef = RepoRef::from_root("/tmp/some/repo").unwrap();
        let state = StateSource::for_repo(&reporef);
        assert_eq!(
            state.socket_path(),
            PathBuf::from("/tmp/some/repo/.code-indexer/daemon.sock")
        );
        assert_eq!(
            state.checkpoint_file(),
            PathBuf::from("/tmp/some/repo/.code-indexer/index/temporal/checkpoint.json")
        );
    }
}
