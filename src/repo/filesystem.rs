// Walks the working tree for the daemon's single repository. There is no
// dispatch layer choosing between a git-aware and a plain filesystem walk:
// this daemon always walks current-HEAD working-tree state for its
// workspace index and leaves history traversal entirely to the temporal
// indexer.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

pub const AVG_LINE_LEN: u64 = 30;
pub const MAX_LINE_COUNT: u64 = 20000;
pub const MAX_FILE_LEN: u64 = AVG_LINE_LEN * MAX_LINE_COUNT;

pub struct RepositoryFile {
    pub path: PathBuf,
    pub contents: String,
}

pub struct FileWalker {
    pub file_list: Vec<PathBuf>,
}

impl FileWalker {
    pub fn index_directory(dir: impl AsRef<Path>) -> FileWalker {
        // Note: this WILL observe .gitignore files for the repo.
        let walker = WalkBuilder::new(&dir).standard_filters(true).hidden(false).build();

        let file_list = walker
            .filter_map(|de| de.ok())
            .filter(|de| matches!(de.file_type(), Some(ft) if ft.is_file()))
            .filter(|de| matches!(de.metadata(), Ok(meta) if meta.len() < MAX_FILE_LEN))
            .filter_map(|de| std::fs::canonicalize(de.into_path()).ok())
            .collect();

        Self { file_list }
    }

    pub fn len(&self) -> usize {
        self.file_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_list.is_empty()
    }

    /// Reads every walked file in parallel, skipping anything that isn't
    /// valid UTF-8 (binary assets, mostly).
    pub fn read_all(self) -> Vec<RepositoryFile> {
        use rayon::prelude::*;

        self.file_list
            .into_par_iter()
            .filter_map(|path| {
                let contents = std::fs::read_to_string(&path).ok()?;
                Some(RepositoryFile { path, contents })
            })
            .collect()
    }
}
