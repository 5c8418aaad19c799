// Current-HEAD (workspace) indexing, driven by `index(repo)` when no
// historical-commit options are given. Walks the working tree, embeds
// changed files into the semantic slot's on-disk store and reindexes them
// into the lexical slot, using the same mark-and-sweep freshness check the
// teacher's `indexes::caching::FileCache` pioneered (see that module's
// header comment) so unchanged files are neither re-embedded nor
// re-tokenized.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::application::background::IndexingPipes;
use crate::chunking::Chunker;
use crate::embedding::VectorCalculationManager;
use crate::error::DaemonError;
use crate::indexes::caching::FileCache;
use crate::indexes::indexer::LexicalIndex;
use crate::repo::filesystem::FileWalker;
use crate::semantic::index_store::{IdMap, IndexStore, PointMeta, SemanticIndex};

pub struct WorkspaceIndexer {
    chunker: Arc<dyn Chunker>,
    vector_manager: Arc<VectorCalculationManager>,
    index_store: IndexStore,
    file_cache: FileCache,
}

#[derive(Debug, Default)]
pub struct WorkspaceIndexOutcome {
    pub files_indexed: u64,
    pub files_removed: u64,
    pub vectors_created: u64,
}

impl WorkspaceIndexer {
    pub fn new(chunker: Arc<dyn Chunker>, vector_manager: Arc<VectorCalculationManager>, index_store: IndexStore, file_cache: FileCache) -> Self {
        Self { chunker, vector_manager, index_store, file_cache }
    }

    pub async fn ensure_migrated(&self) -> Result<(), DaemonError> {
        self.file_cache.migrate().await
    }

    pub async fn index(
        &self,
        repo_root: &Path,
        lexical: &LexicalIndex,
        commit_hash: &str,
        pipes: IndexingPipes,
    ) -> Result<WorkspaceIndexOutcome, DaemonError> {
        let walker = FileWalker::index_directory(repo_root);
        let total = walker.len();
        let files = walker.read_all();

        let cached: Vec<_> = self.file_cache.snapshot().await?;
        let known_hashes: std::collections::HashMap<String, String> =
            cached.into_iter().map(|k| (k.relative_path, k.content_hash)).collect();

        let (mut index, mut id_map) = match self.index_store.load()? {
            Some(pair) => pair,
            None => (SemanticIndex::new(self.index_store.dim(), 1024), IdMap::new()),
        };

        let writer = lexical.writer().map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut outcome = WorkspaceIndexOutcome::default();

        for (i, file) in files.iter().enumerate() {
            if pipes.is_cancelled() {
                break;
            }

            let relative_path = file
                .path
                .strip_prefix(repo_root)
                .unwrap_or(&file.path)
                .to_string_lossy()
                .to_string();
            seen.insert(relative_path.clone());

            let content_hash = blake3::hash(file.contents.as_bytes()).to_hex().to_string();
            pipes.report(i as u32 + 1, total as u32, relative_path.clone(), "indexing file".to_string());

            if known_hashes.get(&relative_path) == Some(&content_hash) {
                continue;
            }

            let unique_hash = format!("file:{relative_path}");
            lexical.delete_by_unique_hash(&writer, &unique_hash);

            let mut doc = tantivy::Document::new();
            doc.add_text(lexical.source.unique_hash, &unique_hash);
            doc.add_text(lexical.source.relative_path, &relative_path);
            doc.add_text(lexical.source.content, &file.contents);
            doc.add_text(lexical.source.commit_hash, commit_hash);
            writer.add_document(doc).map_err(|e| DaemonError::StorageError(e.to_string()))?;

            let chunks = self.chunker.chunk_file(&relative_path, &file.contents);
            if !chunks.is_empty() {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                match self.vector_manager.submit_chunks(texts, pipes.clone()) {
                    Ok(receivers) => {
                        for (chunk_index, receiver) in receivers.into_iter().enumerate() {
                            match receiver.await {
                                Ok(Ok(vector)) => {
                                    let point_id = index.len();
                                    index.insert(point_id, vector)?;
                                    id_map.insert(
                                        point_id,
                                        PointMeta {
                                            blob_hash: content_hash.clone(),
                                            file_path: relative_path.clone(),
                                            commit_hash: commit_hash.to_string(),
                                            chunk_index: chunk_index as u32,
                                        },
                                    );
                                    outcome.vectors_created += 1;
                                }
                                Ok(Err(DaemonError::ChunkTooLarge)) => {
                                    warn!(relative_path, "chunk too large for embedding provider; skipping chunk");
                                }
                                Ok(Err(err)) => return Err(err),
                                Err(_) => return Err(DaemonError::Cancelled),
                            }
                        }
                    }
                    Err(DaemonError::ChunkTooLarge) => {
                        warn!(relative_path, "file has a chunk exceeding the token cap; skipping file");
                    }
                    Err(err) => return Err(err),
                }
            }

            self.file_cache.upsert(&relative_path, &content_hash, &unique_hash, commit_hash).await?;
            outcome.files_indexed += 1;
        }

        let stale = self.file_cache.sweep_stale(&seen).await?;
        for relative_path in &stale {
            lexical.delete_by_unique_hash(&writer, &format!("file:{relative_path}"));
        }
        outcome.files_removed = stale.len() as u64;

        writer.commit().map_err(|e| DaemonError::StorageError(e.to_string()))?;
        lexical.refresh_reader().await.map_err(|e| DaemonError::StorageError(e.to_string()))?;

        self.index_store.flush(&index, &id_map)?;
        Ok(outcome)
    }
}
