// In-process standalone execution: the fallback path when a daemon is
// disabled, unreachable after retries, or exhausts crash-recovery. Runs
// the same workspace indexing / querying code the daemon uses, but loads
// indexes fresh for this one invocation and drops them on exit instead of
// keeping them hot; there is no cache to warm here, by definition.

use std::path::PathBuf;
use std::sync::Arc;

use crate::application::background::IndexingPipes;
use crate::application::config::configuration::Configuration;
use crate::chunking::TokenWindowChunker;
use crate::daemon::protocol::{ResultSource, SearchHit};
use crate::embedding::provider::OpenAiEmbeddingProvider;
use crate::embedding::VectorCalculationManager;
use crate::error::DaemonError;
use crate::indexes::caching::FileCache;
use crate::indexes::indexer::LexicalIndex;
use crate::indexes::workspace::WorkspaceIndexer;
use crate::repo::state::StateSource;
use crate::repo::types::RepoRef;
use crate::semantic::index_store::IndexStore;
use crate::storage::sql::SqlDb;

pub struct StandaloneRunner {
    reporef: RepoRef,
    state: StateSource,
    config: Configuration,
}

impl StandaloneRunner {
    pub fn new(reporef: RepoRef, config: Configuration) -> Self {
        let state = StateSource::for_repo(&reporef);
        Self { reporef, state, config }
    }

    fn embedding_model() -> &'static str {
        "text-embedding-3-small"
    }

    fn embedding_dim() -> usize {
        1536
    }

    async fn vector_manager(&self) -> Arc<VectorCalculationManager> {
        let provider = Arc::new(OpenAiEmbeddingProvider::new(Self::embedding_model(), Self::embedding_dim(), self.config.max_batch_tokens));
        Arc::new(VectorCalculationManager::new(provider, self.config.embedding_worker_count).expect("tokenizer to load"))
    }

    pub async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, DaemonError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let index_store = IndexStore::new(self.state.index_dir(), Self::embedding_dim());
        let Some((index, id_map)) = index_store.load()? else {
            return Ok(Vec::new());
        };

        let vector_manager = self.vector_manager().await;
        let pipes = IndexingPipes::detached();
        let receivers = vector_manager.submit_chunks(vec![text.to_string()], pipes)?;
        let vector = receivers
            .into_iter()
            .next()
            .expect("one receiver for one text")
            .await
            .map_err(|_| DaemonError::Cancelled)??;

        let hits = index
            .search(&vector, limit)
            .into_iter()
            .filter_map(|(point_id, score)| {
                id_map.get(&point_id).map(|meta| SearchHit {
                    point_id: Some(point_id),
                    file_path: meta.file_path.clone(),
                    snippet: String::new(),
                    score,
                    source: ResultSource::Semantic,
                })
            })
            .collect();
        Ok(hits)
    }

    pub async fn query_fts(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, DaemonError> {
        let lexical_dir = self.state.index_dir().join("lexical");
        let Some(lexical) = LexicalIndex::load_if_exists(&lexical_dir, self.config.reindex_threads, self.config.reindex_buffer_size)
            .map_err(|e| DaemonError::StorageError(e.to_string()))?
        else {
            return Err(DaemonError::FtsUnavailable);
        };

        let docs = lexical.search(text, limit).await.map_err(|e| DaemonError::StorageError(e.to_string()))?;
        Ok(docs
            .into_iter()
            .map(|doc| SearchHit {
                point_id: None,
                file_path: doc.relative_path,
                snippet: doc.content.chars().take(240).collect(),
                score: 0.0,
                source: ResultSource::Lexical,
            })
            .collect())
    }

    pub async fn index(&self) -> Result<(), DaemonError> {
        self.state.ensure_dirs().map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let sql = SqlDb::open(&self.state.index_dir().join("cache.db")).await?;
        let file_cache = FileCache::new(sql);
        file_cache.migrate().await?;

        let chunker = Arc::new(TokenWindowChunker::new(800, 20).map_err(|e| DaemonError::StorageError(e.to_string()))?);
        let vector_manager = self.vector_manager().await;
        let index_store = IndexStore::new(self.state.index_dir(), Self::embedding_dim());
        let workspace_indexer = WorkspaceIndexer::new(chunker, vector_manager, index_store, file_cache);

        let lexical_dir = self.state.index_dir().join("lexical");
        let lexical = LexicalIndex::create(&lexical_dir, self.config.reindex_threads, self.config.reindex_buffer_size)
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let commit_hash = crate::temporal::git::GitRepo::open(self.reporef.root())
            .and_then(|g| g.current_head_commit_hash())
            .unwrap_or_default();

        workspace_indexer
            .index(self.reporef.root(), &lexical, &commit_hash, IndexingPipes::detached())
            .await?;
        Ok(())
    }

    pub fn clean(&self, all_data: bool) -> Result<(), DaemonError> {
        let index_store = IndexStore::new(self.state.index_dir(), Self::embedding_dim());
        let scope = if all_data {
            crate::semantic::index_store::CleanScope::AllData
        } else {
            crate::semantic::index_store::CleanScope::IndexOnly
        };
        index_store.clean(scope)
    }

    pub fn repo_root(&self) -> PathBuf {
        self.reporef.root().to_path_buf()
    }
}
