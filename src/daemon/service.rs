// The daemon's RPC dispatcher and orchestrator: owns the Cache Entry, the
// embedding/chunking stack, and the watch handler for the single repository
// this process serves, and turns each [`Request`] into the indexing/query
// calls spread across `indexes`, `semantic`, `temporal` and `watch`. Holds
// one repository's state and a socket RPC dispatcher (see
// `daemon::connection`).

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::application::background::{IndexingPipes, ProgressMessage};
use crate::application::config::configuration::Configuration;
use crate::cache::CacheEntry;
use crate::chunking::{Chunker, TokenWindowChunker};
use crate::daemon::connection::{send_progress, Conn};
use crate::daemon::protocol::{
    CacheStatus, CleanResult, CostEstimateResult, GetStatusResult, HybridMergeMode, IndexCommitsArgs,
    IndexCommitsResult, Request, ResultSource, Response, SearchHit, StatusResult, StorageStatus,
    WatchStartStatus, WatchStatusResult, WatchStopResult, WatchStopStatus as WireWatchStopStatus,
};
use crate::embedding::provider::OpenAiEmbeddingProvider;
use crate::embedding::VectorCalculationManager;
use crate::error::DaemonError;
use crate::indexes::caching::FileCache;
use crate::indexes::indexer::LexicalIndex;
use crate::indexes::workspace::WorkspaceIndexer;
use crate::repo::state::StateSource;
use crate::repo::types::RepoRef;
use crate::semantic::index_store::{CleanScope, IndexStore};
use crate::storage::blob_registry::BlobRegistry;
use crate::storage::commit_store::CommitStore;
use crate::storage::sql::SqlDb;
use crate::temporal::blob_processor::HistoricalBlobProcessor;
use crate::temporal::git::GitRepo;
use crate::temporal::indexer::{ResolvedStrategy, TemporalIndexer};
use crate::watch::{WatchHandle, WatchHandler};

const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const EMBEDDING_DIM: usize = 1536;

pub struct DaemonService {
    reporef: RepoRef,
    config: Configuration,
    state: StateSource,
    cache: Arc<CacheEntry>,
    watch: WatchHandle,
    chunker: Arc<dyn Chunker>,
    vector_manager: Arc<VectorCalculationManager>,
    index_store: IndexStore,
    active_requests: AtomicUsize,
    shutting_down: AtomicBool,
    shutdown_notify: Notify,
}

/// Counts `self` in for the lifetime of one RPC call so the eviction loop
/// (see `daemon::eviction`) can defer a TTL-triggered shutdown until every
/// in-flight request is done.
struct RequestGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

impl DaemonService {
    pub async fn new(reporef: RepoRef, config: Configuration) -> Result<Self, DaemonError> {
        let state = StateSource::for_repo(&reporef);
        state.ensure_dirs().map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let cache = Arc::new(CacheEntry::new(Duration::from_secs(config.daemon.ttl_minutes as u64 * 60)));

        let chunker: Arc<dyn Chunker> =
            Arc::new(TokenWindowChunker::new(800, 20).map_err(|e| DaemonError::StorageError(e.to_string()))?);

        let provider = Arc::new(OpenAiEmbeddingProvider::new(EMBEDDING_MODEL, EMBEDDING_DIM, config.max_batch_tokens));
        let vector_manager = Arc::new(
            VectorCalculationManager::new(provider, config.embedding_worker_count)
                .map_err(|e| DaemonError::StorageError(e.to_string()))?,
        );

        let index_store = IndexStore::new(state.index_dir(), EMBEDDING_DIM);

        let watch = WatchHandler::new(
            reporef.root().to_path_buf(),
            cache.clone(),
            chunker.clone(),
            vector_manager.clone(),
            Duration::from_millis(config.watch_debounce_ms),
        );

        Ok(Self {
            reporef,
            config,
            state,
            cache,
            watch,
            chunker,
            vector_manager,
            index_store,
            active_requests: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        })
    }

    fn enter_request(&self) -> RequestGuard<'_> {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        RequestGuard { counter: &self.active_requests }
    }

    pub fn cache_entry(&self) -> Arc<CacheEntry> {
        self.cache.clone()
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn eviction_check_interval(&self) -> Duration {
        Duration::from_secs(self.config.daemon.eviction_check_interval_seconds.max(1))
    }

    pub fn auto_shutdown_on_idle(&self) -> bool {
        self.config.daemon.auto_shutdown_on_idle
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_one();
    }

    /// Marks the daemon as shutting down without waking `accept_loop` yet.
    /// Used by the `Shutdown` RPC handler so the flag is visible
    /// immediately but the listener stays open until the response has
    /// actually been handed to the client; pair with [`Self::confirm_shutdown`]
    /// once that frame is sent.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    /// Wakes `accept_loop`'s shutdown branch. Called by the connection
    /// handler only after the `Response::Shutdown` frame has been written
    /// to the socket, so the acknowledgement is never lost to a runtime
    /// shutdown racing the send.
    pub fn confirm_shutdown(&self) {
        self.shutdown_notify.notify_one();
    }

    /// Resolves once [`Self::request_shutdown`] or [`Self::confirm_shutdown`]
    /// has been called. A permit is stored if nobody is waiting yet, so a
    /// shutdown requested before `accept_loop` reaches its `select!` is
    /// never missed.
    pub async fn shutdown_signal(&self) {
        self.shutdown_notify.notified().await;
    }

    fn check_repo(&self, repo: &str) -> Result<(), DaemonError> {
        if Path::new(repo) == self.reporef.root() {
            Ok(())
        } else {
            Err(DaemonError::WrongRepository)
        }
    }

    pub async fn handle(&self, request: Request, conn: &mut Conn) -> Response {
        let _guard = self.enter_request();

        match request {
            Request::Query { repo, text, limit } => match self.check_repo(&repo) {
                Ok(()) => match self.query_semantic(&text, limit).await {
                    Ok(hits) => Response::Query { hits },
                    Err(err) => wrap(err),
                },
                Err(err) => wrap(err),
            },
            Request::QueryFts { repo, text, limit } => match self.check_repo(&repo) {
                Ok(()) => match self.query_fts(&text, limit).await {
                    Ok(hits) => Response::QueryFts { hits },
                    Err(err) => wrap(err),
                },
                Err(err) => wrap(err),
            },
            Request::QueryHybrid { repo, text, limit, merge } => match self.check_repo(&repo) {
                Ok(()) => match self.query_hybrid(&text, limit, merge).await {
                    Ok(hits) => Response::QueryHybrid { hits },
                    Err(err) => wrap(err),
                },
                Err(err) => wrap(err),
            },
            Request::Index { repo, commits, correlation_id } => match self.check_repo(&repo) {
                Ok(()) => self.handle_index(commits, correlation_id, conn).await,
                Err(err) => wrap(err),
            },
            Request::EstimateIndexCost { repo, commits } => match self.check_repo(&repo) {
                Ok(()) => match self.estimate_index_cost(commits).await {
                    Ok(result) => Response::EstimateIndexCost { result },
                    Err(err) => wrap(err),
                },
                Err(err) => wrap(err),
            },
            Request::WatchStart { repo, correlation_id } => match self.check_repo(&repo) {
                Ok(()) => {
                    let _ = correlation_id;
                    match self.watch.start().await {
                        Ok(true) => Response::WatchStart { status: WatchStartStatus::Started },
                        Ok(false) => Response::WatchStart { status: WatchStartStatus::AlreadyRunning },
                        Err(err) => wrap(err),
                    }
                }
                Err(err) => wrap(err),
            },
            Request::WatchStop { repo } => match self.check_repo(&repo) {
                Ok(()) => {
                    let (status, files_processed, updates_applied) = self.watch.stop().await;
                    let status = match status {
                        crate::watch::WatchStopStatus::Stopped => WireWatchStopStatus::Stopped,
                        crate::watch::WatchStopStatus::NotRunning => WireWatchStopStatus::NotRunning,
                    };
                    Response::WatchStop { result: WatchStopResult { status, files_processed, updates_applied } }
                }
                Err(err) => wrap(err),
            },
            Request::WatchStatus => {
                let status = self.watch.status().await;
                Response::WatchStatus {
                    result: WatchStatusResult {
                        watching: status.watching,
                        project: Some(self.reporef.to_string()),
                        files_processed: status.files_processed,
                        last_update_unix_secs: status.last_update_unix_secs,
                    },
                }
            }
            Request::Clean { repo } => match self.check_repo(&repo) {
                Ok(()) => match self.clean(false).await {
                    Ok(()) => Response::Clean { result: CleanResult { cache_invalidated: true, ok: true } },
                    Err(err) => wrap(err),
                },
                Err(err) => wrap(err),
            },
            Request::CleanData { repo } => match self.check_repo(&repo) {
                Ok(()) => match self.clean(true).await {
                    Ok(()) => Response::CleanData { result: CleanResult { cache_invalidated: true, ok: true } },
                    Err(err) => wrap(err),
                },
                Err(err) => wrap(err),
            },
            Request::Status { repo } => match self.check_repo(&repo) {
                Ok(()) => match self.build_status().await {
                    Ok(result) => Response::Status { result },
                    Err(err) => wrap(err),
                },
                Err(err) => wrap(err),
            },
            Request::GetStatus => match self.build_get_status().await {
                Ok(result) => Response::GetStatus { result },
                Err(err) => wrap(err),
            },
            Request::ClearCache => {
                self.cache.invalidate().await;
                Response::ClearCache
            }
            Request::Shutdown => {
                if self.watch.is_running().await {
                    let _ = self.watch.stop().await;
                }
                self.cache.invalidate().await;
                // Only the flag is set here; the listener keeps running
                // until the connection handler confirms this response was
                // actually written to the socket (see
                // `daemon::connection::handle_connection`).
                self.begin_shutdown();
                Response::Shutdown
            }
        }
    }

    async fn ensure_semantic_loaded(&self) -> Result<(), DaemonError> {
        let needs_load = self.cache.with_read(|slots| slots.semantic.is_none()).await;
        if !needs_load {
            return Ok(());
        }
        let loaded = self.index_store.load()?;
        self.cache
            .with_write(|slots| {
                if slots.semantic.is_none() {
                    if let Some(pair) = loaded {
                        slots.semantic = Some(pair);
                    }
                }
            })
            .await;
        Ok(())
    }

    async fn query_semantic(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, DaemonError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let pipes = IndexingPipes::detached();
        let receivers = self.vector_manager.submit_chunks(vec![text.to_string()], pipes)?;
        let vector = receivers
            .into_iter()
            .next()
            .expect("one receiver for one text")
            .await
            .map_err(|_| DaemonError::Cancelled)??;

        self.ensure_semantic_loaded().await?;

        let hits = self
            .cache
            .with_read(|slots| match &slots.semantic {
                Some((index, id_map)) => index
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
                    .collect::<Vec<_>>(),
                // No semantic index has ever been built for this repository;
                // treated as an empty result set rather than an error so a
                // query against a never-indexed repo doesn't surface a wire
                // error, and so a hybrid query with a populated lexical side
                // still returns results.
                None => Vec::new(),
            })
            .await;
        Ok(hits)
    }

    /// Returns whether a lexical index is (now) available, loading it from
    /// disk into the cache slot the first time a query asks for one.
    async fn ensure_lexical_loaded(&self) -> Result<bool, DaemonError> {
        let (known_absent, missing) =
            self.cache.with_read(|slots| (slots.lexical_known_absent, slots.lexical.is_none())).await;
        if !missing {
            return Ok(true);
        }
        if known_absent {
            return Ok(false);
        }

        let lexical_dir = self.state.index_dir().join("lexical");
        let loaded = LexicalIndex::load_if_exists(&lexical_dir, self.config.reindex_threads, self.config.reindex_buffer_size)
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;
        let available = loaded.is_some();

        self.cache
            .with_write(|slots| {
                if slots.lexical.is_none() {
                    match loaded {
                        Some(index) => slots.lexical = Some(index),
                        None => slots.lexical_known_absent = true,
                    }
                }
            })
            .await;

        Ok(available)
    }

    async fn query_fts(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, DaemonError> {
        if !self.ensure_lexical_loaded().await? {
            return Err(DaemonError::FtsUnavailable);
        }

        let guard = self.cache.read_guard().await;
        let lexical = guard.lexical.as_ref().ok_or(DaemonError::FtsUnavailable)?;
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

    async fn query_hybrid(&self, text: &str, limit: usize, merge: HybridMergeMode) -> Result<Vec<SearchHit>, DaemonError> {
        let semantic = self.query_semantic(text, limit).await;
        let lexical = self.query_fts(text, limit).await;

        if semantic.is_err() && lexical.is_err() {
            return semantic;
        }

        match merge {
            HybridMergeMode::Tagged => {
                let mut hits = Vec::new();
                if let Ok(s) = semantic {
                    hits.extend(s);
                }
                if let Ok(l) = lexical {
                    hits.extend(l);
                }
                hits.truncate(limit);
                Ok(hits)
            }
            HybridMergeMode::RankFused => {
                use std::collections::HashMap;
                const RRF_K: f32 = 60.0;

                let mut scores: HashMap<String, f32> = HashMap::new();
                let mut best: HashMap<String, SearchHit> = HashMap::new();

                if let Ok(s) = &semantic {
                    for (rank, hit) in s.iter().enumerate() {
                        *scores.entry(hit.file_path.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
                        best.entry(hit.file_path.clone()).or_insert_with(|| hit.clone());
                    }
                }
                if let Ok(l) = &lexical {
                    for (rank, hit) in l.iter().enumerate() {
                        *scores.entry(hit.file_path.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
                        best.entry(hit.file_path.clone()).or_insert_with(|| hit.clone());
                    }
                }

                let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                ranked.truncate(limit);

                Ok(ranked
                    .into_iter()
                    .filter_map(|(path, score)| best.get(&path).map(|hit| SearchHit { score, ..hit.clone() }))
                    .collect())
            }
        }
    }

    async fn handle_index(&self, commits: Option<IndexCommitsArgs>, correlation_id: Option<String>, conn: &mut Conn) -> Response {
        match commits {
            None => match self.run_workspace_index(correlation_id, conn).await {
                Ok(result) => Response::Index { result },
                Err(err) => wrap(err),
            },
            Some(args) => {
                if self.watch.is_running().await {
                    return wrap(DaemonError::WatchActive);
                }
                match self.run_temporal_index(args, correlation_id, conn).await {
                    Ok(result) => Response::Index { result },
                    Err(err) => wrap(err),
                }
            }
        }
    }

    async fn run_workspace_index(&self, correlation_id: Option<String>, conn: &mut Conn) -> Result<IndexCommitsResult, DaemonError> {
        let sql = SqlDb::open(&self.state.index_dir().join("cache.db")).await?;
        let file_cache = FileCache::new(sql);
        file_cache.migrate().await?;

        let lexical_dir = self.state.index_dir().join("lexical");
        let lexical = LexicalIndex::create(&lexical_dir, self.config.reindex_threads, self.config.reindex_buffer_size)
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let commit_hash = GitRepo::open(self.reporef.root()).and_then(|g| g.current_head_commit_hash()).unwrap_or_default();

        let indexer = WorkspaceIndexer::new(
            self.chunker.clone(),
            self.vector_manager.clone(),
            IndexStore::new(self.state.index_dir(), EMBEDDING_DIM),
            file_cache,
        );

        let (pipes, progress_rx) = IndexingPipes::new(correlation_id);
        let repo_root = self.reporef.root().to_path_buf();

        let join: JoinHandle<Result<_, DaemonError>> = tokio::spawn(async move {
            let outcome = indexer.index(&repo_root, &lexical, &commit_hash, pipes).await?;
            Ok(outcome)
        });

        let outcome = drain_progress(conn, join, progress_rx).await?;
        self.cache.invalidate().await;

        Ok(IndexCommitsResult {
            total_commits: 0,
            new_blobs_indexed: outcome.vectors_created,
            total_unique_blobs: outcome.files_indexed,
            deduplication_ratio: 0.0,
            partial: false,
        })
    }

    async fn run_temporal_index(&self, args: IndexCommitsArgs, correlation_id: Option<String>, conn: &mut Conn) -> Result<IndexCommitsResult, DaemonError> {
        let git = GitRepo::open(self.reporef.root())?;

        let commit_sql = SqlDb::open(&self.state.commits_db()).await?;
        commit_sql.migrate_commit_store().await?;
        let commit_store = CommitStore::new(commit_sql);

        let blob_sql = SqlDb::open(&self.state.blob_registry_db()).await?;
        blob_sql.migrate_blob_registry().await?;
        let blob_registry = BlobRegistry::new(blob_sql);

        let index_store = IndexStore::new(self.state.index_dir(), EMBEDDING_DIM);
        let blob_processor = HistoricalBlobProcessor::new(self.chunker.clone(), self.vector_manager.clone());
        let repo_identity_hash = blake3::hash(self.reporef.root().to_string_lossy().as_bytes()).to_hex().to_string();

        let indexer = TemporalIndexer::new(
            git,
            blob_registry,
            commit_store,
            index_store,
            blob_processor,
            self.state.checkpoint_file(),
            self.state.temporal_metadata_file(),
            self.config.temporal.checkpoint_interval,
            repo_identity_hash,
        );

        let strategy: ResolvedStrategy = (args.branch_strategy, args.branch_patterns).into();
        let (pipes, progress_rx) = IndexingPipes::new(correlation_id);
        let max_commits = args.max_commits;
        let since = args.since_date_unix_secs;
        let resume = args.resume;

        let join: JoinHandle<Result<_, DaemonError>> =
            tokio::spawn(async move { indexer.index_commits(strategy, max_commits, since, resume, pipes).await });

        let outcome = drain_progress(conn, join, progress_rx).await?;
        self.cache.invalidate().await;

        Ok(IndexCommitsResult {
            total_commits: outcome.total_commits,
            new_blobs_indexed: outcome.new_blobs_indexed,
            total_unique_blobs: outcome.total_unique_blobs,
            deduplication_ratio: outcome.deduplication_ratio,
            partial: outcome.partial,
        })
    }

    /// Builds the same `TemporalIndexer` plumbing `run_temporal_index` does,
    /// but only to call `estimate_cost` — no blobs are read and no vectors
    /// are written. The estimate is returned to the caller before indexing
    /// begins; prompting for confirmation on it is a client concern, not
    /// this daemon's.
    async fn estimate_index_cost(&self, args: IndexCommitsArgs) -> Result<CostEstimateResult, DaemonError> {
        let git = GitRepo::open(self.reporef.root())?;

        let commit_sql = SqlDb::open(&self.state.commits_db()).await?;
        commit_sql.migrate_commit_store().await?;
        let commit_store = CommitStore::new(commit_sql);

        let blob_sql = SqlDb::open(&self.state.blob_registry_db()).await?;
        blob_sql.migrate_blob_registry().await?;
        let blob_registry = BlobRegistry::new(blob_sql);

        let index_store = IndexStore::new(self.state.index_dir(), EMBEDDING_DIM);
        let blob_processor = HistoricalBlobProcessor::new(self.chunker.clone(), self.vector_manager.clone());
        let repo_identity_hash = blake3::hash(self.reporef.root().to_string_lossy().as_bytes()).to_hex().to_string();

        let indexer = TemporalIndexer::new(
            git,
            blob_registry,
            commit_store,
            index_store,
            blob_processor,
            self.state.checkpoint_file(),
            self.state.temporal_metadata_file(),
            self.config.temporal.checkpoint_interval,
            repo_identity_hash,
        );

        let strategy: ResolvedStrategy = (args.branch_strategy, args.branch_patterns).into();
        let estimate = indexer.estimate_cost(strategy, args.since_date_unix_secs, args.max_commits).await?;
        Ok(estimate.into())
    }

    async fn clean(&self, all_data: bool) -> Result<(), DaemonError> {
        let scope = if all_data { CleanScope::AllData } else { CleanScope::IndexOnly };
        self.index_store.clean(scope)?;
        self.cache.invalidate().await;
        Ok(())
    }

    async fn cache_status(&self) -> CacheStatus {
        let (semantic_cached, fts_cached) = self.cache.with_read(|slots| (slots.semantic.is_some(), slots.lexical.is_some())).await;
        let fts_available = self.state.index_dir().join("lexical").join("meta.json").exists();
        CacheStatus {
            semantic_cached,
            fts_available,
            fts_cached,
            last_accessed_unix_secs: self.cache.last_accessed_unix_secs(),
            access_count: self.cache.access_count(),
            ttl_minutes: self.config.daemon.ttl_minutes,
        }
    }

    async fn storage_status(&self) -> Result<StorageStatus, DaemonError> {
        let semantic_points = match self.cache.with_read(|slots| slots.semantic.as_ref().map(|(idx, _)| idx.len() as u64)).await {
            Some(n) => n,
            None => self.index_store.load()?.map(|(idx, _)| idx.len() as u64).unwrap_or(0),
        };

        let (total_commits, total_unique_blobs) = if self.state.commits_db().exists() {
            let sql = SqlDb::open(&self.state.commits_db()).await?;
            sql.migrate_commit_store().await?;
            let store = CommitStore::new(sql);
            (store.total_commits().await?, store.total_unique_blobs().await?)
        } else {
            (0, 0)
        };

        Ok(StorageStatus { semantic_points, total_commits, total_unique_blobs })
    }

    async fn build_status(&self) -> Result<StatusResult, DaemonError> {
        Ok(StatusResult { daemon: self.cache_status().await, storage: self.storage_status().await?, mode: "daemon".to_string() })
    }

    async fn build_get_status(&self) -> Result<GetStatusResult, DaemonError> {
        let status = self.cache_status().await;
        let cache_empty = !self.cache.is_loaded().await;
        Ok(GetStatusResult {
            running: true,
            project: Some(self.reporef.to_string()),
            cache_empty,
            semantic_cached: status.semantic_cached,
            fts_available: status.fts_available,
            fts_cached: status.fts_cached,
            last_accessed_unix_secs: status.last_accessed_unix_secs,
            access_count: status.access_count,
            ttl_minutes: status.ttl_minutes,
        })
    }
}

fn wrap(err: DaemonError) -> Response {
    crate::daemon::connection::wrap_error(err)
}

/// Drives `handle` to completion while forwarding every [`ProgressMessage`]
/// it produces to `conn` as it arrives, rather than buffering them until
/// the call finishes.
async fn drain_progress<T: Send + 'static>(
    conn: &mut Conn,
    mut handle: JoinHandle<Result<T, DaemonError>>,
    progress_rx: flume::Receiver<ProgressMessage>,
) -> Result<T, DaemonError> {
    loop {
        tokio::select! {
            biased;
            msg = progress_rx.recv_async() => {
                if let Ok(message) = msg {
                    send_progress(conn, message).await;
                }
            }
            result = &mut handle => {
                while let Ok(message) = progress_rx.try_recv() {
                    send_progress(conn, message).await;
                }
                return match result {
                    Ok(inner) => inner,
                    Err(join_err) => {
                        warn!(%join_err, "indexing task panicked or was aborted");
                        Err(DaemonError::StorageError(join_err.to_string()))
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        gix::init(dir).unwrap();
        std::fs::write(dir.join("a.rs"), "fn main() {}\n").unwrap();
    }

    #[tokio::test]
    async fn wrong_repo_is_rejected_without_touching_state() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let reporef = RepoRef::from_root(dir.path().canonicalize().unwrap()).unwrap();
        let service = DaemonService::new(reporef, Configuration::default()).await.unwrap();

        let err = service.check_repo("/not/the/right/repo");
        assert!(matches!(err, Err(DaemonError::WrongRepository)));
    }

    #[tokio::test]
    async fn clear_cache_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let reporef = RepoRef::from_root(dir.path().canonicalize().unwrap()).unwrap();
        let service = DaemonService::new(reporef, Configuration::default()).await.unwrap();
        service.cache.invalidate().await;
        service.cache.invalidate().await;
        assert!(!service.cache.is_loaded().await);
    }
}
