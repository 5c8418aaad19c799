// Filesystem-change subscriber that mutates the Cache Entry in place
// rather than through disk. Watches the one repository this daemon owns
// and applies each debounced change directly to the live cache slots,
// using a `notify-debouncer-mini` + `flume` combination to funnel
// debounced filesystem events into an async driver task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use notify_debouncer_mini::notify::RecommendedWatcher;
use tantivy::Document;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::CacheEntry;
use crate::chunking::Chunker;
use crate::embedding::VectorCalculationManager;
use crate::error::DaemonError;
use crate::semantic::index_store::PointMeta;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchStopStatus {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone)]
pub struct WatchStatus {
    pub watching: bool,
    pub files_processed: u64,
    pub last_update_unix_secs: Option<u64>,
}

struct RunningWatch {
    _debouncer: Debouncer<RecommendedWatcher>,
    driver: JoinHandle<()>,
    files_processed: Arc<AtomicU64>,
    updates_applied: Arc<AtomicU64>,
    last_update_unix_secs: Arc<std::sync::atomic::AtomicU64>,
    cancel: Arc<AtomicBool>,
}

/// At most one active watch session per daemon. `WatchHandle` is what the
/// daemon service hands out to RPC callers; `WatchHandler` is the
/// module-private machinery that actually runs the debounced re-embed
/// loop.
pub struct WatchHandler {
    repo_root: PathBuf,
    cache: Arc<CacheEntry>,
    chunker: Arc<dyn Chunker>,
    vector_manager: Arc<VectorCalculationManager>,
    debounce: Duration,
    running: AsyncMutex<Option<RunningWatch>>,
}

pub type WatchHandle = Arc<WatchHandler>;

impl WatchHandler {
    pub fn new(
        repo_root: PathBuf,
        cache: Arc<CacheEntry>,
        chunker: Arc<dyn Chunker>,
        vector_manager: Arc<VectorCalculationManager>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo_root,
            cache,
            chunker,
            vector_manager,
            debounce,
            running: AsyncMutex::new(None),
        })
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Returns `already_running` without touching any state if a watch is
    /// already active.
    pub async fn start(self: &Arc<Self>) -> Result<bool, DaemonError> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return Ok(false);
        }

        let (tx, rx) = flume::unbounded();
        let mut debouncer = new_debouncer(self.debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                for event in events {
                    let _ = tx.send(event.path);
                }
            }
            Err(err) => error!(%err, "watch debouncer error"),
        })
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.repo_root, notify_debouncer_mini::notify::RecursiveMode::Recursive)
            .map_err(|e| DaemonError::StorageError(e.to_string()))?;

        let files_processed = Arc::new(AtomicU64::new(0));
        let updates_applied = Arc::new(AtomicU64::new(0));
        let last_update = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let cancel = Arc::new(AtomicBool::new(false));

        let this = self.clone();
        let files_processed2 = files_processed.clone();
        let updates_applied2 = updates_applied.clone();
        let last_update2 = last_update.clone();
        let cancel2 = cancel.clone();

        let driver = tokio::spawn(async move {
            while !cancel2.load(Ordering::Relaxed) {
                let Ok(path) = rx.recv_async().await else { break };
                if cancel2.load(Ordering::Relaxed) {
                    break;
                }
                files_processed2.fetch_add(1, Ordering::Relaxed);
                match this.apply_update(&path).await {
                    Ok(applied) => {
                        if applied {
                            updates_applied2.fetch_add(1, Ordering::Relaxed);
                            last_update2.store(now_unix_secs(), Ordering::Relaxed);
                        }
                    }
                    Err(err) => warn!(?path, %err, "watch update failed; skipping"),
                }
            }
            // Graceful stop: drain anything already queued so in-flight
            // updates are not lost mid-debounce window.
            while let Ok(path) = rx.try_recv() {
                files_processed2.fetch_add(1, Ordering::Relaxed);
                if this.apply_update(&path).await.unwrap_or(false) {
                    updates_applied2.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        *guard = Some(RunningWatch {
            _debouncer: debouncer,
            driver,
            files_processed,
            updates_applied,
            last_update_unix_secs: last_update,
            cancel,
        });
        Ok(true)
    }

    /// Re-chunks and re-embeds a single changed file, upserting the result
    /// into the Cache Entry's semantic slot (and lexical slot, if loaded)
    /// in place. The mutation lock is held across the whole re-embed and
    /// both slot upserts, not just the final write, so a concurrent
    /// `index` run can never invalidate or rewrite these slots out from
    /// under this update. If a slot is not currently loaded there is
    /// nothing in memory to mutate for it, so that slot is skipped — the
    /// next `query` will load fresh state from disk, which already
    /// reflects the filesystem as of whenever it's next persisted by an
    /// `index` run.
    async fn apply_update(&self, path: &Path) -> Result<bool, DaemonError> {
        let relative_path = path.strip_prefix(&self.repo_root).unwrap_or(path).to_string_lossy().to_string();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(_) => return Ok(false), // deleted or non-utf8; leave cache as-is until the next full index
        };

        let chunks = self.chunker.chunk_file(&relative_path, &contents);
        if chunks.is_empty() {
            return Ok(false);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let mut guard = self.cache.write_guard().await;

        let pipes = crate::application::background::IndexingPipes::detached();
        let receivers = self.vector_manager.submit_chunks(texts, pipes)?;

        let mut vectors = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            match receiver.await {
                Ok(Ok(vector)) => vectors.push(vector),
                Ok(Err(DaemonError::ChunkTooLarge)) => continue,
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(DaemonError::Cancelled),
            }
        }

        if vectors.is_empty() {
            return Ok(false);
        }

        let content_hash = blake3::hash(contents.as_bytes()).to_hex().to_string();
        let unique_hash = format!("file:{relative_path}");
        let mut applied = false;

        if let Some((index, id_map)) = guard.slots.semantic.as_mut() {
            for (chunk_index, vector) in vectors.into_iter().enumerate() {
                if vector.len() != index.dim() {
                    continue;
                }
                let point_id = index.len();
                if index.insert(point_id, vector).is_ok() {
                    id_map.insert(
                        point_id,
                        PointMeta {
                            blob_hash: content_hash.clone(),
                            file_path: relative_path.clone(),
                            commit_hash: String::new(),
                            chunk_index: chunk_index as u32,
                        },
                    );
                    applied = true;
                }
            }
        }

        if let Some(lexical) = guard.slots.lexical.as_ref() {
            let writer = lexical.writer().map_err(|e| DaemonError::StorageError(e.to_string()))?;
            lexical.delete_by_unique_hash(&writer, &unique_hash);

            let mut doc = Document::new();
            doc.add_text(lexical.source.unique_hash, &unique_hash);
            doc.add_text(lexical.source.relative_path, &relative_path);
            doc.add_text(lexical.source.content, &contents);
            doc.add_text(lexical.source.commit_hash, "");
            writer.add_document(doc).map_err(|e| DaemonError::StorageError(e.to_string()))?;
            writer.commit().map_err(|e| DaemonError::StorageError(e.to_string()))?;

            lexical.refresh_reader().await.map_err(|e| DaemonError::StorageError(e.to_string()))?;
            applied = true;
        }

        drop(guard);
        self.cache.touch();
        Ok(applied)
    }

    pub async fn stop(&self) -> (WatchStopStatus, u64, u64) {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            return (WatchStopStatus::NotRunning, 0, 0);
        };
        running.cancel.store(true, Ordering::Relaxed);
        let files_processed = running.files_processed.load(Ordering::Relaxed);
        let updates_applied = running.updates_applied.load(Ordering::Relaxed);
        // Graceful stop: allow the driver task to drain whatever is
        // already queued before we report counters back to the caller.
        let _ = tokio::time::timeout(Duration::from_secs(2), running.driver).await;
        (WatchStopStatus::Stopped, files_processed, updates_applied)
    }

    pub async fn status(&self) -> WatchStatus {
        let guard = self.running.lock().await;
        match guard.as_ref() {
            Some(running) => WatchStatus {
                watching: true,
                files_processed: running.files_processed.load(Ordering::Relaxed),
                last_update_unix_secs: match running.last_update_unix_secs.load(Ordering::Relaxed) {
                    0 => None,
                    secs => Some(secs),
                },
            },
            None => WatchStatus {
                watching: false,
                files_processed: 0,
                last_update_unix_secs: None,
            },
        }
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::TokenWindowChunker;
    use crate::embedding::provider::FakeEmbeddingProvider;

    #[tokio::test]
    async fn start_then_stop_with_no_events_reports_zero_updates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheEntry::new(Duration::from_secs(60)));
        let chunker = Arc::new(TokenWindowChunker::new(200, 2).unwrap());
        let provider = Arc::new(FakeEmbeddingProvider { dim: 4, max_batch_tokens: 1000 });
        let vector_manager = Arc::new(VectorCalculationManager::new(provider, 2).unwrap());
        let handler = WatchHandler::new(dir.path().to_path_buf(), cache, chunker, vector_manager, Duration::from_millis(50));

        assert!(handler.start().await.unwrap());
        assert!(!handler.start().await.unwrap());
        let (status, _files, updates) = handler.stop().await;
        assert_eq!(status, WatchStopStatus::Stopped);
        assert_eq!(updates, 0);
    }
}
