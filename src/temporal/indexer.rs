// Temporal Indexer orchestrator: blob discovery, deduplication against the
// Blob Registry, chunking/embedding via the Historical Blob Processor,
// vector upsert, and commit/tree/branch metadata persistence.
// Checkpointable and resumable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::background::IndexingPipes;
use crate::error::DaemonError;
use crate::semantic::index_store::{IdMap, IndexStore, SemanticIndex};
use crate::storage::blob_registry::BlobRegistry;
use crate::storage::commit_store::{CommitBranchRow, CommitRow, CommitStore, TreeRow};
use crate::temporal::blob_processor::HistoricalBlobProcessor;
use crate::temporal::checkpoint::Checkpoint;
use crate::temporal::git::GitRepo;
use crate::temporal::metadata::TemporalMetadata;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "patterns")]
pub enum BranchStrategy {
    Current,
    All,
    Patterns(()),
}

// `Patterns` carries its glob list out-of-band in the request
// (`IndexCommitsArgs::branch_patterns`) rather than inline, so the wire
// variant above stays uniform; the richer form used internally:
#[derive(Debug, Clone)]
pub enum ResolvedStrategy {
    Current,
    All,
    Patterns(Vec<String>),
}

impl From<(BranchStrategy, Vec<String>)> for ResolvedStrategy {
    fn from((strategy, patterns): (BranchStrategy, Vec<String>)) -> Self {
        match strategy {
            BranchStrategy::Current => ResolvedStrategy::Current,
            BranchStrategy::All => ResolvedStrategy::All,
            BranchStrategy::Patterns(()) => ResolvedStrategy::Patterns(patterns),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexCommitsOutcome {
    pub total_commits: u64,
    pub new_blobs_indexed: u64,
    pub total_unique_blobs: u64,
    pub deduplication_ratio: f64,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub additional_commits: u64,
    pub estimated_additional_unique_blobs: u64,
    pub estimated_storage_bytes: u64,
    pub estimated_api_cost_usd: f64,
}

/// Rough average bytes-per-chunk-vector used for the storage estimate, and
/// an assumed per-blob dollar cost for the embedding API estimate. Both are
/// configuration-grade constants, not physical facts; see DESIGN.md.
const ESTIMATED_BYTES_PER_VECTOR: u64 = 1536 * 4 + 256;
const ESTIMATED_USD_PER_BLOB: f64 = 0.00002;
const ASSUMED_DEDUP_RATE: f64 = 0.6;

pub struct TemporalIndexer {
    git: GitRepo,
    blob_registry: BlobRegistry,
    commit_store: CommitStore,
    index_store: IndexStore,
    blob_processor: HistoricalBlobProcessor,
    checkpoint_path: PathBuf,
    metadata_path: PathBuf,
    checkpoint_interval: u64,
    repo_identity_hash: String,
}

impl TemporalIndexer {
    pub fn new(
        git: GitRepo,
        blob_registry: BlobRegistry,
        commit_store: CommitStore,
        index_store: IndexStore,
        blob_processor: HistoricalBlobProcessor,
        checkpoint_path: PathBuf,
        metadata_path: PathBuf,
        checkpoint_interval: u64,
        repo_identity_hash: String,
    ) -> Self {
        Self {
            git,
            blob_registry,
            commit_store,
            index_store,
            blob_processor,
            checkpoint_path,
            metadata_path,
            checkpoint_interval,
            repo_identity_hash,
        }
    }

    fn resolve_branches(&self, strategy: &ResolvedStrategy) -> Result<Vec<String>, DaemonError> {
        match strategy {
            ResolvedStrategy::Current => Ok(vec![self.git.current_branch_name()?]),
            ResolvedStrategy::All => self.git.all_branch_names(),
            ResolvedStrategy::Patterns(patterns) => {
                let matched = self.git.branches_matching(patterns)?;
                if matched.is_empty() {
                    let available = self.git.all_branch_names().unwrap_or_default();
                    return Err(DaemonError::NoMatchingBranches { available });
                }
                Ok(matched)
            }
        }
    }

    /// Estimate for `all`/`patterns` strategies, returned to the caller
    /// before indexing begins; whether to prompt for confirmation is a
    /// client concern.
    pub async fn estimate_cost(
        &self,
        strategy: ResolvedStrategy,
        since_date_unix: Option<i64>,
        max_commits: Option<u64>,
    ) -> Result<CostEstimate, DaemonError> {
        let branches = self.resolve_branches(&strategy)?;
        let commits = self.git.commits_reachable_from(&branches, since_date_unix, max_commits)?;
        let already_indexed = self.commit_store.total_commits().await?;
        let additional_commits = (commits.len() as u64).saturating_sub(already_indexed);

        let mut total_blobs = 0u64;
        for commit in commits.iter().take(200) {
            total_blobs += self.git.blobs_for_commit(&commit.hash)?.len() as u64;
        }
        let avg_blobs_per_commit = if commits.is_empty() { 0.0 } else { total_blobs as f64 / commits.len().min(200) as f64 };
        let estimated_total_blobs = (avg_blobs_per_commit * additional_commits as f64) as u64;
        let estimated_additional_unique_blobs = ((estimated_total_blobs as f64) * (1.0 - ASSUMED_DEDUP_RATE)) as u64;

        Ok(CostEstimate {
            additional_commits,
            estimated_additional_unique_blobs,
            estimated_storage_bytes: estimated_additional_unique_blobs * ESTIMATED_BYTES_PER_VECTOR,
            estimated_api_cost_usd: estimated_additional_unique_blobs as f64 * ESTIMATED_USD_PER_BLOB,
        })
    }

    pub async fn index_commits(
        &self,
        strategy: ResolvedStrategy,
        max_commits: Option<u64>,
        since_date_unix: Option<i64>,
        resume: bool,
        pipes: IndexingPipes,
    ) -> Result<IndexCommitsOutcome, DaemonError> {
        let branches = self.resolve_branches(&strategy)?;

        let (mut index, mut id_map) = match self.index_store.load()? {
            Some((index, id_map)) => (index, id_map),
            None => (SemanticIndex::new(self.blob_processor_dim(), 1024), IdMap::new()),
        };

        // Step 1: Blob Registry warm-up. Idempotent against `INSERT OR
        // IGNORE`, so re-running this on every call is always safe.
        let warm_up: Vec<(String, usize)> = id_map
            .iter()
            .map(|(point_id, meta)| (meta.blob_hash.clone(), *point_id))
            .collect();
        self.blob_registry.register_many(&warm_up).await?;

        // Step 2/3: commit discovery and resume.
        let mut commits = self.git.commits_reachable_from(&branches, since_date_unix, max_commits)?;

        let mut skip_until: Option<String> = None;
        if resume {
            if let Some(checkpoint) = Checkpoint::read_if_valid(&self.checkpoint_path, &self.repo_identity_hash) {
                if self.git.is_commit_present(&checkpoint.last_commit) {
                    skip_until = Some(checkpoint.last_commit);
                } else if let Some(ancestor) = self.git.find_common_ancestor_via_reflog(&checkpoint.last_commit) {
                    warn!(?ancestor, "checkpoint commit unreachable; resuming from reflog ancestor");
                    skip_until = Some(ancestor);
                } else {
                    warn!("checkpoint invalid and no reflog ancestor found; starting from the beginning");
                    Checkpoint::delete(&self.checkpoint_path)?;
                }
            }
        }

        if let Some(marker) = &skip_until {
            if let Some(pos) = commits.iter().position(|c| &c.hash == marker) {
                commits.drain(0..=pos);
            }
        }

        let total_target = commits.len() as u64;
        if total_target == 0 {
            return Ok(IndexCommitsOutcome {
                total_commits: 0,
                new_blobs_indexed: 0,
                total_unique_blobs: self.commit_store.total_unique_blobs().await?,
                deduplication_ratio: 0.0,
                partial: false,
            });
        }

        let all_branches_for_containment = self.git.all_branch_names()?;
        let mut checkpoint = Checkpoint::new(self.repo_identity_hash.clone());
        checkpoint.all_branches = branches.clone();

        let mut processed = 0u64;
        let mut new_vectors = 0u64;
        let mut total_vector_slots_seen = 0u64;
        let mut partial = false;

        for commit in &commits {
            if pipes.is_cancelled() {
                partial = true;
                break;
            }

            let blobs = match self.git.blobs_for_commit(&commit.hash) {
                Ok(blobs) => blobs,
                Err(err) => {
                    warn!(commit_hash = %commit.hash, %err, "failed to enumerate blobs for commit; skipping");
                    continue;
                }
            };

            let mut new_blobs = Vec::new();
            let mut existing_count = 0u64;
            for blob in &blobs {
                if self.blob_registry.has(&blob.blob_hash).await? {
                    existing_count += 1;
                } else {
                    new_blobs.push(blob.clone());
                }
            }
            total_vector_slots_seen += blobs.len() as u64;
            let _ = existing_count;

            if !new_blobs.is_empty() {
                let stats = self
                    .blob_processor
                    .process_new_blobs(&self.git, &commit.hash, &new_blobs, &mut index, &mut id_map, &self.blob_registry, &pipes)
                    .await?;
                new_vectors += stats.vectors_created;
            }

            let trees: Vec<TreeRow> = blobs
                .iter()
                .map(|b| TreeRow { file_path: b.file_path.clone(), blob_hash: b.blob_hash.clone() })
                .collect();

            let branch_rows = match &strategy {
                ResolvedStrategy::Current => vec![CommitBranchRow {
                    branch_name: branches[0].clone(),
                    is_head: true,
                    indexed_at: now_unix_secs(),
                }],
                _ => {
                    let containing = self.git.branches_containing(&commit.hash, &all_branches_for_containment)?;
                    let current_head = self.git.current_head_commit_hash().unwrap_or_default();
                    containing
                        .into_iter()
                        .map(|branch_name| CommitBranchRow {
                            is_head: commit.hash == current_head,
                            branch_name,
                            indexed_at: now_unix_secs(),
                        })
                        .collect()
                }
            };

            let commit_row = CommitRow {
                hash: commit.hash.clone(),
                timestamp: commit.timestamp,
                author_name: commit.author_name.clone(),
                author_email: commit.author_email.clone(),
                message: commit.message.clone(),
                parent_hashes: commit.parent_hashes.clone(),
            };
            self.commit_store.record_commit(&commit_row, &trees, &branch_rows).await?;

            processed += 1;
            checkpoint.last_commit = commit.hash.clone();
            checkpoint.commits_processed = processed;
            checkpoint.total_blobs = total_vector_slots_seen;
            checkpoint.total_vectors = new_vectors;
            checkpoint.timestamp_unix_secs = now_unix_secs();

            pipes.report(processed as u32, total_target as u32, commit.hash.clone(), "indexing commit".to_string());

            if processed % self.checkpoint_interval == 0 {
                self.index_store.flush(&index, &id_map)?;
                checkpoint.write_atomic(&self.checkpoint_path)?;
            }
        }

        self.index_store.flush(&index, &id_map)?;

        if partial {
            checkpoint.write_atomic(&self.checkpoint_path)?;
            return Ok(IndexCommitsOutcome {
                total_commits: processed,
                new_blobs_indexed: new_vectors,
                total_unique_blobs: self.commit_store.total_unique_blobs().await?,
                deduplication_ratio: dedup_ratio(new_vectors, total_vector_slots_seen),
                partial: true,
            });
        }

        // Step 5: finalization.
        let total_unique_blobs = self.commit_store.total_unique_blobs().await?;
        let deduplication_ratio = dedup_ratio(new_vectors, total_vector_slots_seen);

        let metadata = TemporalMetadata {
            last_indexed_commit: commits.last().map(|c| c.hash.clone()).unwrap_or_default(),
            index_version: 1,
            total_commits: self.commit_store.total_commits().await?,
            total_unique_blobs,
            deduplication_ratio,
            indexing_mode: match strategy {
                ResolvedStrategy::Current => BranchStrategy::Current,
                ResolvedStrategy::All => BranchStrategy::All,
                ResolvedStrategy::Patterns(_) => BranchStrategy::Patterns(()),
            },
            indexed_branches: branches,
            last_updated_unix_secs: now_unix_secs(),
            incremental_updates: TemporalMetadata::read(&self.metadata_path).map(|m| m.incremental_updates + 1).unwrap_or(1),
        };
        metadata.write_atomic(&self.metadata_path)?;
        Checkpoint::delete(&self.checkpoint_path)?;

        info!(total_commits = processed, new_vectors, deduplication_ratio, "temporal indexing complete");

        Ok(IndexCommitsOutcome {
            total_commits: processed,
            new_blobs_indexed: new_vectors,
            total_unique_blobs,
            deduplication_ratio,
            partial: false,
        })
    }

    fn blob_processor_dim(&self) -> usize {
        self.index_store.dim()
    }
}

fn dedup_ratio(new_vectors: u64, total_vector_slots_seen: u64) -> f64 {
    if total_vector_slots_seen == 0 {
        return 0.0;
    }
    1.0 - (new_vectors as f64 / total_vector_slots_seen as f64)
}

fn now_unix_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
