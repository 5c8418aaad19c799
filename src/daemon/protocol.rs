// Wire-level request/response records for the daemon's RPC surface:
// structured records, no language-specific object graphs, carried as
// `serde_json` bodies over length-delimited socket frames instead of HTTP
// (see `daemon::connection`).

use serde::{Deserialize, Serialize};

use crate::application::background::ProgressMessage;
use crate::error::WireError;
use crate::temporal::indexer::{BranchStrategy, CostEstimate};

/// One RPC call, tagged by name so the connection worker can dispatch
/// without a second layer of framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Request {
    Query {
        repo: String,
        text: String,
        limit: usize,
    },
    QueryFts {
        repo: String,
        text: String,
        limit: usize,
    },
    QueryHybrid {
        repo: String,
        text: String,
        limit: usize,
        merge: HybridMergeMode,
    },
    Index {
        repo: String,
        commits: Option<IndexCommitsArgs>,
        correlation_id: Option<String>,
    },
    /// For `all`/`patterns` strategies, the daemon returns a cost estimate
    /// before any indexing happens; prompting the user for confirmation on
    /// that estimate is left to the client.
    EstimateIndexCost {
        repo: String,
        commits: IndexCommitsArgs,
    },
    WatchStart {
        repo: String,
        correlation_id: Option<String>,
    },
    WatchStop {
        repo: String,
    },
    WatchStatus,
    Clean {
        repo: String,
    },
    CleanData {
        repo: String,
    },
    Status {
        repo: String,
    },
    GetStatus,
    ClearCache,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCommitsArgs {
    pub branch_strategy: BranchStrategy,
    pub branch_patterns: Vec<String>,
    pub max_commits: Option<u64>,
    pub since_date_unix_secs: Option<i64>,
    pub resume: bool,
}

/// Per Open Question #1 (hybrid query merge policy): both modes the design
/// leaves open are implemented, selected explicitly by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HybridMergeMode {
    #[default]
    Tagged,
    RankFused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub point_id: Option<usize>,
    pub file_path: String,
    pub snippet: String,
    pub score: f32,
    pub source: ResultSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Semantic,
    Lexical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub semantic_cached: bool,
    pub fts_available: bool,
    pub fts_cached: bool,
    pub last_accessed_unix_secs: u64,
    pub access_count: u64,
    pub ttl_minutes: u32,
}

/// Wire form of [`CostEstimate`]; kept as a distinct type (rather than
/// reusing `CostEstimate` directly on the wire) so the internal estimator
/// stays free to evolve without touching the RPC contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimateResult {
    pub additional_commits: u64,
    pub estimated_additional_unique_blobs: u64,
    pub estimated_storage_bytes: u64,
    pub estimated_api_cost_usd: f64,
}

impl From<CostEstimate> for CostEstimateResult {
    fn from(estimate: CostEstimate) -> Self {
        Self {
            additional_commits: estimate.additional_commits,
            estimated_additional_unique_blobs: estimate.estimated_additional_unique_blobs,
            estimated_storage_bytes: estimate.estimated_storage_bytes,
            estimated_api_cost_usd: estimate.estimated_api_cost_usd,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCommitsResult {
    pub total_commits: u64,
    pub new_blobs_indexed: u64,
    pub total_unique_blobs: u64,
    pub deduplication_ratio: f64,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum WatchStartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchStopResult {
    pub status: WatchStopStatus,
    pub files_processed: u64,
    pub updates_applied: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchStopStatus {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchStatusResult {
    pub watching: bool,
    pub project: Option<String>,
    pub files_processed: u64,
    pub last_update_unix_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanResult {
    pub cache_invalidated: bool,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub daemon: CacheStatus,
    pub storage: StorageStatus,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub semantic_points: u64,
    pub total_commits: u64,
    pub total_unique_blobs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStatusResult {
    pub running: bool,
    pub project: Option<String>,
    pub cache_empty: bool,
    pub semantic_cached: bool,
    pub fts_available: bool,
    pub fts_cached: bool,
    pub last_accessed_unix_secs: u64,
    pub access_count: u64,
    pub ttl_minutes: u32,
}

/// One reply per [`Request`], plus an out-of-band progress stream (see
/// [`Frame`]) for long-running calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Response {
    Query { hits: Vec<SearchHit> },
    QueryFts { hits: Vec<SearchHit> },
    QueryHybrid { hits: Vec<SearchHit> },
    Index { result: IndexCommitsResult },
    EstimateIndexCost { result: CostEstimateResult },
    WatchStart { status: WatchStartStatus },
    WatchStop { result: WatchStopResult },
    WatchStatus { result: WatchStatusResult },
    Clean { result: CleanResult },
    CleanData { result: CleanResult },
    Status { result: StatusResult },
    GetStatus { result: GetStatusResult },
    ClearCache,
    Shutdown,
    Error { error: WireError },
}

/// Every frame on the wire is either a final `Response` to the RPC that
/// opened the connection, or a `Progress` update correlated back to it.
/// `correlation_id` lets a client multiplex progress for a call it issued
/// concurrently with others, though this daemon only ever serves one call
/// per connection at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "frame")]
pub enum Frame {
    Progress(ProgressMessage),
    Response(Response),
}
