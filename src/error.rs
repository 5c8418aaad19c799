// Error taxonomy shared between the daemon, the temporal indexer and the
// lightweight client. Variants line up with the kinds named in the design:
// each one is either recovered locally (the call site matches on it and
// retries/falls back) or serialized across the socket as-is.

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("daemon socket is unreachable")]
    DaemonUnreachable,

    #[error("a daemon is already bound to this socket")]
    AddressInUse,

    #[error("stale socket file found with no listener")]
    StaleSocket,

    #[error("request repository does not match the daemon's repository")]
    WrongRepository,

    #[error("index is unavailable on disk")]
    IndexUnavailable,

    #[error("full-text search index is unavailable for this repository")]
    FtsUnavailable,

    #[error("storage operation failed: {0}")]
    StorageError(String),

    #[error("embedding provider error (transient): {0}")]
    EmbeddingTransient(String),

    #[error("embedding provider error (fatal): {0}")]
    EmbeddingFatal(String),

    #[error("chunk exceeds the embedding provider's token cap")]
    ChunkTooLarge,

    #[error("no branches matched the requested patterns")]
    NoMatchingBranches { available: Vec<String> },

    #[error("checkpoint is invalid and was discarded")]
    CheckpointInvalid,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("temporal indexing cannot start while a watch session is active")]
    WatchActive,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The wire-safe projection of [`DaemonError`]. Serialized at the socket
/// frame boundary instead of the error itself: a plain `{kind, message}`
/// record carried over the raw socket RPC framing this crate uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DaemonUnreachable,
    AddressInUse,
    StaleSocket,
    WrongRepository,
    IndexUnavailable,
    FtsUnavailable,
    StorageError,
    EmbeddingTransient,
    EmbeddingFatal,
    ChunkTooLarge,
    NoMatchingBranches,
    CheckpointInvalid,
    Cancelled,
    Timeout,
    WatchActive,
    Internal,
}

impl From<&DaemonError> for ErrorKind {
    fn from(err: &DaemonError) -> Self {
        match err {
            DaemonError::DaemonUnreachable => ErrorKind::DaemonUnreachable,
            DaemonError::AddressInUse => ErrorKind::AddressInUse,
            DaemonError::StaleSocket => ErrorKind::StaleSocket,
            DaemonError::WrongRepository => ErrorKind::WrongRepository,
            DaemonError::IndexUnavailable => ErrorKind::IndexUnavailable,
            DaemonError::FtsUnavailable => ErrorKind::FtsUnavailable,
            DaemonError::StorageError(_) => ErrorKind::StorageError,
            DaemonError::EmbeddingTransient(_) => ErrorKind::EmbeddingTransient,
            DaemonError::EmbeddingFatal(_) => ErrorKind::EmbeddingFatal,
            DaemonError::ChunkTooLarge => ErrorKind::ChunkTooLarge,
            DaemonError::NoMatchingBranches { .. } => ErrorKind::NoMatchingBranches,
            DaemonError::CheckpointInvalid => ErrorKind::CheckpointInvalid,
            DaemonError::Cancelled => ErrorKind::Cancelled,
            DaemonError::Timeout => ErrorKind::Timeout,
            DaemonError::WatchActive => ErrorKind::WatchActive,
            DaemonError::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<&DaemonError> for WireError {
    fn from(err: &DaemonError) -> Self {
        WireError {
            kind: err.into(),
            message: err.to_string(),
        }
    }
}

impl From<DaemonError> for WireError {
    fn from(err: DaemonError) -> Self {
        (&err).into()
    }
}
