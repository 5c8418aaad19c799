// Progress plumbing shared by the workspace indexer, the temporal indexer
// and the watch handler. Events carry an RPC correlation identifier
// rather than a `RepoRef`, since this daemon serves exactly one
// repository.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Shape required by the external interface: primitives only, so it can be
/// serialized across the socket with no language-specific object graph.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    pub current: u32,
    pub total: u32,
    pub path: String,
    pub info: String,
    pub correlation_id: Option<String>,
}

/// Handed to every long-running operation (workspace indexing, temporal
/// indexing, watch updates) so it can report progress and observe
/// cooperative cancellation without knowing about sockets or RPC framing.
#[derive(Clone)]
pub struct IndexingPipes {
    correlation_id: Option<String>,
    cancelled: Arc<AtomicBool>,
    sink: flume::Sender<ProgressMessage>,
}

impl IndexingPipes {
    pub fn new(correlation_id: Option<String>) -> (Self, flume::Receiver<ProgressMessage>) {
        let (sink, source) = flume::unbounded();
        (
            Self {
                correlation_id,
                cancelled: Arc::new(AtomicBool::new(false)),
                sink,
            },
            source,
        )
    }

    /// A pipe with nowhere to send progress, used by tests and by callers
    /// that did not request a progress stream.
    pub fn detached() -> Self {
        Self::new(None).0
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn report(&self, current: u32, total: u32, path: impl Into<String>, info: impl Into<String>) {
        // best-effort: a dropped receiver (client disconnected) is not an error
        _ = self.sink.send(ProgressMessage {
            current,
            total,
            path: path.into(),
            info: info.into(),
            correlation_id: self.correlation_id.clone(),
        });
    }

    pub fn index_percent(&self, pct: u8) {
        self.report(pct as u32, 100, String::new(), String::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observed_through_cloned_handles() {
        let (pipes, _rx) = IndexingPipes::new(None);
        let other = pipes.clone();
        assert!(!other.is_cancelled());
        pipes.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn progress_messages_carry_the_correlation_id() {
        let (pipes, rx) = IndexingPipes::new(Some("corr-1".to_string()));
        pipes.index_percent(50);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.current, 50);
        assert_eq!(msg.correlation_id.as_deref(), Some("corr-1"));
    }
}
