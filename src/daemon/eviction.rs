// The TTL eviction loop: a single background task woken every
// `eviction_check_interval`. The critical section is only a timestamp
// comparison and a slot drop. Auto-shutdown is additionally gated on the
// daemon's `active_requests` counter being zero at the moment of the check,
// so a request mid-flight when TTL expires is never interrupted; shutdown is
// simply retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::daemon::service::DaemonService;

pub async fn run(service: Arc<DaemonService>) {
    let mut interval = tokio::time::interval(service.eviction_check_interval());
    loop {
        interval.tick().await;
        if service.is_shutting_down() {
            return;
        }

        let entry = service.cache_entry();
        if !entry.is_expired() {
            continue;
        }

        if service.active_requests() > 0 {
            info!("ttl expired but requests in flight; deferring eviction/shutdown one more interval");
            continue;
        }

        entry.invalidate().await;
        info!(idle_for = ?entry.idle_for(), "cache entry evicted after ttl expiry");

        if service.auto_shutdown_on_idle() {
            info!("auto_shutdown_on_idle set; requesting daemon shutdown");
            service.request_shutdown();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::configuration::Configuration;
    use crate::repo::types::RepoRef;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn eviction_clears_an_idle_entry_without_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let reporef = RepoRef::from_root(dir.path().canonicalize().unwrap()).unwrap();
        let mut config = Configuration::default();
        config.daemon.ttl_minutes = 0;
        config.daemon.auto_shutdown_on_idle = false;
        config.daemon.eviction_check_interval_seconds = 0;

        let service = Arc::new(DaemonService::new(reporef, config).await.unwrap());
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let svc = service.clone();
        let handle = tokio::spawn(async move { run(svc).await });
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!service.cache_entry().is_loaded().await);
        assert!(!service.is_shutting_down());
        handle.abort();
    }
}
