// Lightweight Client delegation state machine: detect whether
// a daemon is configured, auto-start it if required, connect with bounded
// exponential-backoff retries, recover from crashes with a bounded number
// of restart attempts, and fall back to in-process standalone execution
// when exhausted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{info, warn};

use crate::application::background::ProgressMessage;
use crate::application::config::configuration::Configuration;
use crate::client::standalone::StandaloneRunner;
use crate::daemon::protocol::{Frame, Request, Response};
use crate::error::DaemonError;
use crate::repo::state::StateSource;
use crate::repo::types::RepoRef;

/// Bounds how many times a crashed daemon is restarted before the client
/// gives up and falls back to standalone execution.
const MAX_RESTART_ATTEMPTS: u32 = 2;

pub enum DelegationOutcome {
    /// The daemon handled the request; here is its reply.
    Daemon(Response),
    /// No usable daemon; the caller should run the equivalent operation
    /// through [`StandaloneRunner`] itself.
    Standalone,
}

pub struct LightweightClient {
    reporef: RepoRef,
    state: StateSource,
    config: Configuration,
}

impl LightweightClient {
    /// Walks parent directories from `start` looking for
    /// `.code-indexer/config.json`; returns `None` (→ standalone, no
    /// daemon configured at all) if none is found.
    pub fn discover(start: &Path) -> Option<(RepoRef, Configuration)> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(".code-indexer").join("config.json");
            if candidate.exists() {
                let reporef = RepoRef::from_root(&dir).ok()?;
                let contents = std::fs::read_to_string(&candidate).ok()?;
                let config = Configuration::from_config_file(&contents).unwrap_or_default();
                return Some((reporef, config));
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    pub fn new(reporef: RepoRef, config: Configuration) -> Self {
        let state = StateSource::for_repo(&reporef);
        Self { reporef, state, config }
    }

    pub fn standalone_runner(&self) -> StandaloneRunner {
        StandaloneRunner::new(self.reporef.clone(), self.config.clone())
    }

    /// Runs the full state machine for one `request`, invoking `on_progress`
    /// for each progress frame streamed back before the final response.
    pub async fn invoke(&self, request: Request, mut on_progress: impl FnMut(ProgressMessage)) -> DelegationOutcome {
        if !self.config.daemon.enabled {
            info!("daemon disabled by configuration; running standalone");
            return DelegationOutcome::Standalone;
        }

        for restart_attempt in 0..=MAX_RESTART_ATTEMPTS {
            match self.connect_with_retries().await {
                Ok(mut conn) => {
                    let encoded = match serde_json::to_vec(&request) {
                        Ok(bytes) => bytes,
                        Err(_) => return DelegationOutcome::Standalone,
                    };
                    if conn.send(encoded.into()).await.is_err() {
                        warn!("connection dropped mid-request; treating as a crash");
                        continue;
                    }

                    loop {
                        match conn.next().await {
                            Some(Ok(bytes)) => match serde_json::from_slice::<Frame>(&bytes) {
                                Ok(Frame::Progress(message)) => on_progress(message),
                                Ok(Frame::Response(response)) => return DelegationOutcome::Daemon(response),
                                Err(_) => return DelegationOutcome::Standalone,
                            },
                            Some(Err(_)) | None => break,
                        }
                    }
                    warn!("connection closed before a response arrived; treating as a crash");
                }
                Err(_) => {}
            }

            if restart_attempt < MAX_RESTART_ATTEMPTS {
                info!(attempt = restart_attempt + 1, max = MAX_RESTART_ATTEMPTS, "attempting daemon restart");
                self.reap_stale_socket().await;
                if self.spawn_daemon().is_err() {
                    continue;
                }
            }
        }

        warn!("daemon unreachable after bounded restart attempts; falling back to standalone");
        DelegationOutcome::Standalone
    }

    async fn connect_with_retries(&self) -> Result<Framed<UnixStream, LengthDelimitedCodec>, DaemonError> {
        let socket_path = self.state.socket_path();
        if !socket_path.exists() {
            self.spawn_daemon()?;
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        let delays = &self.config.daemon.retry_delays_ms;
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => return Ok(Framed::new(stream, LengthDelimitedCodec::new())),
            Err(_) if delays.is_empty() => return Err(DaemonError::DaemonUnreachable),
            Err(_) => {}
        }

        for delay_ms in delays {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            if let Ok(stream) = UnixStream::connect(&socket_path).await {
                return Ok(Framed::new(stream, LengthDelimitedCodec::new()));
            }
        }
        Err(DaemonError::DaemonUnreachable)
    }

    async fn reap_stale_socket(&self) {
        let socket_path = self.state.socket_path();
        if socket_path.exists() && UnixStream::connect(&socket_path).await.is_err() {
            let _ = std::fs::remove_file(&socket_path);
        }
    }

    /// Spawns the daemon binary detached; socket-bind is the spawn guard,
    /// so a race where two clients spawn concurrently just means one
    /// daemon process exits 0 on `AddressInUse` (see `daemon::connection`).
    fn spawn_daemon(&self) -> Result<(), DaemonError> {
        let exe = daemon_binary_path()?;
        std::process::Command::new(exe)
            .arg("--repo-root")
            .arg(self.reporef.root())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map(|_child| ())
            .map_err(|e| DaemonError::StorageError(e.to_string()))
    }
}

fn daemon_binary_path() -> Result<PathBuf, DaemonError> {
    let current = std::env::current_exe().map_err(|e| DaemonError::StorageError(e.to_string()))?;
    let dir = current.parent().ok_or_else(|| DaemonError::StorageError("client binary has no parent directory".into()))?;
    let name = if cfg!(windows) { "code-indexer-daemon.exe" } else { "code-indexer-daemon" };
    Ok(dir.join(name))
}
