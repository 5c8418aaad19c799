// Socket acceptance and per-connection framing. `tokio::net::UnixListener`
// is the transport; binding the socket path is itself the daemon-singleton
// lock, so this module owns both the bind and the `AddressInUse`/
// `StaleSocket` recovery around it. Frames are length-delimited
// (`tokio_util::codec::LengthDelimitedCodec`) carrying `serde_json`-encoded
// `Frame` values, the same `serde_json` wire-body preference used
// elsewhere in this crate, moved from HTTP onto a raw socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{error, info, warn};

use crate::daemon::protocol::{Frame, Request, Response};
use crate::daemon::service::DaemonService;
use crate::error::DaemonError;

pub type Conn = Framed<UnixStream, LengthDelimitedCodec>;

/// Binds `socket_path`, reaping a stale socket file first if nothing is
/// listening behind it. Returns `AddressInUse` unchanged if another daemon
/// already holds the bind — the caller (the daemon binary's `main`) exits
/// cleanly on that error rather than treating it as a failure.
pub async fn bind(socket_path: &Path) -> Result<UnixListener, DaemonError> {
    match UnixListener::bind(socket_path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if probe_stale(socket_path).await {
                warn!(?socket_path, "reaping stale socket file");
                std::fs::remove_file(socket_path).map_err(|e| DaemonError::StorageError(e.to_string()))?;
                UnixListener::bind(socket_path).map_err(|_| DaemonError::AddressInUse)
            } else {
                Err(DaemonError::AddressInUse)
            }
        }
        Err(e) => Err(DaemonError::StorageError(e.to_string())),
    }
}

/// A socket file can exist with no listener behind it (the prior daemon
/// crashed without cleaning up). Connecting to it is the only reliable way
/// to tell a live daemon from a stale file.
async fn probe_stale(socket_path: &Path) -> bool {
    UnixStream::connect(socket_path).await.is_err()
}

pub async fn accept_loop(listener: UnixListener, service: Arc<DaemonService>, socket_path: PathBuf) {
    info!(?socket_path, "daemon listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, service).await {
                                error!(%err, "connection worker failed");
                            }
                        });
                    }
                    Err(err) => {
                        error!(%err, "accept failed");
                    }
                }
            }
            _ = service.shutdown_signal() => {
                info!("shutdown requested, closing listener");
                let _ = std::fs::remove_file(&socket_path);
                break;
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, service: Arc<DaemonService>) -> anyhow::Result<()> {
    let mut conn: Conn = Framed::new(stream, LengthDelimitedCodec::new());

    let request: Request = match conn.next().await {
        Some(Ok(bytes)) => serde_json::from_slice(&bytes)?,
        Some(Err(err)) => return Err(err.into()),
        None => return Ok(()),
    };

    let response = service.handle(request, &mut conn).await;
    let is_shutdown = matches!(response, Response::Shutdown);
    let frame = Frame::Response(response);
    let encoded = serde_json::to_vec(&frame)?;
    conn.send(encoded.into()).await?;

    // The `Shutdown` RPC only sets the shutting-down flag; the listener is
    // not told to close until the response above has actually been handed
    // to the socket, so the client never loses the acknowledgement to a
    // runtime shutdown racing the send.
    if is_shutdown {
        service.confirm_shutdown();
    }

    Ok(())
}

/// Sends one progress frame over the still-open connection. Best-effort:
/// a client that has stopped reading (e.g. it only wants the final
/// response) is not an error for the daemon.
pub async fn send_progress(conn: &mut Conn, message: crate::application::background::ProgressMessage) {
    if let Ok(encoded) = serde_json::to_vec(&Frame::Progress(message)) {
        let _ = conn.send(encoded.into()).await;
    }
}

pub fn wrap_error(error: DaemonError) -> Response {
    Response::Error { error: error.into() }
}
