use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::repo::state::StateSource;

static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Installs the global `tracing` subscriber exactly once per process. Logs
/// roll daily under `<config_dir>/logs/daemon.log`. The daemon never writes
/// to stdout/stderr beyond this subscriber, since those streams carry no
/// protocol bytes but could otherwise interleave with a terminal the client
/// binary owns.
pub fn tracing_subscribe(state: &StateSource) -> bool {
    let env_filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::daily(state.log_dir(), "daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    _ = LOGGER_GUARD.set(guard);
    let log_writer_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter_layer)
        .with(log_writer_layer)
        .try_init()
        .is_ok()
}

/// Same as [`tracing_subscribe`] but also echoes human-readable output to
/// stderr. Only ever used by the client binary, which owns the terminal.
pub fn tracing_subscribe_with_console(state: &StateSource) -> bool {
    let env_filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::daily(state.log_dir(), "client.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    _ = LOGGER_GUARD.set(guard);
    let log_writer_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter_layer)
        .with(log_writer_layer)
        .with(console_layer)
        .try_init()
        .is_ok()
}
