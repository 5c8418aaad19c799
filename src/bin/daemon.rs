// Daemon binary entry point. Socket bind is the daemon-singleton lock (see
// `daemon::connection`), so there is no pidfile and no separate "is a daemon
// already running" check here: if the bind fails with `AddressInUse`, this
// process exits 0 on the assumption that whoever raced us to the bind is the
// daemon now.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use code_indexer_daemon::application::application::Application;
use code_indexer_daemon::application::config::configuration::Configuration;
use code_indexer_daemon::daemon::connection::{accept_loop, bind};
use code_indexer_daemon::daemon::service::DaemonService;
use code_indexer_daemon::error::DaemonError;
use code_indexer_daemon::repo::state::StateSource;
use code_indexer_daemon::repo::types::RepoRef;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();
    let repo_root = configuration.repo_root();
    let reporef = RepoRef::from_root(&repo_root)?;
    let state = StateSource::for_repo(&reporef);
    state.ensure_dirs()?;

    Application::install_logging(&state, false);
    let _application = Application::initialize(configuration.clone()).await;

    info!(repo = %reporef, "starting code-indexer daemon");

    let listener = match bind(&state.socket_path()).await {
        Ok(listener) => listener,
        Err(DaemonError::AddressInUse) => {
            info!("another daemon already holds the socket; exiting");
            return Ok(());
        }
        Err(err) => {
            error!(%err, "failed to bind daemon socket");
            return Err(err.into());
        }
    };

    let service = Arc::new(DaemonService::new(reporef, configuration).await?);

    let accept_handle = tokio::spawn(accept_loop(listener, service.clone(), state.socket_path()));
    let eviction_handle = tokio::spawn(code_indexer_daemon::daemon::eviction::run(service.clone()));

    tokio::select! {
        result = accept_handle => {
            if let Err(err) = result {
                error!(%err, "accept loop task panicked");
            }
        }
        result = eviction_handle => {
            if let Err(err) = result {
                error!(%err, "eviction loop task panicked");
            }
            service.request_shutdown();
        }
    }

    Ok(())
}
