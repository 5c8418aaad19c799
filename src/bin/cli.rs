// Lightweight client binary: discovers or creates the per-repository
// configuration, then drives every subcommand through the
// `LightweightClient` delegation state machine, falling back to
// `StandaloneRunner` for the operations that support running without a
// daemon at all.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use code_indexer_daemon::application::application::Application;
use code_indexer_daemon::application::background::ProgressMessage;
use code_indexer_daemon::application::config::configuration::Configuration;
use code_indexer_daemon::client::{DelegationOutcome, LightweightClient};
use code_indexer_daemon::daemon::protocol::{HybridMergeMode, IndexCommitsArgs, Request, Response};
use code_indexer_daemon::repo::state::StateSource;
use code_indexer_daemon::repo::types::RepoRef;
use code_indexer_daemon::temporal::indexer::BranchStrategy;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "code-indexer", author, version, about = "Per-repository semantic and temporal code search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.code-indexer/config.json` for the current repository.
    Init {
        #[arg(long)]
        daemon: bool,
        #[arg(long)]
        daemon_ttl: Option<u32>,
    },
    /// Show or edit the repository's configuration.
    Config {
        #[arg(long)]
        show: bool,
        #[arg(long, overrides_with = "no_daemon")]
        daemon: bool,
        #[arg(long, overrides_with = "daemon")]
        no_daemon: bool,
        #[arg(long)]
        daemon_ttl: Option<u32>,
        #[arg(long, overrides_with = "no_auto_shutdown")]
        auto_shutdown: bool,
        #[arg(long, overrides_with = "auto_shutdown")]
        no_auto_shutdown: bool,
    },
    /// Ensure a daemon is running for this repository.
    Start,
    /// Ask the daemon to shut down.
    Stop,
    /// Search the repository.
    Query {
        text: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        fts: bool,
        #[arg(long)]
        semantic: bool,
    },
    /// (Re)build indexes.
    Index {
        #[arg(long)]
        index_commits: bool,
        #[arg(long)]
        all_branches: bool,
        #[arg(long)]
        branches: Vec<String>,
        #[arg(long)]
        max_commits: Option<u64>,
        #[arg(long)]
        since_date: Option<String>,
    },
    /// Start watching the working tree for changes.
    Watch,
    #[command(name = "watch-stop")]
    WatchStop,
    /// Drop the on-disk semantic index (keeps commit/blob metadata).
    Clean,
    #[command(name = "clean-data")]
    /// Drop everything this tool persists for the repository.
    CleanData,
    /// Report cache and storage status.
    Status,
    /// Daemon-specific maintenance subcommands.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    Status,
    #[command(name = "clear-cache")]
    ClearCache,
}

const EXIT_OK: u8 = 0;
const EXIT_GENERAL_FAILURE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_DAEMON_UNREACHABLE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let repo_root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("error: could not determine current directory: {err}");
            return ExitCode::from(EXIT_GENERAL_FAILURE);
        }
    };

    let reporef = match RepoRef::from_root(&repo_root) {
        Ok(reporef) => reporef,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let state = StateSource::for_repo(&reporef);

    match run(cli.command, reporef, state).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(EXIT_GENERAL_FAILURE)
        }
    }
}

async fn run(command: Command, reporef: RepoRef, state: StateSource) -> anyhow::Result<u8> {
    if let Command::Init { daemon, daemon_ttl } = command {
        return init(&reporef, &state, daemon, daemon_ttl);
    }

    let _ = state.ensure_dirs();
    Application::install_logging(&state, true);

    let config = load_config(&state);

    match command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Config { show, daemon, no_daemon, daemon_ttl, auto_shutdown, no_auto_shutdown } => {
            handle_config(&state, config, show, daemon, no_daemon, daemon_ttl, auto_shutdown, no_auto_shutdown)
        }
        Command::Start => {
            let client = LightweightClient::new(reporef.clone(), config);
            match client.invoke(Request::GetStatus, |_| {}).await {
                DelegationOutcome::Daemon(_) => {
                    println!("daemon running for {}", reporef);
                    Ok(EXIT_OK)
                }
                DelegationOutcome::Standalone => {
                    eprintln!("daemon is disabled or unreachable; running standalone for future commands");
                    Ok(EXIT_DAEMON_UNREACHABLE)
                }
            }
        }
        Command::Stop => {
            let client = LightweightClient::new(reporef.clone(), config);
            let _ = client.invoke(Request::Shutdown, |_| {}).await;
            println!("daemon stopped");
            Ok(EXIT_OK)
        }
        Command::Query { text, limit, fts, semantic } => query(reporef, config, text, limit, fts, semantic).await,
        Command::Index { index_commits, all_branches, branches, max_commits, since_date } => {
            index(reporef, config, index_commits, all_branches, branches, max_commits, since_date).await
        }
        Command::Watch => watch_start(reporef, config).await,
        Command::WatchStop => watch_stop(reporef, config).await,
        Command::Clean => clean(reporef, config, false).await,
        Command::CleanData => clean(reporef, config, true).await,
        Command::Status => status(reporef, config).await,
        Command::Daemon { action } => daemon_action(reporef, config, action).await,
    }
}

fn init(reporef: &RepoRef, state: &StateSource, daemon: bool, daemon_ttl: Option<u32>) -> anyhow::Result<u8> {
    state.ensure_dirs()?;

    let mut config = Configuration::default();
    config.daemon.enabled = daemon || config.daemon.enabled;
    if let Some(ttl) = daemon_ttl {
        config.daemon.ttl_minutes = ttl;
    }
    config.repo_root = Some(reporef.root().to_path_buf());

    let encoded = serde_json::to_string_pretty(&config)?;
    std::fs::write(state.config_file(), encoded)?;
    println!("initialized {}", state.config_dir().display());
    Ok(EXIT_OK)
}

fn load_config(state: &StateSource) -> Configuration {
    match std::fs::read_to_string(state.config_file()) {
        Ok(contents) => Configuration::from_config_file(&contents).unwrap_or_else(|err| {
            warn!(%err, "failed to parse config.json; using defaults");
            Configuration::default()
        }),
        Err(_) => Configuration::default(),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_config(
    state: &StateSource,
    mut config: Configuration,
    show: bool,
    daemon: bool,
    no_daemon: bool,
    daemon_ttl: Option<u32>,
    auto_shutdown: bool,
    no_auto_shutdown: bool,
) -> anyhow::Result<u8> {
    if show {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(EXIT_OK);
    }

    if daemon {
        config.daemon.enabled = true;
    }
    if no_daemon {
        config.daemon.enabled = false;
    }
    if let Some(ttl) = daemon_ttl {
        config.daemon.ttl_minutes = ttl;
    }
    if auto_shutdown {
        config.daemon.auto_shutdown_on_idle = true;
    }
    if no_auto_shutdown {
        config.daemon.auto_shutdown_on_idle = false;
    }

    let encoded = serde_json::to_string_pretty(&config)?;
    std::fs::write(state.config_file(), encoded)?;
    println!("configuration updated");
    Ok(EXIT_OK)
}

fn report_progress(message: ProgressMessage) {
    if message.total > 0 {
        eprintln!("[{}/{}] {} ({})", message.current, message.total, message.path, message.info);
    } else {
        eprintln!("{}", message.info);
    }
}

async fn query(reporef: RepoRef, config: Configuration, text: String, limit: usize, fts: bool, semantic: bool) -> anyhow::Result<u8> {
    let client = LightweightClient::new(reporef.clone(), config);
    let repo = reporef.root().to_string_lossy().to_string();

    let request = if fts {
        Request::QueryFts { repo, text: text.clone(), limit }
    } else if semantic {
        Request::Query { repo, text: text.clone(), limit }
    } else {
        Request::QueryHybrid { repo, text: text.clone(), limit, merge: HybridMergeMode::RankFused }
    };

    match client.invoke(request, report_progress).await {
        DelegationOutcome::Daemon(Response::Query { hits })
        | DelegationOutcome::Daemon(Response::QueryFts { hits })
        | DelegationOutcome::Daemon(Response::QueryHybrid { hits }) => {
            print_hits(&hits);
            Ok(EXIT_OK)
        }
        DelegationOutcome::Daemon(Response::Error { error }) => {
            eprintln!("query failed: {}", error.message);
            Ok(EXIT_GENERAL_FAILURE)
        }
        DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
        DelegationOutcome::Standalone => {
            let runner = client.standalone_runner();
            let result = if fts { runner.query_fts(&text, limit).await } else { runner.query(&text, limit).await };
            match result {
                Ok(hits) => {
                    print_hits(&hits);
                    Ok(EXIT_OK)
                }
                Err(err) => {
                    eprintln!("query failed: {err}");
                    Ok(EXIT_GENERAL_FAILURE)
                }
            }
        }
    }
}

fn print_hits(hits: &[code_indexer_daemon::daemon::protocol::SearchHit]) {
    if hits.is_empty() {
        println!("no results");
        return;
    }
    for hit in hits {
        println!("{:>7.3}  {}", hit.score, hit.file_path);
        if !hit.snippet.is_empty() {
            println!("         {}", hit.snippet);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn index(
    reporef: RepoRef,
    config: Configuration,
    index_commits: bool,
    all_branches: bool,
    branches: Vec<String>,
    max_commits: Option<u64>,
    since_date: Option<String>,
) -> anyhow::Result<u8> {
    let client = LightweightClient::new(reporef.clone(), config);
    let repo = reporef.root().to_string_lossy().to_string();

    let commits = if index_commits {
        let branch_strategy = if all_branches {
            BranchStrategy::All
        } else if !branches.is_empty() {
            BranchStrategy::Patterns(())
        } else {
            BranchStrategy::Current
        };
        let since_date_unix_secs = since_date.as_deref().and_then(parse_since_date);
        Some(IndexCommitsArgs { branch_strategy, branch_patterns: branches, max_commits, since_date_unix_secs, resume: true })
    } else {
        None
    };

    // `all`/`patterns` strategies can touch a large, unbounded slice of
    // history, so the daemon is asked to price the run first. The daemon
    // only computes the estimate; confirming it is our call to make.
    if let Some(args) = &commits {
        if matches!(args.branch_strategy, BranchStrategy::All | BranchStrategy::Patterns(())) {
            let estimate_request = Request::EstimateIndexCost { repo: repo.clone(), commits: args.clone() };
            match client.invoke(estimate_request, report_progress).await {
                DelegationOutcome::Daemon(Response::EstimateIndexCost { result }) => {
                    println!(
                        "this will index an estimated {} additional commit(s), ~{} new blob(s), ~{:.1} MiB, ~${:.2} in embedding API cost",
                        result.additional_commits,
                        result.estimated_additional_unique_blobs,
                        result.estimated_storage_bytes as f64 / (1024.0 * 1024.0),
                        result.estimated_api_cost_usd
                    );
                    if !confirm("proceed? [y/N] ") {
                        println!("aborted");
                        return Ok(EXIT_OK);
                    }
                }
                DelegationOutcome::Daemon(Response::Error { error }) => {
                    eprintln!("cost estimate failed: {}", error.message);
                    return Ok(EXIT_GENERAL_FAILURE);
                }
                DelegationOutcome::Daemon(_) => return Ok(EXIT_GENERAL_FAILURE),
                DelegationOutcome::Standalone => {
                    eprintln!("temporal indexing requires a daemon; none is reachable");
                    return Ok(EXIT_DAEMON_UNREACHABLE);
                }
            }
        }
    }

    let request = Request::Index { repo, commits, correlation_id: None };
    match client.invoke(request, report_progress).await {
        DelegationOutcome::Daemon(Response::Index { result }) => {
            println!(
                "indexed: commits={} new_blobs={} total_blobs={} dedup_ratio={:.2}{}",
                result.total_commits,
                result.new_blobs_indexed,
                result.total_unique_blobs,
                result.deduplication_ratio,
                if result.partial { " (partial, resumable)" } else { "" }
            );
            Ok(EXIT_OK)
        }
        DelegationOutcome::Daemon(Response::Error { error }) => {
            eprintln!("index failed: {}", error.message);
            Ok(EXIT_GENERAL_FAILURE)
        }
        DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
        DelegationOutcome::Standalone => {
            if index_commits {
                eprintln!("temporal indexing requires a daemon; none is reachable");
                return Ok(EXIT_DAEMON_UNREACHABLE);
            }
            match client.standalone_runner().index().await {
                Ok(()) => {
                    println!("indexed workspace");
                    Ok(EXIT_OK)
                }
                Err(err) => {
                    eprintln!("index failed: {err}");
                    Ok(EXIT_GENERAL_FAILURE)
                }
            }
        }
    }
}

fn confirm(prompt: &str) -> bool {
    use std::io::Write;
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn parse_since_date(date: &str) -> Option<i64> {
    use chrono::NaiveDate;
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

async fn watch_start(reporef: RepoRef, config: Configuration) -> anyhow::Result<u8> {
    let client = LightweightClient::new(reporef.clone(), config);
    let repo = reporef.root().to_string_lossy().to_string();
    match client.invoke(Request::WatchStart { repo, correlation_id: None }, report_progress).await {
        DelegationOutcome::Daemon(Response::WatchStart { status }) => {
            println!("watch: {status:?}");
            Ok(EXIT_OK)
        }
        DelegationOutcome::Daemon(Response::Error { error }) => {
            eprintln!("watch start failed: {}", error.message);
            Ok(EXIT_GENERAL_FAILURE)
        }
        DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
        DelegationOutcome::Standalone => {
            eprintln!("watch requires a daemon; none is reachable");
            Ok(EXIT_DAEMON_UNREACHABLE)
        }
    }
}

async fn watch_stop(reporef: RepoRef, config: Configuration) -> anyhow::Result<u8> {
    let client = LightweightClient::new(reporef.clone(), config);
    let repo = reporef.root().to_string_lossy().to_string();
    match client.invoke(Request::WatchStop { repo }, report_progress).await {
        DelegationOutcome::Daemon(Response::WatchStop { result }) => {
            println!("watch stopped: status={:?} files_processed={} updates_applied={}", result.status, result.files_processed, result.updates_applied);
            Ok(EXIT_OK)
        }
        DelegationOutcome::Daemon(Response::Error { error }) => {
            eprintln!("watch stop failed: {}", error.message);
            Ok(EXIT_GENERAL_FAILURE)
        }
        DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
        DelegationOutcome::Standalone => {
            eprintln!("no daemon reachable; nothing was watching");
            Ok(EXIT_OK)
        }
    }
}

async fn clean(reporef: RepoRef, config: Configuration, all_data: bool) -> anyhow::Result<u8> {
    let client = LightweightClient::new(reporef.clone(), config);
    let repo = reporef.root().to_string_lossy().to_string();
    let request = if all_data { Request::CleanData { repo } } else { Request::Clean { repo } };

    match client.invoke(request, report_progress).await {
        DelegationOutcome::Daemon(Response::Clean { result }) | DelegationOutcome::Daemon(Response::CleanData { result }) => {
            println!("cleaned: ok={} cache_invalidated={}", result.ok, result.cache_invalidated);
            Ok(EXIT_OK)
        }
        DelegationOutcome::Daemon(Response::Error { error }) => {
            eprintln!("clean failed: {}", error.message);
            Ok(EXIT_GENERAL_FAILURE)
        }
        DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
        DelegationOutcome::Standalone => match client.standalone_runner().clean(all_data) {
            Ok(()) => {
                println!("cleaned");
                Ok(EXIT_OK)
            }
            Err(err) => {
                eprintln!("clean failed: {err}");
                Ok(EXIT_GENERAL_FAILURE)
            }
        },
    }
}

async fn status(reporef: RepoRef, config: Configuration) -> anyhow::Result<u8> {
    let client = LightweightClient::new(reporef.clone(), config);
    let repo = reporef.root().to_string_lossy().to_string();
    match client.invoke(Request::Status { repo }, |_| {}).await {
        DelegationOutcome::Daemon(Response::Status { result }) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(EXIT_OK)
        }
        DelegationOutcome::Daemon(Response::Error { error }) => {
            eprintln!("status failed: {}", error.message);
            Ok(EXIT_GENERAL_FAILURE)
        }
        DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
        DelegationOutcome::Standalone => {
            println!("no daemon running for {reporef}");
            Ok(EXIT_OK)
        }
    }
}

async fn daemon_action(reporef: RepoRef, config: Configuration, action: DaemonAction) -> anyhow::Result<u8> {
    let client = LightweightClient::new(reporef.clone(), config);
    match action {
        DaemonAction::Status => match client.invoke(Request::GetStatus, |_| {}).await {
            DelegationOutcome::Daemon(Response::GetStatus { result }) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(EXIT_OK)
            }
            DelegationOutcome::Daemon(Response::Error { error }) => {
                eprintln!("daemon status failed: {}", error.message);
                Ok(EXIT_GENERAL_FAILURE)
            }
            DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
            DelegationOutcome::Standalone => {
                println!("{{\"running\": false}}");
                Ok(EXIT_DAEMON_UNREACHABLE)
            }
        },
        DaemonAction::ClearCache => match client.invoke(Request::ClearCache, |_| {}).await {
            DelegationOutcome::Daemon(Response::ClearCache) => {
                println!("cache cleared");
                Ok(EXIT_OK)
            }
            DelegationOutcome::Daemon(Response::Error { error }) => {
                error!(message = %error.message, "clear-cache failed");
                Ok(EXIT_GENERAL_FAILURE)
            }
            DelegationOutcome::Daemon(_) => Ok(EXIT_GENERAL_FAILURE),
            DelegationOutcome::Standalone => {
                eprintln!("no daemon running; nothing to clear");
                Ok(EXIT_OK)
            }
        },
    }
}

