use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

/// Daemon and temporal-indexer configuration, readable both from the CLI
/// (via `clap::Parser` on the owning `Configuration`) and from
/// `<config_dir>/config.json`. Every field here corresponds to a row in the
/// recognized-options table; unknown/legacy keys found in the JSON file are
/// captured separately (see [`Configuration::from_config_file`]) rather than
/// rejected, via liberal use of `#[serde(default)]`.
#[derive(Serialize, Deserialize, Args, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DaemonConfig {
    #[clap(long, default_value_t = true)]
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[clap(long, default_value_t = default_ttl_minutes())]
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,

    #[clap(long, default_value_t = false)]
    #[serde(default)]
    pub auto_shutdown_on_idle: bool,

    #[clap(long, default_value_t = default_max_retries())]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[clap(long, value_delimiter = ',', default_values_t = default_retry_delays_ms())]
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    #[clap(long, default_value_t = default_eviction_check_interval_seconds())]
    #[serde(default = "default_eviction_check_interval_seconds")]
    pub eviction_check_interval_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ttl_minutes: default_ttl_minutes(),
            auto_shutdown_on_idle: false,
            max_retries: default_max_retries(),
            retry_delays_ms: default_retry_delays_ms(),
            eviction_check_interval_seconds: default_eviction_check_interval_seconds(),
        }
    }
}

#[derive(Serialize, Deserialize, Args, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TemporalConfig {
    #[clap(long, default_value_t = default_checkpoint_interval())]
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    #[clap(long, default_value_t = default_batch_size())]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[clap(long, default_value_t = default_max_batch_memory_mb())]
    #[serde(default = "default_max_batch_memory_mb")]
    pub max_batch_memory_mb: u64,

    #[clap(long, default_value_t = false)]
    #[serde(default)]
    pub enable_memory_monitoring: bool,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            batch_size: default_batch_size(),
            max_batch_memory_mb: default_max_batch_memory_mb(),
            enable_memory_monitoring: false,
        }
    }
}

#[derive(Serialize, Deserialize, clap::Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    /// Absolute path to the repository this daemon/client operates on.
    #[clap(long)]
    #[serde(skip)]
    pub repo_root: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[clap(flatten)]
    #[serde(default)]
    pub temporal: TemporalConfig,

    #[clap(long, default_value_t = default_max_batch_tokens())]
    #[serde(default = "default_max_batch_tokens")]
    /// Provider-imposed maximum tokens per embedding batch.
    pub max_batch_tokens: usize,

    #[clap(long, default_value_t = default_worker_count())]
    #[serde(default = "default_worker_count")]
    /// Size of the vector calculation manager's worker pool.
    pub embedding_worker_count: usize,

    #[clap(long, default_value_t = default_watch_debounce_ms())]
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    #[clap(long, default_value_t = default_reindex_threads())]
    #[serde(default = "default_reindex_threads")]
    pub reindex_threads: usize,

    #[clap(long, default_value_t = default_reindex_buffer_size())]
    #[serde(default = "default_reindex_buffer_size")]
    pub reindex_buffer_size: usize,
}

impl Configuration {
    pub fn repo_root(&self) -> PathBuf {
        self.repo_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().expect("current dir to be readable"))
    }

    /// Parses a configuration from `config.json`, preserving keys this
    /// binary does not recognize so they round-trip on the next write
    /// rather than being silently dropped, and logging a warning for each.
    pub fn from_config_file(contents: &str) -> anyhow::Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(contents)?;
        let known_top_level = ["daemon", "temporal", "max_batch_tokens", "embedding_worker_count", "watch_debounce_ms", "reindex_threads", "reindex_buffer_size"];
        if let serde_json::Value::Object(map) = &raw {
            for key in map.keys() {
                if !known_top_level.contains(&key.as_str()) {
                    tracing::warn!(key, "ignoring unrecognized configuration key");
                }
            }
        }
        Ok(serde_json::from_value(raw)?)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            repo_root: None,
            daemon: DaemonConfig::default(),
            temporal: TemporalConfig::default(),
            max_batch_tokens: default_max_batch_tokens(),
            embedding_worker_count: default_worker_count(),
            watch_debounce_ms: default_watch_debounce_ms(),
            reindex_threads: default_reindex_threads(),
            reindex_buffer_size: default_reindex_buffer_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ttl_minutes() -> u32 {
    30
}

fn default_max_retries() -> u32 {
    4
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![100, 500, 1000, 2000]
}

fn default_eviction_check_interval_seconds() -> u64 {
    60
}

fn default_checkpoint_interval() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    256
}

fn default_max_batch_memory_mb() -> u64 {
    512
}

fn default_max_batch_tokens() -> usize {
    120_000
}

fn default_worker_count() -> usize {
    4
}

fn default_watch_debounce_ms() -> u64 {
    500
}

fn default_reindex_threads() -> usize {
    2
}

fn default_reindex_buffer_size() -> usize {
    50_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Configuration::default();
        assert!(config.daemon.enabled);
        assert_eq!(config.daemon.ttl_minutes, 30);
        assert_eq!(config.daemon.retry_delays_ms.len() as u32, config.daemon.max_retries);
        assert_eq!(config.max_batch_tokens, 120_000);
    }

    #[test]
    fn unknown_keys_are_ignored_not_rejected() {
        let json = r#"{"daemon": {"ttl_minutes": 45}, "legacy_transport": "grpc"}"#;
        let config = Configuration::from_config_file(json).unwrap();
        assert_eq!(config.daemon.ttl_minutes, 45);
    }
}
