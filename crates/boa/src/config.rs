//! Runtime configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// BOA configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BoaConfig {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 8000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database URL (default: sqlite://./data/boa.db)
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Maximum database connections (default: 10)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Directory for model checkpoints and artifacts
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Campaign write-lock TTL in seconds (default: 30)
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Job worker poll interval in seconds (default: 1)
    #[serde(default = "default_worker_poll_secs")]
    pub worker_poll_secs: f64,

    /// RUNNING jobs older than this are reclaimed as FAILED (default: 24h)
    #[serde(default = "default_job_stale_secs")]
    pub job_stale_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_database_url() -> String {
    "sqlite://./data/boa.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_worker_poll_secs() -> f64 {
    1.0
}

fn default_job_stale_secs() -> u64 {
    24 * 3600
}

impl BoaConfig {
    /// Load configuration from BOA_-prefixed environment variables
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("BOA_HOST").unwrap_or_else(|_| default_host());
        let port = std::env::var("BOA_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_port);
        let database_url =
            std::env::var("BOA_DATABASE_URL").unwrap_or_else(|_| default_database_url());
        let max_connections = std::env::var("BOA_DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_max_connections);
        let checkpoint_dir = std::env::var("BOA_CHECKPOINT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_checkpoint_dir());
        let lock_ttl_secs = std::env::var("BOA_LOCK_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_lock_ttl_secs);
        let worker_poll_secs = std::env::var("BOA_WORKER_POLL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_worker_poll_secs);
        let job_stale_secs = std::env::var("BOA_JOB_STALE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_job_stale_secs);

        Ok(Self {
            host,
            port,
            database_url,
            max_connections,
            checkpoint_dir,
            lock_ttl_secs,
            worker_poll_secs,
            job_stale_secs,
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: BoaConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }
}

impl Default for BoaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            checkpoint_dir: default_checkpoint_dir(),
            lock_ttl_secs: default_lock_ttl_secs(),
            worker_poll_secs: default_worker_poll_secs(),
            job_stale_secs: default_job_stale_secs(),
        }
    }
}
