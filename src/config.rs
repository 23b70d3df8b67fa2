//! Configuration Module
//!
//! Handles loading service configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::cache::{InvalidationRouter, PolicyFile, TtlPolicy};
use crate::retry::RetryOptions;

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// TTL in seconds for operations without an explicit one
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Critical refresh interval in seconds
    pub refresh_interval: u64,
    /// SQLite file; `None` keeps everything in memory
    pub db_path: Option<PathBuf>,
    /// Gzip cached payloads on disk
    pub compress: bool,
    pub upstream_url: String,
    pub remote_timeout_ms: u64,
    pub retry_max: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Replay attempts before a queued write is dead-lettered; 0 = unbounded
    pub queue_max_attempts: u32,
    /// Optional JSON file overriding the policy tables
    pub policy_file: Option<PathBuf>,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` (1000), `DEFAULT_TTL` seconds (300), `SERVER_PORT` (3000)
    /// - `CLEANUP_INTERVAL` seconds (60), `REFRESH_INTERVAL` seconds (300)
    /// - `CACHE_DB_PATH` (`offline_cache.db`, empty for memory only)
    /// - `CACHE_COMPRESS` (false)
    /// - `UPSTREAM_URL` (`http://127.0.0.1:8080`), `REMOTE_TIMEOUT_MS` (10000)
    /// - `RETRY_MAX` (3), `RETRY_BASE_DELAY_MS` (1000), `RETRY_MAX_DELAY_MS` (10000)
    /// - `QUEUE_MAX_ATTEMPTS` (10)
    /// - `POLICY_FILE` (unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            refresh_interval: env_or("REFRESH_INTERVAL", defaults.refresh_interval),
            db_path: match env::var("CACHE_DB_PATH") {
                Ok(path) if path.trim().is_empty() => None,
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => defaults.db_path,
            },
            compress: env_or("CACHE_COMPRESS", defaults.compress),
            upstream_url: env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            remote_timeout_ms: env_or("REMOTE_TIMEOUT_MS", defaults.remote_timeout_ms),
            retry_max: env_or("RETRY_MAX", defaults.retry_max),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            queue_max_attempts: env_or("QUEUE_MAX_ATTEMPTS", defaults.queue_max_attempts),
            policy_file: env::var("POLICY_FILE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    /// Retry options; the remote timeout bounds each attempt.
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions::default()
            .with_max_retries(self.retry_max)
            .with_delays(
                Duration::from_millis(self.retry_base_delay_ms),
                Duration::from_millis(self.retry_max_delay_ms),
            )
            .with_timeout(self.remote_timeout())
    }

    /// Reads `POLICY_FILE`, or an empty override set when none is configured.
    pub fn load_policy(&self) -> anyhow::Result<PolicyFile> {
        let Some(path) = &self.policy_file else {
            return Ok(PolicyFile::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading policy file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing policy file {}", path.display()))
    }

    /// Built-in tables with the policy file layered on top.
    pub fn policy_tables(&self, file: &PolicyFile) -> (TtlPolicy, InvalidationRouter) {
        let mut ttl = TtlPolicy::records_default(self.default_ttl());
        let mut router = InvalidationRouter::records_default();
        file.apply(&mut ttl, &mut router);
        (ttl, router)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: 300,
            server_port: 3000,
            cleanup_interval: 60,
            refresh_interval: 300,
            db_path: Some(PathBuf::from("offline_cache.db")),
            compress: false,
            upstream_url: "http://127.0.0.1:8080".to_string(),
            remote_timeout_ms: 10_000,
            retry_max: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            queue_max_attempts: 10,
            policy_file: None,
        }
    }
}
