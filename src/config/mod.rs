//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_DB_PATH: &str = "delayed_jobs.db";
const DEFAULT_MAX_CONCURRENT: usize = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file holding pending jobs.
    pub db_path: PathBuf,
    pub max_concurrent: usize,
    /// How often `serve` sweeps the store for rows written by other processes.
    pub poll_interval: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_concurrent = match var("DELAYJOB_MAX_CONCURRENT") {
            Some(raw) => parse_max_concurrent(&raw)?,
            None => DEFAULT_MAX_CONCURRENT,
        };

        let poll_interval_ms = match var("DELAYJOB_POLL_INTERVAL_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    return Err(Error::Config(format!(
                        "DELAYJOB_POLL_INTERVAL_MS must be a positive number of milliseconds, got {raw:?}"
                    )));
                }
            },
            None => DEFAULT_POLL_INTERVAL_MS,
        };

        Ok(Self {
            db_path: var("DELAYJOB_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            max_concurrent,
            poll_interval: Duration::from_millis(poll_interval_ms),
            otel_endpoint: var("OTEL_ENDPOINT").filter(|s| !s.is_empty()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent,
        }
    }
}

fn parse_max_concurrent(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(Error::Config(format!(
            "DELAYJOB_MAX_CONCURRENT must be a positive integer, got {raw:?}"
        ))),
    }
}

/// Runtime knobs for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum handler invocations running at once.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}
