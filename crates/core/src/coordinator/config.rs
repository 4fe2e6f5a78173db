use crate::config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process-level settings of a [`Coordinator`](super::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Directory holding `store/` and `index/`. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Threads in the query pool.
    pub search_threads: usize,
    /// Whether [`Coordinator::reset`](super::Coordinator::reset) may run.
    pub allow_reset: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            search_threads: default_search_threads(),
            allow_reset: false,
        }
    }
}

fn default_search_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::invalid_config(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

impl CoordinatorConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_allow_reset(mut self, allow: bool) -> Self {
        self.allow_reset = allow;
        self
    }

    pub fn with_search_threads(mut self, threads: usize) -> Self {
        self.search_threads = threads;
        self
    }

    /// Reads `QUIVERDB_DATA_DIR`, `QUIVERDB_SEARCH_THREADS` and
    /// `QUIVERDB_ALLOW_RESET`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(dir) = lookup(config::ENV_DATA_DIR).filter(|d| !d.is_empty()) {
            cfg.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(config::ENV_SEARCH_THREADS) {
            cfg.search_threads = raw.trim().parse().map_err(|_| {
                Error::invalid_config(format!(
                    "{} must be a positive integer, got '{raw}'",
                    config::ENV_SEARCH_THREADS
                ))
            })?;
        }
        if let Some(raw) = lookup(config::ENV_ALLOW_RESET) {
            cfg.allow_reset = parse_bool(config::ENV_ALLOW_RESET, &raw)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.search_threads == 0 {
            return Err(Error::invalid_config("search_threads must be positive"));
        }
        Ok(())
    }
}
