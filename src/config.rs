//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - policy.toml (default configuration)
//! - policy.local.toml (git-ignored local overrides)
//! - Environment variables (POLICY_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # policy.toml
//! [solver]
//! time_limit_ms = 5000
//! num_workers = 0
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! POLICY_SOLVER__TIME_LIMIT_MS=250
//! POLICY_LOGGING__FORMAT=json
//! ```

use crate::model::SolveParams;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Solver invocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Wall-clock budget per solve, in milliseconds
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,

    /// Worker hint for the backend (0 = use all available CPU cores)
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Lower bound for integer variables without a declared domain
    #[serde(default = "default_lower_bound")]
    pub default_lower_bound: i64,

    /// Upper bound for integer variables without a declared domain
    #[serde(default = "default_upper_bound")]
    pub default_upper_bound: i64,

    #[serde(default)]
    pub log_search_progress: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error, or an EnvFilter
    /// directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file; stderr when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_time_limit_ms() -> u64 {
    10_000
}

fn default_num_workers() -> usize {
    1
}

fn default_lower_bound() -> i64 {
    -1024
}

fn default_upper_bound() -> i64 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. policy.toml (base configuration)
    /// 2. policy.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (POLICY_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("policy.toml"))
            .merge(Toml::file("policy.local.toml"))
            .merge(Env::prefixed("POLICY_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("POLICY_").split("__"))
            .extract()
    }
}

impl SolverConfig {
    /// Backend parameters for these settings
    pub fn to_params(&self) -> SolveParams {
        let num_workers = if self.num_workers == 0 {
            num_cpus::get()
        } else {
            self.num_workers
        };
        SolveParams {
            time_limit: Duration::from_millis(self.time_limit_ms),
            num_workers,
            default_domain: (self.default_lower_bound, self.default_upper_bound),
            log_search_progress: self.log_search_progress,
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            time_limit_ms: default_time_limit_ms(),
            num_workers: default_num_workers(),
            default_lower_bound: default_lower_bound(),
            default_upper_bound: default_upper_bound(),
            log_search_progress: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}
