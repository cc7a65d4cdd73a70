//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::query::dates::parse_offset;
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where a loaded config came from
#[derive(Debug, Default)]
pub struct ConfigOrigin {
    /// File the config was read from; `None` means defaults plus environment
    pub path: Option<PathBuf>,
    /// Candidate files that exist but failed to load
    pub rejected: Vec<(PathBuf, ConfigError)>,
}

impl ConfigOrigin {
    pub fn from_file(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            rejected: Vec::new(),
        }
    }

    pub fn log(&self) {
        for (path, e) in &self.rejected {
            tracing::warn!("Failed to load config from {:?}: {}", path, e);
        }
        match &self.path {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::info!("Using default config with environment overrides"),
        }
    }
}

/// What to do when one member of an INCLUDE / `exists` fan-out fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeFailureMode {
    /// Abort the query with the adapter's error
    #[default]
    FailFast,
    /// Record the failure against that parent record and continue
    Skip,
}

impl std::str::FromStr for IncludeFailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail_fast" => Ok(Self::FailFast),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "Invalid include_failure '{}'. Supported modes: fail_fast, skip",
                other
            )),
        }
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Global record cap
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Wall-clock budget for one live run
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Concurrent fetches within one INCLUDE / exists batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Timezone for day literals and naive dates
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    #[serde(default)]
    pub include_failure: IncludeFailureMode,

    /// Dry-run sizing when the source cannot count
    #[serde(default = "default_estimated_records")]
    pub default_estimated_records: u64,

    #[serde(default = "default_cursor_ttl")]
    pub cursor_ttl_secs: u64,
}

fn default_max_records() -> usize {
    10_000
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_concurrency() -> usize {
    10
}

fn default_page_size() -> usize {
    100
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_estimated_records() -> u64 {
    100
}

fn default_cursor_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            timeout_secs: default_timeout(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            utc_offset: default_utc_offset(),
            include_failure: IncludeFailureMode::default(),
            default_estimated_records: default_estimated_records(),
            cursor_ttl_secs: default_cursor_ttl(),
        }
    }
}

impl EngineConfig {
    /// Parsed `utc_offset`
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_offset(&self.utc_offset).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "utc_offset '{}' must be UTC, Z, +HH:MM or -HH:MM",
                self.utc_offset
            ))
        })
    }

    /// Check values that deserialize fine but cannot run
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.offset()?;
        if self.max_records == 0 {
            return Err(ConfigError::Invalid("max_records must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.engine.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.engine.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment.
    ///
    /// Nothing is logged here; the returned [`ConfigOrigin`] is reported once
    /// the subscriber built from this config is installed.
    pub fn load_default() -> (Self, ConfigOrigin) {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("recordql").join("config.toml")),
            Some(PathBuf::from("/etc/recordql/config.toml")),
            Some(PathBuf::from("./recordql.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first candidate that exists and parses
    fn load_first(candidates: &[PathBuf]) -> (Self, ConfigOrigin) {
        let mut origin = ConfigOrigin::default();
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    origin.path = Some(path.clone());
                    return (config, origin);
                }
                Err(e) => origin.rejected.push((path.clone(), e)),
            }
        }
        (Self::from_env(), origin)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Engine overrides
        if let Some(v) = lookup("RECORDQL_MAX_RECORDS").and_then(|v| v.parse().ok()) {
            self.engine.max_records = v;
        }
        if let Some(v) = lookup("RECORDQL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.engine.timeout_secs = v;
        }
        if let Some(v) = lookup("RECORDQL_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.engine.concurrency = v;
        }
        if let Some(v) = lookup("RECORDQL_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.engine.page_size = v;
        }
        if let Some(v) = lookup("RECORDQL_UTC_OFFSET") {
            self.engine.utc_offset = v;
        }
        if let Some(v) = lookup("RECORDQL_INCLUDE_FAILURE").and_then(|v| v.parse().ok()) {
            self.engine.include_failure = v;
        }

        // Logging overrides
        if let Some(level) = lookup("RECORDQL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("RECORDQL_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# RecordQL Configuration
#
# Environment variables override these settings:
# - RECORDQL_MAX_RECORDS
# - RECORDQL_TIMEOUT_SECS
# - RECORDQL_CONCURRENCY
# - RECORDQL_PAGE_SIZE
# - RECORDQL_UTC_OFFSET
# - RECORDQL_INCLUDE_FAILURE
# - RECORDQL_LOG_LEVEL
# - RECORDQL_LOG_FORMAT

[engine]
# Maximum records fetched by one query; also the ceiling for "limit"
max_records = 10000

# Wall-clock timeout for one query (seconds)
timeout_secs = 300

# Concurrent fetches for include / exists fan-out
concurrency = 10

# Records requested per page
page_size = 100

# Timezone for today / yesterday / tomorrow and dates without an offset
utc_offset = "+00:00"

# Fan-out member failure handling: fail_fast or skip
include_failure = "fail_fast"

# Dry-run sizing when the data source cannot count records
default_estimated_records = 100

# Lifetime of a resumable cursor (seconds)
cursor_ttl_secs = 3600

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
