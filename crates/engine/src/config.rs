//! Importer configuration via `logsync.toml`
//!
//! The importer reads one TOML file whose path the caller supplies. Every
//! field is optional; missing fields take the defaults below.

use crate::position::RegressionPolicy;
use crate::scanner::DEFAULT_MAX_BATCH_SIZE;
use logsync_durability::{DurabilityMode, LogConfig};
use logsync_executor::{Backoff, RetryPolicy, DEFAULT_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "logsync.toml";

/// Importer configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("config file '{path}': {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying I/O error
        message: String,
    },

    /// The file is not valid TOML for this config
    #[error("failed to parse config file '{path}': {message}")]
    Parse {
        /// File path
        path: String,
        /// Parser message
        message: String,
    },

    /// The config could not be rendered as TOML
    #[error("failed to serialize config: {0}")]
    Serialize(String),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Store I/O retry settings (`[retry]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Attempts per operation, including the first
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
    /// Upper bound for exponential backoff in milliseconds
    pub max_delay_ms: u64,
    /// `"fixed"` or `"exponential"`
    pub backoff: String,
    /// Randomize delays into `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        RetrySection {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_DELAY_MS,
            max_delay_ms: DEFAULT_DELAY_MS,
            backoff: "fixed".to_string(),
            jitter: false,
        }
    }
}

/// Partition log settings (`[log]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Segment size in bytes
    pub segment_size: u64,
    /// Records between sparse index entries
    pub index_interval: usize,
    /// `"standard"` or `"always"`
    pub durability: String,
}

impl Default for LogSection {
    fn default() -> Self {
        let defaults = LogConfig::default();
        LogSection {
            segment_size: defaults.segment_size,
            index_interval: defaults.index_interval,
            durability: "standard".to_string(),
        }
    }
}

/// Importer configuration loaded from `logsync.toml`.
///
/// # Example
///
/// ```toml
/// worker_threads = 4
/// max_batch_size = 500
///
/// [retry]
/// max_attempts = 300
/// delay_ms = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Import worker threads
    pub worker_threads: usize,
    /// Jobs that may wait for a worker before dispatch backs off
    pub max_queue_depth: usize,
    /// In-flight batches per (value-type, partition); only 1 is supported
    pub max_in_flight_per_pair: usize,
    /// Records per batch
    pub max_batch_size: usize,
    /// Pause between idle scheduling cycles in milliseconds
    pub poll_interval_ms: u64,
    /// `"reject"` or `"clamp"`
    pub regression_policy: RegressionPolicy,
    /// Store I/O retries
    pub retry: RetrySection,
    /// Partition log layout
    pub log: LogSection,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        ImporterConfig {
            worker_threads: 4,
            max_queue_depth: 64,
            max_in_flight_per_pair: 1,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            poll_interval_ms: 1000,
            regression_policy: RegressionPolicy::Reject,
            retry: RetrySection::default(),
            log: LogSection::default(),
        }
    }
}

impl ImporterConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Two workers, tiny batches, three attempts without delay.
    pub fn for_testing() -> Self {
        ImporterConfig {
            worker_threads: 2,
            max_queue_depth: 16,
            max_batch_size: 4,
            poll_interval_ms: 10,
            retry: RetrySection {
                max_attempts: 3,
                delay_ms: 0,
                max_delay_ms: 0,
                ..RetrySection::default()
            },
            ..Self::default()
        }
    }

    /// Set worker thread count (builder pattern).
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set queue depth (builder pattern).
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set batch size (builder pattern).
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set regression policy (builder pattern).
    pub fn with_regression_policy(mut self, policy: RegressionPolicy) -> Self {
        self.regression_policy = policy;
        self
    }

    /// Set the retry section (builder pattern).
    pub fn with_retry(mut self, retry: RetrySection) -> Self {
        self.retry = retry;
        self
    }

    /// Check every value, including the string-typed ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        if self.max_queue_depth == 0 {
            return Err(ConfigError::Invalid("max_queue_depth must be at least 1".into()));
        }
        if self.max_in_flight_per_pair != 1 {
            return Err(ConfigError::Invalid(format!(
                "max_in_flight_per_pair must be 1, got {}",
                self.max_in_flight_per_pair
            )));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be at least 1".into()));
        }
        self.retry_policy()?;
        self.log_config()?;
        Ok(())
    }

    /// Pause between idle scheduling cycles
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Build the executor's retry policy from the `[retry]` section.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let backoff = match self.retry.backoff.as_str() {
            "fixed" => Backoff::Fixed,
            "exponential" => Backoff::Exponential,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Invalid backoff '{}'. Expected \"fixed\" or \"exponential\".",
                    other
                )))
            }
        };
        let max_delay_ms = match backoff {
            Backoff::Fixed => self.retry.delay_ms,
            Backoff::Exponential => self.retry.max_delay_ms,
        };
        let policy = RetryPolicy::new()
            .with_max_attempts(self.retry.max_attempts)
            .with_base_delay_ms(self.retry.delay_ms)
            .with_max_delay_ms(max_delay_ms)
            .with_backoff(backoff)
            .with_jitter(self.retry.jitter);
        policy
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(policy)
    }

    /// Parse the `[log]` durability string.
    pub fn durability_mode(&self) -> Result<DurabilityMode, ConfigError> {
        match self.log.durability.as_str() {
            "standard" => Ok(DurabilityMode::standard_default()),
            "always" => Ok(DurabilityMode::Always),
            other => Err(ConfigError::Invalid(format!(
                "Invalid durability mode '{}'. Expected \"standard\" or \"always\".",
                other
            ))),
        }
    }

    /// Build the partition log configuration from the `[log]` section.
    pub fn log_config(&self) -> Result<LogConfig, ConfigError> {
        let config = LogConfig::new()
            .with_segment_size(self.log.segment_size)
            .with_index_interval(self.log.index_interval)
            .with_durability(self.durability_mode()?);
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# logsync importer configuration

# Import worker threads
worker_threads = 4

# Jobs allowed to wait for a worker; a full queue defers dispatch
max_queue_depth = 64

# In-flight batches per (value-type, partition). Only 1 is supported.
max_in_flight_per_pair = 1

# Records per import batch
max_batch_size = 500

# Pause between idle scheduling cycles (milliseconds)
poll_interval_ms = 1000

# What to do when a job would move a checkpoint backwards:
#   "reject" = fail the job and halt the pair until resumed
#   "clamp"  = keep the stored checkpoint and carry on
regression_policy = "reject"

[retry]
# 300 attempts x 2s gives the store about ten minutes to recover
max_attempts = 300
delay_ms = 2000
# Only used with backoff = "exponential"
max_delay_ms = 2000
# "fixed" or "exponential"
backoff = "fixed"
jitter = false

[log]
segment_size = 67108864
index_interval = 64
# "standard" = periodic fsync (~100ms), may lose last interval on crash
# "always"   = fsync every append
durability = "standard"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: ImporterConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}
