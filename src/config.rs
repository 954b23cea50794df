//! TOML-backed process configuration.
//!
//! Every field has a default, so an absent file or an empty section is valid.
//!
//! ```toml
//! [database]
//! path = "history-refresh.db"
//!
//! [stream]
//! name = "backend.history.refresh"
//! group = "backend.history.refresh.workers"
//!
//! [worker]
//! entry_timeout_secs = 20
//! visibility_timeout_secs = 300
//!
//! [crawl]
//! request_delay_ms = 1000
//!
//! [log]
//! level = "info"
//! format = "json"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use crate::extract::CrawlOptions;
use crate::stream::DEFAULT_WAKE_INTERVAL;
use crate::worker::{
    Backoff, DEFAULT_ENTRY_TIMEOUT, DEFAULT_GROUP, DEFAULT_MAX_DELIVERIES, DEFAULT_RECLAIM_INTERVAL,
    DEFAULT_STREAM, DEFAULT_VISIBILITY_TIMEOUT, WorkerConfig,
};

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}\n  Suggestion: Check section and key names against the documented layout")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        /// Dotted key of the offending value.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Database file and pool settings.
    pub database: DatabaseConfig,
    /// Stream and consumer-group names.
    pub stream: StreamConfig,
    /// Worker loop tuning.
    pub worker: WorkerSettings,
    /// HTTP crawl settings.
    pub crawl: CrawlConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// `SQLite` database file.
    pub path: PathBuf,
    /// Pool size (1..=20).
    pub max_connections: u32,
    /// Busy timeout in milliseconds (0..=120000).
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("history-refresh.db"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// `[stream]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Stream name.
    pub name: String,
    /// Consumer group name.
    pub group: String,
    /// Fixed consumer id; a random UUID is used when unset.
    pub consumer: Option<String>,
    /// Whether publishing creates a missing stream.
    pub create_stream: bool,
    /// Cross-process re-check interval for blocked claims, in milliseconds.
    pub wake_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STREAM.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: None,
            create_stream: true,
            wake_interval_ms: duration_millis(DEFAULT_WAKE_INTERVAL),
        }
    }
}

/// `[worker]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    /// Per-entry processing budget in seconds.
    pub entry_timeout_secs: u64,
    /// Idle seconds before pending entries are reclaimed; 0 disables reclaim.
    pub visibility_timeout_secs: u64,
    /// Longest blocking claim in seconds while reclaim is enabled.
    pub reclaim_interval_secs: u64,
    /// Deliveries after which an entry is parked.
    pub max_deliveries: u32,
    /// First backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let backoff = Backoff::default();
        Self {
            entry_timeout_secs: DEFAULT_ENTRY_TIMEOUT.as_secs(),
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT.as_secs(),
            reclaim_interval_secs: DEFAULT_RECLAIM_INTERVAL.as_secs(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            backoff_base_ms: duration_millis(backoff.base()),
            backoff_max_ms: duration_millis(backoff.max()),
        }
    }
}

/// `[crawl]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub read_timeout_secs: u64,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Delay after a priming request, in milliseconds.
    pub request_delay_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let defaults = CrawlOptions::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            read_timeout_secs: defaults.read_timeout.as_secs(),
            user_agent: None,
            request_delay_ms: duration_millis(defaults.request_delay),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text cannot be parsed or validated.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "database.max_connections",
            u64::from(self.database.max_connections),
            1,
            20,
            "1..=20",
        )?;
        check_range(
            "database.busy_timeout_ms",
            u64::from(self.database.busy_timeout_ms),
            0,
            120_000,
            "0..=120000",
        )?;
        check_non_empty("stream.name", &self.stream.name)?;
        check_non_empty("stream.group", &self.stream.group)?;
        if let Some(consumer) = &self.stream.consumer {
            check_non_empty("stream.consumer", consumer)?;
        }
        check_range(
            "stream.wake_interval_ms",
            self.stream.wake_interval_ms,
            10,
            60_000,
            "10..=60000",
        )?;
        check_range(
            "worker.entry_timeout_secs",
            self.worker.entry_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        check_range(
            "worker.reclaim_interval_secs",
            self.worker.reclaim_interval_secs,
            1,
            3600,
            "1..=3600",
        )?;
        if self.worker.visibility_timeout_secs != 0
            && self.worker.visibility_timeout_secs <= self.worker.entry_timeout_secs
        {
            return Err(ConfigError::Invalid {
                field: "worker.visibility_timeout_secs",
                value: self.worker.visibility_timeout_secs.to_string(),
                expected: "0 (disabled) or greater than worker.entry_timeout_secs",
            });
        }
        check_range(
            "worker.max_deliveries",
            u64::from(self.worker.max_deliveries),
            1,
            1000,
            "1..=1000",
        )?;
        check_range(
            "worker.backoff_base_ms",
            self.worker.backoff_base_ms,
            1,
            60_000,
            "1..=60000",
        )?;
        check_range(
            "crawl.connect_timeout_secs",
            self.crawl.connect_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        check_range(
            "crawl.read_timeout_secs",
            self.crawl.read_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        check_range(
            "crawl.request_delay_ms",
            self.crawl.request_delay_ms,
            0,
            60_000,
            "0..=60000",
        )?;
        Ok(())
    }

    /// Database pool options.
    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.database.max_connections,
            busy_timeout_ms: self.database.busy_timeout_ms,
        }
    }

    /// Blocked-claim re-check interval.
    #[must_use]
    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.stream.wake_interval_ms)
    }

    /// Crawl client options.
    #[must_use]
    pub fn crawl_options(&self) -> CrawlOptions {
        let defaults = CrawlOptions::default();
        CrawlOptions {
            connect_timeout: Duration::from_secs(self.crawl.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.crawl.read_timeout_secs),
            user_agent: self.crawl.user_agent.clone().unwrap_or(defaults.user_agent),
            request_delay: Duration::from_millis(self.crawl.request_delay_ms),
        }
    }

    /// Worker settings; the consumer id is random unless configured.
    #[must_use]
    pub fn worker_config(&self) -> WorkerConfig {
        let defaults = WorkerConfig::default();
        WorkerConfig {
            stream: self.stream.name.clone(),
            group: self.stream.group.clone(),
            consumer: self.stream.consumer.clone().unwrap_or(defaults.consumer),
            entry_timeout: Duration::from_secs(self.worker.entry_timeout_secs),
            visibility_timeout: Duration::from_secs(self.worker.visibility_timeout_secs),
            reclaim_interval: Duration::from_secs(self.worker.reclaim_interval_secs),
            max_deliveries: self.worker.max_deliveries,
            backoff: Backoff::new(
                Duration::from_millis(self.worker.backoff_base_ms),
                Duration::from_millis(self.worker.backoff_max_ms),
            ),
        }
    }
}

fn check_range(
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::Invalid {
        field,
        value: value.to_string(),
        expected,
    })
}

fn check_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field,
            value: format!("{value:?}"),
            expected: "a non-empty string",
        });
    }
    Ok(())
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
