//! Writer configuration
//!
//! [`WriterConfig`] is fixed at writer construction time. It deserializes with
//! serde defaults, so an empty document yields the default configuration, and
//! is checked with `validator` before use.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};

/// Environment toggle for SQL statement logging
pub const SQL_LOG_ENV: &str = "UNIWRITE_SQL_LOG";

/// Where connection or table-creation logic lives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The writer handles it uniformly for all dialects
    Centralized,
    /// The dialect driver handles it, with a writer-side fallback
    #[default]
    Distributed,
}

/// Connection pool bounds applied to every pool the writer creates
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum open connections per pool
    #[serde(default = "default_max_open")]
    #[validate(range(min = 1, max = 1024))]
    pub max_open: usize,

    /// Maximum idle connections kept per pool
    #[serde(default = "default_max_idle")]
    #[validate(range(max = 1024))]
    pub max_idle: usize,

    /// Maximum connection lifetime in seconds
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Maximum time to wait for a pooled connection, in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    #[validate(range(min = 1))]
    pub acquire_timeout_ms: u64,

    /// Connect timeout for new connections, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
}

fn default_max_open() -> usize {
    10
}

fn default_max_idle() -> usize {
    5
}

fn default_max_lifetime_secs() -> u64 {
    3600
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_acquire_timeout_ms() -> u64 {
    30000
}

fn default_connect_timeout_ms() -> u64 {
    10000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            max_lifetime_secs: default_max_lifetime_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Universal writer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct WriterConfig {
    /// Connection acquisition strategy
    #[serde(default)]
    pub connection_strategy: Strategy,

    /// Table creation strategy
    #[serde(default)]
    pub table_creation_strategy: Strategy,

    /// Batch size used when a descriptor does not set one (default: 1000)
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 100000))]
    pub default_batch_size: usize,

    /// Record counts at or below this go straight to individual-insert mode
    #[serde(default = "default_min_batch_threshold")]
    pub min_batch_threshold: usize,

    /// Pool bounds
    #[serde(default)]
    #[validate(nested)]
    pub pool: PoolSettings,

    /// Log every statement at debug level
    #[serde(default)]
    pub log_sql: bool,
}

fn default_batch_size() -> usize {
    1000
}

fn default_min_batch_threshold() -> usize {
    1
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            connection_strategy: Strategy::Distributed,
            table_creation_strategy: Strategy::Distributed,
            default_batch_size: default_batch_size(),
            min_batch_threshold: default_min_batch_threshold(),
            pool: PoolSettings::default(),
            log_sql: false,
        }
    }
}

impl WriterConfig {
    /// Defaults with `log_sql` taken from `UNIWRITE_SQL_LOG`
    pub fn from_env() -> Self {
        let log_sql = std::env::var(SQL_LOG_ENV)
            .map(|v| parse_toggle(&v))
            .unwrap_or(false);
        Self {
            log_sql,
            ..Self::default()
        }
    }

    /// Set the connection strategy
    pub fn with_connection_strategy(mut self, strategy: Strategy) -> Self {
        self.connection_strategy = strategy;
        self
    }

    /// Set the table creation strategy
    pub fn with_table_creation_strategy(mut self, strategy: Strategy) -> Self {
        self.table_creation_strategy = strategy;
        self
    }

    /// Set the default batch size
    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size;
        self
    }

    /// Set the individual-mode threshold
    pub fn with_min_batch_threshold(mut self, threshold: usize) -> Self {
        self.min_batch_threshold = threshold;
        self
    }

    /// Set pool bounds
    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    /// Enable or disable SQL logging
    pub fn with_log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    /// Validate ranges
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid writer config: {}", e)))
    }
}

/// Interpret a boolean environment toggle
pub fn parse_toggle(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
