//! Connection traits for uniwrite
//!
//! Core abstractions for database connectivity:
//! - Connection: statement execution and transaction start
//! - Transaction: one unit of work, ended by commit or rollback
//! - ConnectionFactory: opens native connections from a DSN
//!
//! Every backend (and the in-memory test double) implements these traits; the
//! drivers and executors only ever see `dyn Connection`.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{Row, Value};

/// A connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement that modifies data, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return the first row
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Begin a transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a statement that modifies data
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Native DSN built by the dialect driver
    pub url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Additional connection properties
    pub properties: BTreeMap<String, String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &crate::security::redact_dsn(&self.url))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("properties", &self.properties)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            properties: BTreeMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a DSN
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Add a connection property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// MySQL/MariaDB
    MySQL,
    /// SQL Server
    SqlServer,
    /// Oracle
    Oracle,
    /// Unknown/custom
    Unknown,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::MySQL => write!(f, "MySQL"),
            Self::SqlServer => write!(f, "SQL Server"),
            Self::Oracle => write!(f, "Oracle"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Factory for a dialect whose backend was compiled out
///
/// The dialect stays registered so DDL and statement generation work, but
/// every connect attempt fails.
pub struct UnavailableFactory {
    database_type: DatabaseType,
    feature: &'static str,
}

impl UnavailableFactory {
    /// Create a factory that always fails
    pub fn new(database_type: DatabaseType, feature: &'static str) -> Self {
        Self {
            database_type,
            feature,
        }
    }
}

#[async_trait]
impl ConnectionFactory for UnavailableFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Err(crate::error::Error::connection(format!(
            "{} backend unsupported in this build (enable the `{}` feature)",
            self.database_type, self.feature
        )))
    }

    fn database_type(&self) -> DatabaseType {
        self.database_type
    }
}
