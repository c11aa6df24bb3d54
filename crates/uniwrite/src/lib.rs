//! # uniwrite
//!
//! Multi-dialect, fault-tolerant batch writes for relational databases.
//!
//! Callers hand the [`UniversalWriter`](writer::UniversalWriter) a table
//! descriptor, a list of records, an optional filter and an operation name.
//! The writer resolves the dialect, acquires a pooled connection, creates the
//! table if needed and runs the operation. Inserts try one bulk statement per
//! chunk and fall back to one transaction per record when the bulk attempt
//! fails, so a bad record costs one row rather than the whole batch.
//!
//! ## Features
//!
//! - **Dialects**: MySQL/MariaDB, PostgreSQL, Oracle and SQL Server behind one API
//! - **Batch-then-fallback inserts** with per-record failure detail
//! - **Error taxonomy**: native errors classified into stable reason codes
//! - **Value preprocessing**: Oracle date/number rewriting, PostgreSQL type coercion
//! - **DDL**: `CREATE TABLE` if absent, with per-dialect type mapping
//! - **Connection pooling** keyed by dialect and DSN
//! - **Introspection**: tables and columns with canonical type names
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use uniwrite::prelude::*;
//!
//! let writer = UniversalWriter::new(WriterConfig::from_env())?;
//! let table = TableDescriptor::new(
//!     "users",
//!     "mysql",
//!     ConnectionDescriptor::new("localhost", 3306, "root", "secret", "app"),
//! )
//! .with_field(FieldAttribute::new("id", "bigint").primary_key())
//! .with_field(FieldAttribute::new("name", "varchar").with_length(64));
//!
//! let result = writer
//!     .execute(&ExecContext::new(), &table, &records, None, "insert")
//!     .await?;
//! println!("{} written, {} failed", result.success_count, result.failed_count);
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `mysql` - MySQL/MariaDB support via mysql_async
//! - `sqlserver` - SQL Server support via tiberius
//! - `oracle` - Oracle support via the `oracle` crate (needs Oracle client libraries)
//! - `full` - All backends
//!
//! A dialect whose backend is compiled out stays registered: DDL and statement
//! generation work, connecting does not.
//!
//! ## Logging
//!
//! Set `UNIWRITE_SQL_LOG=1` (read by [`WriterConfig::from_env`](config::WriterConfig::from_env))
//! to log every statement at `debug` level.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod context;
pub mod driver;
pub mod error;
pub mod executor;
pub mod filter;
pub mod model;
pub mod pool;
pub mod registry;
pub mod security;
pub mod statement;
pub mod taxonomy;
pub mod typemap;
pub mod types;
pub mod writer;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

#[cfg(feature = "oracle")]
pub mod oracle;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{ColumnMetadata, Row, TableMetadata, Value};

    // Write model
    pub use crate::model::{
        ConnectionDescriptor, ExecutionResult, FailedRecord, FieldAttribute, FieldMapping,
        Operation, Record, TableDescriptor, WriteOptions,
    };
    pub use crate::taxonomy::{ErrorClassifier, FailureReason};
    pub use crate::filter::Filter;

    // Connection traits and pooling
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction,
    };
    pub use crate::pool::{PoolConfig, PoolManager, PoolStats, PooledConnection};
    pub use crate::context::ExecContext;

    // Dialects
    pub use crate::driver::DatabaseDriver;
    pub use crate::executor::{DatabaseExecutor, SqlExecutor, ValuePreprocessor};
    pub use crate::registry::DriverRegistry;

    // Orchestration
    pub use crate::config::{PoolSettings, Strategy, WriterConfig};
    pub use crate::writer::UniversalWriter;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;
pub use writer::UniversalWriter;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("postgres://localhost/test");
        let _writer_config = WriterConfig::default();
        let _filter = Filter::eq("id", 1i64);
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_operation_aliases() {
        assert_eq!("APPEND".parse::<Operation>().unwrap(), Operation::Insert);
        assert!("merge".parse::<Operation>().is_err());
    }

    #[test]
    fn test_writer_over_builtin_dialects() {
        let writer = UniversalWriter::new(WriterConfig::default()).unwrap();
        assert!(writer.registry().contains("mariadb"));
        assert!(writer.registry().contains("oracle"));
        assert!(!writer.registry().contains("db2"));
    }
}
