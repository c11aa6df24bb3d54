//! Error types for uniwrite
//!
//! Two kinds of failure flow through the engine:
//! - Fatal errors (bad configuration, unknown dialect or operation, empty DDL field list)
//!   are returned through [`Result`] and abort the call before any write.
//! - Per-record failures are never raised here; they are classified into
//!   [`FailureReason`](crate::taxonomy::FailureReason) codes and accumulated in the
//!   [`ExecutionResult`](crate::model::ExecutionResult).

use std::fmt;
use thiserror::Error;

use crate::model::ExecutionResult;

/// Result type for uniwrite operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Statement execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Timeout errors (retriable)
    Timeout,
    /// Caller cancelled the call
    Cancelled,
    /// Configuration or descriptor errors
    Configuration,
    /// Requested dialect or operation is not available
    Unsupported,
    /// Pool exhausted (retriable with backoff)
    PoolExhausted,
    /// Schema-related errors (DDL, introspection)
    Schema,
    /// Value conversion errors
    TypeConversion,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::PoolExhausted)
    }
}

/// Main error type for uniwrite
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// No driver/executor pair is registered under the dialect name
    #[error("unsupported dialect: {dialect}")]
    UnsupportedDialect { dialect: String },

    /// Connection descriptor or writer configuration is invalid
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    /// Opening a connection failed
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// DDL requested for a table without field mappings
    #[error("no fields specified for table {table}")]
    NoFieldsSpecified { table: String },

    /// Operation kind is not insert/append/update/delete
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    /// Update or delete issued without a filter
    #[error("{operation} requires a filter")]
    MissingFilter { operation: String },

    /// Update issued without a value record
    #[error("{operation} requires at least one record")]
    MissingRecords { operation: String },

    /// Statement execution failed; `message` carries the native driver text
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction control failed
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Deadline elapsed
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Cancellation was requested; `partial` holds what was accumulated before the stop
    #[error("cancelled: {message}")]
    Cancelled {
        message: String,
        partial: Option<Box<ExecutionResult>>,
    },

    /// Connection pool exhausted or shut down
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// DDL or introspection failure
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Value could not be converted for the target dialect
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::InvalidConfig { .. }
            | Self::MissingFilter { .. }
            | Self::MissingRecords { .. } => ErrorCategory::Configuration,
            Self::UnsupportedDialect { .. } | Self::UnsupportedOperation { .. } => {
                ErrorCategory::Unsupported
            }
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Schema { .. } | Self::NoFieldsSpecified { .. } => ErrorCategory::Schema,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error came from a cancellation or an elapsed deadline
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Timeout { .. })
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a cancellation error without a partial result
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
            partial: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create an unsupported dialect error
    pub fn unsupported_dialect(dialect: impl Into<String>) -> Self {
        Self::UnsupportedDialect {
            dialect: dialect.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported_operation(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Attach a partial result to a cancellation error; other errors pass through
    pub fn with_partial(self, result: ExecutionResult) -> Self {
        match self {
            Self::Cancelled { message, .. } => Self::Cancelled {
                message,
                partial: Some(Box::new(result)),
            },
            other => other,
        }
    }

    /// Partial result carried by a cancellation error
    pub fn partial_result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Cancelled { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }

    /// Native error text used for failure classification
    ///
    /// For driver errors this is the message reported by the database client,
    /// without the variant prefix added by `Display`.
    pub fn native_message(&self) -> String {
        match self {
            Self::Query { message, .. }
            | Self::Transaction { message, .. }
            | Self::ConnectionFailed { message, .. }
            | Self::Timeout { message }
            | Self::PoolExhausted { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Configuration => write!(f, "configuration"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Schema => write!(f, "schema"),
            Self::TypeConversion => write!(f, "type_conversion"),
        }
    }
}
