//! Write request and result model
//!
//! - [`TableDescriptor`]: the logical target of one write (table, dialect, connection, fields)
//! - [`FieldMapping`] / [`FieldAttribute`]: column definitions used for DDL and value coercion
//! - [`ConnectionDescriptor`]: host, credentials and dialect parameters, validated before use
//! - [`ExecutionResult`]: the structured outcome returned for every completed call

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::error::{Error, Result};
use crate::taxonomy::FailureReason;
use crate::types::Value;

/// One input record: field name to value
///
/// A `BTreeMap` keeps field names sorted, which is the column order used in
/// generated statements.
pub type Record = BTreeMap<String, Value>;

/// Column definition for one target field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAttribute {
    /// Target column name
    pub name: String,
    /// Canonical data type (`varchar`, `int`, `decimal`, `date`, ...)
    pub data_type: String,
    /// Declared length for `varchar`/`char` (0 = dialect default)
    #[serde(default)]
    pub length: u32,
    /// Numeric precision for `decimal` (0 = dialect default)
    #[serde(default)]
    pub precision: u32,
    /// Numeric scale for `decimal`
    #[serde(default)]
    pub scale: u32,
    /// Whether NULL is allowed
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column is part of the primary key
    #[serde(default)]
    pub primary_key: bool,
}

fn default_true() -> bool {
    true
}

impl FieldAttribute {
    /// Create a nullable, non-key attribute
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            length: 0,
            precision: 0,
            scale: 0,
            nullable: true,
            primary_key: false,
        }
    }

    /// Set declared length
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Set numeric precision and scale
    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as (part of) the primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Lower-cased canonical type
    pub fn canonical_type(&self) -> String {
        self.data_type.trim().to_lowercase()
    }
}

/// Pairs a source field with its target column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Source field name in the upstream record
    pub source: String,
    /// Target column definition
    pub target: FieldAttribute,
}

impl FieldMapping {
    /// Create a mapping
    pub fn new(source: impl Into<String>, target: FieldAttribute) -> Self {
        Self {
            source: source.into(),
            target,
        }
    }

    /// Mapping whose source and target share the attribute's name
    pub fn identity(target: FieldAttribute) -> Self {
        Self {
            source: target.name.clone(),
            target,
        }
    }
}

/// Connection information for one target database
#[derive(Clone, Default, Serialize, Deserialize, Validate)]
pub struct ConnectionDescriptor {
    /// Database host
    #[validate(length(min = 1, message = "host must not be empty"))]
    pub host: String,
    /// Database port
    #[validate(range(min = 1, message = "port must be greater than zero"))]
    pub port: u16,
    /// Login user
    #[validate(length(min = 1, message = "username must not be empty"))]
    pub username: String,
    /// Login password
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Database name (service name for Oracle)
    #[validate(length(min = 1, message = "database must not be empty"))]
    pub database: String,
    /// Explicit schema; overrides the dialect default
    #[serde(default)]
    pub schema: Option<String>,
    /// Dialect-specific connection parameters; override built-in defaults
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("params", &self.params)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Create a descriptor
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            database: database.into(),
            schema: None,
            params: BTreeMap::new(),
        }
    }

    /// Set explicit schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a dialect parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Check that host, port, user and database are present
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|errors| {
            let mut messages: Vec<String> = errors
                .field_errors()
                .iter()
                .flat_map(|(field, errs)| {
                    errs.iter().map(move |e| match &e.message {
                        Some(m) => m.to_string(),
                        None => format!("{} is invalid", field),
                    })
                })
                .collect();
            messages.sort();
            Error::config(messages.join(", "))
        })
    }

    /// Explicit schema, ignoring blank values
    pub fn explicit_schema(&self) -> Option<&str> {
        self.schema.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Per-write options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Rows per bulk chunk; 0 selects the writer default
    #[serde(default)]
    pub batch_size: usize,
}

/// Logical target of one write request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Target table name
    pub table: String,
    /// Dialect name (`mysql`, `postgres`, `oracle`, `sqlserver`, or an alias)
    pub dialect: String,
    /// Connection information
    pub connection: ConnectionDescriptor,
    /// Ordered column definitions
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Write options
    #[serde(default)]
    pub options: WriteOptions,
    /// The table is known to exist; DDL is never issued when set
    #[serde(default)]
    pub table_exists: bool,
}

impl TableDescriptor {
    /// Create a descriptor without fields
    pub fn new(
        table: impl Into<String>,
        dialect: impl Into<String>,
        connection: ConnectionDescriptor,
    ) -> Self {
        Self {
            table: table.into(),
            dialect: dialect.into(),
            connection,
            fields: Vec::new(),
            options: WriteOptions::default(),
            table_exists: false,
        }
    }

    /// Append a field whose source and target share a name
    pub fn with_field(mut self, field: FieldAttribute) -> Self {
        self.fields.push(FieldMapping::identity(field));
        self
    }

    /// Append a field mapping
    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.fields.push(mapping);
        self
    }

    /// Set bulk batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    /// Mark the table as pre-existing
    pub fn with_table_exists(mut self, exists: bool) -> Self {
        self.table_exists = exists;
        self
    }

    /// Look up the target attribute for a column name (case-insensitive)
    pub fn field(&self, column: &str) -> Option<&FieldAttribute> {
        self.fields
            .iter()
            .map(|m| &m.target)
            .find(|f| f.name.eq_ignore_ascii_case(column))
    }
}

/// Write operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert (alias: append)
    Insert,
    /// Update rows matching a filter
    Update,
    /// Delete rows matching a filter
    Delete,
}

impl Operation {
    /// Lower-case name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "insert" | "append" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(Error::unsupported_operation(s)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that failed in individual-insert mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRecord {
    /// Position in the input sequence
    pub index: usize,
    /// The original record
    pub record: Record,
    /// Classified reason
    pub reason: FailureReason,
    /// Native error text
    pub error: String,
}

/// Outcome of one write call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Operation kind
    pub operation: Operation,
    /// Resolved qualified table name
    pub table: String,
    /// True iff no record failed
    pub success: bool,
    /// Row count before an insert
    pub before_count: Option<i64>,
    /// Row count after an insert
    pub after_count: Option<i64>,
    /// Records written (or rows affected for update/delete)
    pub success_count: u64,
    /// Records that failed
    pub failed_count: u64,
    /// Records processed
    pub total_processed: u64,
    /// Rows reported affected by the database
    pub affected_rows: u64,
    /// Per-record failures, in input order
    pub failed_records: Vec<FailedRecord>,
    /// Occurrences per failure reason
    pub failure_reasons: BTreeMap<FailureReason, u64>,
    /// Wall-clock duration of the call
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ExecutionResult {
    /// Empty, successful result
    pub fn new(operation: Operation, table: impl Into<String>) -> Self {
        Self {
            operation,
            table: table.into(),
            success: true,
            before_count: None,
            after_count: None,
            success_count: 0,
            failed_count: 0,
            total_processed: 0,
            affected_rows: 0,
            failed_records: Vec::new(),
            failure_reasons: BTreeMap::new(),
            duration: Duration::ZERO,
        }
    }

    /// Count one written record
    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.total_processed += 1;
        self.affected_rows += 1;
    }

    /// Count one failed record with its detail
    pub fn record_failure(
        &mut self,
        index: usize,
        record: Record,
        reason: FailureReason,
        error: impl Into<String>,
    ) {
        self.failed_count += 1;
        self.total_processed += 1;
        *self.failure_reasons.entry(reason).or_insert(0) += 1;
        self.failed_records.push(FailedRecord {
            index,
            record,
            reason,
            error: error.into(),
        });
        self.success = false;
    }

    /// Count records written by a bulk statement, attributing any shortfall
    /// to a single aggregate reason
    pub fn record_bulk(&mut self, expected: u64, affected: u64) {
        let written = affected.min(expected);
        let shortfall = expected - written;
        self.success_count += written;
        self.affected_rows += affected;
        self.total_processed += expected;
        if shortfall > 0 {
            self.failed_count += shortfall;
            *self
                .failure_reasons
                .entry(FailureReason::PartialBatchFailure)
                .or_insert(0) += shortfall;
            self.success = false;
        }
    }

    /// Record the rows-affected outcome of a single update/delete statement
    pub fn record_statement(&mut self, affected: u64) {
        self.success_count = affected;
        self.affected_rows = affected;
        self.total_processed = affected;
    }

    /// Whether no record failed
    pub fn is_success(&self) -> bool {
        self.failed_count == 0
    }

    /// Occurrences of one reason
    pub fn reason_count(&self, reason: FailureReason) -> u64 {
        self.failure_reasons.get(&reason).copied().unwrap_or(0)
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
