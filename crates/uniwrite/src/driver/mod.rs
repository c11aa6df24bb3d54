//! Dialect drivers
//!
//! A [`DatabaseDriver`] owns everything structural about one SQL dialect:
//! - DSN construction and pooled connection acquisition
//! - identifier escaping, placeholders and bulk-insert shape
//! - canonical type mapping and CREATE TABLE generation
//! - "already exists" detection and read-only introspection
//!
//! Drivers for all four dialects are always compiled. When a backend feature
//! is disabled, the driver still generates SQL but its connection factory
//! refuses to connect.

pub mod mysql;
pub mod oracle;
pub mod postgres;
pub mod sqlserver;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PoolSettings;
use crate::connection::{Connection, ConnectionFactory, DatabaseType};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::model::{ConnectionDescriptor, FieldAttribute, TableDescriptor};
use crate::pool::{PoolConfig, PoolManager, PooledConnection};
use crate::security::escape_string_literal;
use crate::typemap::TypeMap;
use crate::types::{ColumnMetadata, Row, TableMetadata, Value};

/// Shape of a multi-row insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkInsertStyle {
    /// `INSERT INTO t (..) VALUES (..), (..)`
    MultiRowValues,
    /// `INSERT ALL INTO t (..) VALUES (..) ... SELECT 1 FROM DUAL`
    InsertAll,
}

/// Structural and DDL operations for one SQL dialect
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Canonical dialect name
    fn name(&self) -> &'static str;

    /// Database type served by this driver
    fn database_type(&self) -> DatabaseType;

    /// Static canonical to native type table
    fn type_map(&self) -> &'static TypeMap;

    /// Factory used to open native connections
    fn connection_factory(&self) -> Arc<dyn ConnectionFactory>;

    /// Build the native DSN; caller parameters override built-in defaults
    fn build_connection_string(&self, conn: &ConnectionDescriptor) -> Result<String>;

    /// Open a pooled connection and configure its session
    ///
    /// `Ok(None)` means the driver declines and the caller should use the
    /// writer's centralized path.
    async fn acquire_connection(
        &self,
        ctx: &ExecContext,
        pools: &PoolManager,
        conn: &ConnectionDescriptor,
        settings: &PoolSettings,
    ) -> Result<Option<PooledConnection>> {
        let pooled = open_pooled(self, ctx, pools, conn, settings).await?;
        self.configure_session(ctx, &*pooled, conn).await;
        Ok(Some(pooled))
    }

    /// Apply post-connect session settings; failures are logged, never returned
    async fn configure_session(
        &self,
        _ctx: &ExecContext,
        _conn: &dyn Connection,
        _desc: &ConnectionDescriptor,
    ) {
    }

    /// Schema used when the descriptor does not name one
    fn default_schema(&self, _conn: &ConnectionDescriptor) -> Option<String> {
        None
    }

    /// Explicit schema, else the dialect default
    fn resolve_schema(&self, conn: &ConnectionDescriptor) -> Option<String> {
        conn.explicit_schema()
            .map(str::to_string)
            .or_else(|| self.default_schema(conn))
    }

    /// Fully qualified, escaped table name
    fn qualified_table_name(&self, table: &TableDescriptor) -> String;

    /// CREATE TABLE statement(s) for the descriptor's fields
    fn generate_create_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>>;

    /// Native column type for a field
    fn map_canonical_type(&self, field: &FieldAttribute) -> String {
        self.type_map().map(field)
    }

    /// Escape an identifier, quoting only when needed
    fn escape_identifier(&self, name: &str) -> String;

    /// Identifier used for a record field in DML
    fn column_identifier(&self, name: &str) -> String {
        self.escape_identifier(name)
    }

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String;

    /// Multi-row insert shape
    fn bulk_insert_style(&self) -> BulkInsertStyle {
        BulkInsertStyle::MultiRowValues
    }

    /// Maximum bind parameters per statement
    fn max_bind_parameters(&self) -> usize;

    /// Maximum rows per multi-row insert
    fn max_rows_per_statement(&self) -> usize {
        usize::MAX
    }

    /// Whether native error text means "object already exists"
    fn is_already_exists_error(&self, message: &str) -> bool;

    /// Whether the target table exists
    async fn table_exists(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
    ) -> Result<bool>;

    /// Create the table unless it is known or found to exist
    async fn create_table_if_absent(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
    ) -> Result<()> {
        if table.table_exists {
            return Ok(());
        }
        match self.table_exists(ctx, conn, table).await {
            Ok(true) => {
                debug!(table = %table.table, "table already present");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => warn!(table = %table.table, error = %e, "table existence check failed"),
        }
        execute_ddl(self, ctx, conn, table).await
    }

    /// Tables in a schema (dialect default when `None`); columns are not loaded
    async fn list_tables(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        schema: Option<&str>,
    ) -> Result<Vec<TableMetadata>>;

    /// Columns of a table with canonical type names
    async fn list_columns(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnMetadata>>;

    /// Whether the dialect has schemas distinct from databases
    fn supports_schema(&self) -> bool;

    /// Whether multi-row inserts are supported
    fn supports_batch_insert(&self) -> bool {
        true
    }
}

/// Open a pooled connection through the driver's DSN and factory
///
/// This is the writer's centralized path and the default driver path.
pub async fn open_pooled<D: DatabaseDriver + ?Sized>(
    driver: &D,
    ctx: &ExecContext,
    pools: &PoolManager,
    conn: &ConnectionDescriptor,
    settings: &PoolSettings,
) -> Result<PooledConnection> {
    let dsn = driver.build_connection_string(conn)?;
    let config = PoolConfig::from_settings(dsn, settings);
    let pooled = ctx
        .run(pools.acquire(driver.name(), config, driver.connection_factory()))
        .await?;
    debug!(
        dialect = driver.name(),
        host = %conn.host,
        database = %conn.database,
        "connection acquired"
    );
    Ok(pooled)
}

/// Shared DDL executor
///
/// Runs every generated statement and treats "already exists" as success.
pub async fn execute_ddl<D: DatabaseDriver + ?Sized>(
    driver: &D,
    ctx: &ExecContext,
    conn: &dyn Connection,
    table: &TableDescriptor,
) -> Result<()> {
    if table.table_exists {
        return Ok(());
    }
    let statements = driver.generate_create_table_ddl(table)?;
    for sql in &statements {
        ctx.log_statement(sql, 0);
        match ctx.run(conn.execute(sql, &[])).await {
            Ok(_) => {}
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) if driver.is_already_exists_error(&e.native_message()) => {
                debug!(table = %table.table, "create skipped, table already exists");
            }
            Err(e) => {
                return Err(Error::schema(format!(
                    "failed to create table {}: {}",
                    table.table,
                    e.native_message()
                )))
            }
        }
    }
    info!(
        dialect = driver.name(),
        table = %driver.qualified_table_name(table),
        "table ensured"
    );
    Ok(())
}

/// Column definitions plus a trailing primary key clause, in field order
pub(crate) fn column_definitions<D: DatabaseDriver + ?Sized>(
    driver: &D,
    table: &TableDescriptor,
) -> Result<Vec<String>> {
    if table.fields.is_empty() {
        return Err(Error::NoFieldsSpecified {
            table: table.table.clone(),
        });
    }

    let mut defs: Vec<String> = table
        .fields
        .iter()
        .map(|m| {
            let f = &m.target;
            let mut def = format!(
                "{} {}",
                driver.column_identifier(&f.name),
                driver.map_canonical_type(f)
            );
            if !f.nullable || f.primary_key {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();

    let keys: Vec<String> = table
        .fields
        .iter()
        .filter(|m| m.target.primary_key)
        .map(|m| driver.column_identifier(&m.target.name))
        .collect();
    if !keys.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    Ok(defs)
}

/// Natural identifier casing of a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Casing {
    Lower,
    Upper,
    Insensitive,
}

/// Identifier quoting rules
#[derive(Debug)]
pub(crate) struct QuoteStyle {
    pub open: char,
    pub close: char,
    pub casing: Casing,
    /// Lower-case reserved words
    pub reserved: &'static [&'static str],
}

impl QuoteStyle {
    fn needs_quoting(&self, name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            None => return true,
            Some(c) if !(c.is_ascii_alphabetic() || c == '_') => return true,
            _ => {}
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return true;
        }
        let casing_mismatch = match self.casing {
            Casing::Lower => name.chars().any(|c| c.is_ascii_uppercase()),
            Casing::Upper => name.chars().any(|c| c.is_ascii_lowercase()),
            Casing::Insensitive => false,
        };
        casing_mismatch || self.reserved.contains(&name.to_ascii_lowercase().as_str())
    }

    /// Wrap in quotes, doubling embedded closing quotes
    pub fn quote(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len() + 2);
        out.push(self.open);
        for c in name.chars() {
            if c == self.close {
                out.push(c);
            }
            out.push(c);
        }
        out.push(self.close);
        out
    }

    /// Quote only when the identifier is not a plain natural-case word
    pub fn escape(&self, name: &str) -> String {
        if self.needs_quoting(name) {
            self.quote(name)
        } else {
            name.to_string()
        }
    }
}

/// Reserved words shared by every dialect
pub(crate) const COMMON_RESERVED: &[&str] = &[
    "add", "all", "alter", "and", "as", "asc", "between", "by", "case", "check", "column",
    "constraint", "create", "default", "delete", "desc", "distinct", "drop", "else", "end",
    "exists", "for", "foreign", "from", "grant", "group", "having", "in", "index", "insert",
    "into", "is", "join", "key", "like", "not", "null", "on", "or", "order", "primary",
    "references", "select", "set", "table", "then", "to", "union", "unique", "update", "user",
    "values", "when", "where", "with",
];

/// Merge default DSN parameters with caller parameters; caller keys win
/// regardless of case
pub(crate) fn merge_params(
    defaults: &[(&str, &str)],
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = defaults
        .iter()
        .filter(|(k, _)| !overrides.keys().any(|o| o.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// `column = 'literal'` or `column = <default expression>`
pub(crate) fn schema_predicate(column: &str, schema: Option<&str>, default_expr: &str) -> String {
    match schema {
        Some(s) => format!("{} = '{}'", column, escape_string_literal(s)),
        None => format!("{} = {}", column, default_expr),
    }
}

/// Run an introspection query under the context
pub(crate) async fn introspect(
    ctx: &ExecContext,
    conn: &dyn Connection,
    sql: &str,
) -> Result<Vec<Row>> {
    ctx.log_statement(sql, 0);
    ctx.run(conn.query(sql, &[])).await
}

/// First column of the first row as an integer
pub(crate) async fn query_count(
    ctx: &ExecContext,
    conn: &dyn Connection,
    sql: &str,
    params: &[Value],
) -> Result<i64> {
    ctx.log_statement(sql, params.len());
    let row = ctx.run(conn.query_one(sql, params)).await?;
    row.and_then(|r| r.get(0).and_then(Value::as_i64))
        .ok_or_else(|| Error::query_with_sql("count query returned no rows", sql))
}

/// Table metadata from a `table_name` / `table_comment` row
pub(crate) fn table_from_row(row: &Row, schema: Option<&str>) -> Option<TableMetadata> {
    let name = row.string("table_name")?;
    let mut table = TableMetadata::new(name);
    table.schema = schema
        .map(str::to_string)
        .or_else(|| row.string("table_schema"));
    table.comment = row.string("table_comment").filter(|c| !c.is_empty());
    Some(table)
}

/// Column metadata from a row using the shared introspection aliases
///
/// Expected columns: `column_name`, `data_type`, `nullable` (`YES`/`NO`),
/// `ordinal_position`, `column_default`, `max_length`, `numeric_precision`,
/// `numeric_scale`, `pk_ordinal`, `column_comment`.
pub(crate) fn column_from_row(row: &Row, map: &TypeMap) -> Option<ColumnMetadata> {
    let name = row.string("column_name")?;
    let native = row.string("data_type").unwrap_or_default();
    let precision = row.int("numeric_precision").map(|v| v as u32);
    let scale = row.int("numeric_scale").map(|v| v as u32);

    let mut column = ColumnMetadata::new(name, map.canonical(&native, precision, scale));
    column.native_type = native;
    column.nullable = row
        .string("nullable")
        .map(|v| v.eq_ignore_ascii_case("yes") || v == "1" || v.eq_ignore_ascii_case("y"))
        .unwrap_or(true);
    column.ordinal = row.int("ordinal_position").unwrap_or(0) as u32;
    column.max_length = row
        .int("max_length")
        .filter(|v| *v > 0)
        .map(|v| v as u32);
    column.precision = precision;
    column.scale = scale;
    column.default_value = row.string("column_default");
    column.primary_key_ordinal = row.int("pk_ordinal").map(|v| v as u32);
    column.comment = row.string("column_comment").filter(|c| !c.is_empty());
    Some(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLE: QuoteStyle = QuoteStyle {
        open: '"',
        close: '"',
        casing: Casing::Lower,
        reserved: COMMON_RESERVED,
    };

    #[test]
    fn test_plain_identifier_is_not_quoted() {
        assert_eq!(STYLE.escape("users"), "users");
        assert_eq!(STYLE.escape("_tmp1"), "_tmp1");
    }

    #[test]
    fn test_special_and_reserved_are_quoted() {
        assert_eq!(STYLE.escape("first name"), "\"first name\"");
        assert_eq!(STYLE.escape("1st"), "\"1st\"");
        assert_eq!(STYLE.escape("order"), "\"order\"");
        assert_eq!(STYLE.escape("Users"), "\"Users\"");
        assert_eq!(STYLE.escape(""), "\"\"");
    }

    #[test]
    fn test_embedded_quote_is_doubled() {
        assert_eq!(STYLE.escape("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_merge_params_caller_wins_case_insensitively() {
        let mut caller = BTreeMap::new();
        caller.insert("Encrypt".to_string(), "true".to_string());
        caller.insert("extra".to_string(), "1".to_string());

        let merged = merge_params(&[("encrypt", "false"), ("charset", "utf8mb4")], &caller);
        assert_eq!(merged.get("Encrypt"), Some(&"true".to_string()));
        assert!(!merged.contains_key("encrypt"));
        assert_eq!(merged.get("charset"), Some(&"utf8mb4".to_string()));
        assert_eq!(merged.get("extra"), Some(&"1".to_string()));
    }

    #[test]
    fn test_column_from_row() {
        let row = Row::new(
            vec![
                "COLUMN_NAME".into(),
                "DATA_TYPE".into(),
                "NULLABLE".into(),
                "ORDINAL_POSITION".into(),
                "NUMERIC_PRECISION".into(),
                "NUMERIC_SCALE".into(),
                "PK_ORDINAL".into(),
            ],
            vec![
                Value::from("ID"),
                Value::from("NUMBER"),
                Value::from("N"),
                Value::Int64(1),
                Value::Int64(19),
                Value::Int64(0),
                Value::Int64(1),
            ],
        );
        let col = column_from_row(&row, &crate::typemap::ORACLE).unwrap();
        assert_eq!(col.name, "ID");
        assert_eq!(col.type_name, "bigint");
        assert!(!col.nullable);
        assert!(col.is_primary_key());
    }
}
