//! PostgreSQL backend
//!
//! Native connections over tokio-postgres. The client's connection future is
//! driven on a spawned task; transactions are plain `BEGIN`/`COMMIT` on the
//! shared client, which is sound because a pooled connection is only ever
//! used by one writer call at a time.
//!
//! Server errors carry their SQLSTATE in the message (`... (SQLSTATE 23505)`)
//! so the failure taxonomy can match on codes.

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tracing::warn;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Untyped NULL that binds to a parameter of any type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert a uniwrite Value to a tokio-postgres parameter
fn value_to_sql(value: &Value) -> BoxedParam {
    match value {
        Value::Null => Box::new(SqlNull),
        Value::Bool(b) => Box::new(*b),
        // PostgreSQL has no one-byte integer
        Value::Int8(n) => Box::new(i16::from(*n)),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn bind(params: &[Value]) -> Vec<BoxedParam> {
    params.iter().map(value_to_sql).collect()
}

fn refs(boxed: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Driver error text with the SQLSTATE appended when the server sent one
fn pg_error_message(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{} (SQLSTATE {})", db.message(), db.code().code()),
        None => e.to_string(),
    }
}

fn query_error(e: tokio_postgres::Error, sql: &str) -> Error {
    Error::query_with_sql(pg_error_message(&e), sql)
}

fn transaction_error(e: tokio_postgres::Error) -> Error {
    Error::Transaction {
        message: pg_error_message(&e),
        source: Some(Box::new(e)),
    }
}

/// Convert a tokio-postgres row to a uniwrite Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn cell<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, wrap: F) -> Value
where
    T: tokio_postgres::types::FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    row.try_get::<_, Option<T>>(idx)
        .ok()
        .flatten()
        .map(wrap)
        .unwrap_or(Value::Null)
}

/// Convert a PostgreSQL column value to a uniwrite Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    match *pg_type {
        Type::BOOL => cell(row, idx, Value::Bool),
        Type::INT2 => cell(row, idx, Value::Int16),
        Type::INT4 => cell(row, idx, Value::Int32),
        Type::INT8 => cell(row, idx, Value::Int64),
        Type::FLOAT4 => cell(row, idx, Value::Float32),
        Type::FLOAT8 => cell(row, idx, Value::Float64),
        Type::NUMERIC => cell(row, idx, Value::Decimal),
        Type::BYTEA => cell(row, idx, Value::Bytes),
        Type::DATE => cell(row, idx, Value::Date),
        Type::TIME => cell(row, idx, Value::Time),
        Type::TIMESTAMP => cell(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => cell(row, idx, Value::DateTimeTz),
        Type::UUID => cell(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => cell(row, idx, Value::Json),
        // Text-like and anything unmapped
        _ => cell(row, idx, Value::String),
    }
}

/// PostgreSQL connection
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Wrap a connected tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let boxed = bind(params);
        let rows = self
            .client
            .query(sql, &refs(&boxed))
            .await
            .map_err(|e| query_error(e, sql))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let boxed = bind(params);
        self.client
            .execute(sql, &refs(&boxed))
            .await
            .map_err(|e| query_error(e, sql))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(transaction_error)?;
        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
        }))
    }

    async fn is_valid(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let boxed = bind(params);
        self.client
            .execute(sql, &refs(&boxed))
            .await
            .map_err(|e| query_error(e, sql))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(transaction_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(transaction_error)
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let connecting = tokio_postgres::connect(&config.url, tokio_postgres::NoTls);
        let (client, connection) =
            tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), connecting)
                .await
                .map_err(|_| {
                    Error::timeout(format!(
                        "connect timed out after {}ms",
                        config.connect_timeout_ms
                    ))
                })?
                .map_err(|e| Error::connection_with_source(pg_error_message(&e), e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection task ended with error");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
