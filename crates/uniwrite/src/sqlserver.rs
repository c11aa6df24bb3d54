//! SQL Server backend
//!
//! Native connections over tiberius. The DSN is the ADO.NET string built by
//! the SQL Server driver. Values are bound as typed TDS parameters; server
//! errors keep tiberius' `(code: N, ...)` suffix so the failure taxonomy can
//! match on error numbers.

use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tiberius::{Client, ColumnData, Config, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type TdsClient = Client<Compat<TcpStream>>;

/// Owned parameter bound as a typed TDS value, never interpolated
struct SqlParam(Value);

impl ToSql for SqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match &self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            // TDS has no signed one-byte integer
            Value::Int8(n) => ColumnData::I16(Some(i16::from(*n))),
            Value::Int16(n) => ColumnData::I16(Some(*n)),
            Value::Int32(n) => ColumnData::I32(Some(*n)),
            Value::Int64(n) => ColumnData::I64(Some(*n)),
            Value::Float32(n) => ColumnData::F32(Some(*n)),
            Value::Float64(n) => ColumnData::F64(Some(*n)),
            Value::Decimal(d) => d.to_sql(),
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Value::Bytes(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
            Value::Date(d) => d.to_sql(),
            Value::Time(t) => t.to_sql(),
            Value::DateTime(dt) => dt.to_sql(),
            Value::DateTimeTz(dt) => dt.to_sql(),
            Value::Uuid(u) => ColumnData::Guid(Some(*u)),
            Value::Json(j) => ColumnData::String(Some(Cow::Owned(j.to_string()))),
        }
    }
}

fn bind(params: &[Value]) -> Vec<SqlParam> {
    params.iter().cloned().map(SqlParam).collect()
}

fn param_refs(params: &[SqlParam]) -> Vec<&dyn ToSql> {
    params.iter().map(|p| p as &dyn ToSql).collect()
}

/// Convert a tiberius column value to a uniwrite Value
///
/// tiberius only decodes a column into its exact Rust type, so typed
/// candidates are probed before falling back to text and bytes.
fn tiberius_to_value(row: &tiberius::Row, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return Value::Int16(i16::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return Value::Int16(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return Value::Int32(v);
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return Value::Int64(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return Value::Float32(v);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return Value::Float64(v);
    }
    if let Ok(Some(v)) = row.try_get::<rust_decimal::Decimal, _>(idx) {
        return Value::Decimal(v);
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<uuid::Uuid, _>(idx) {
        return Value::Uuid(v);
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Value::DateTime(v);
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(idx) {
        return Value::Date(v);
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveTime, _>(idx) {
        return Value::Time(v);
    }
    if let Ok(Some(v)) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
        return Value::DateTimeTz(v);
    }
    if let Ok(Some(bytes)) = row.try_get::<&[u8], _>(idx) {
        return Value::Bytes(bytes.to_vec());
    }
    Value::Null
}

fn tiberius_row_to_row(row: &tiberius::Row) -> Row {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values: Vec<Value> = (0..columns.len())
        .map(|i| tiberius_to_value(row, i))
        .collect();
    Row::new(columns, values)
}

fn query_error(e: tiberius::error::Error, sql: &str) -> Error {
    Error::query_with_sql(e.to_string(), sql)
}

fn transaction_error(e: tiberius::error::Error) -> Error {
    Error::Transaction {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

async fn run_execute(client: &mut TdsClient, sql: &str, params: &[Value]) -> Result<u64> {
    let owned = bind(params);
    let result = client
        .execute(sql, &param_refs(&owned))
        .await
        .map_err(|e| query_error(e, sql))?;
    Ok(result.total())
}

/// Run a parameterless control statement and drain its results
async fn run_simple(
    client: &mut TdsClient,
    sql: &str,
) -> std::result::Result<(), tiberius::error::Error> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

/// SQL Server connection
pub struct SqlServerConnection {
    client: Arc<Mutex<Option<TdsClient>>>,
}

impl SqlServerConnection {
    /// Wrap a connected tiberius client
    pub fn new(client: TdsClient) -> Self {
        Self {
            client: Arc::new(Mutex::new(Some(client))),
        }
    }
}

#[async_trait]
impl Connection for SqlServerConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;

        let owned = bind(params);
        let stream = client
            .query(sql, &param_refs(&owned))
            .await
            .map_err(|e| query_error(e, sql))?;
        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| query_error(e, sql))?;
        Ok(rows.iter().map(tiberius_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;
        run_execute(client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        {
            let mut guard = self.client.lock().await;
            let client = guard
                .as_mut()
                .ok_or_else(|| Error::connection("connection is closed"))?;
            run_simple(client, "BEGIN TRANSACTION")
                .await
                .map_err(transaction_error)?;
        }
        Ok(Box::new(SqlServerTransaction {
            client: Arc::clone(&self.client),
        }))
    }

    async fn is_valid(&self) -> bool {
        match self.client.lock().await.as_mut() {
            Some(client) => run_simple(client, "SELECT 1").await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        let taken = self.client.lock().await.take();
        if let Some(client) = taken {
            client
                .close()
                .await
                .map_err(|e| Error::connection_with_source("failed to close connection", e))?;
        }
        Ok(())
    }
}

/// SQL Server transaction on the shared client
pub struct SqlServerTransaction {
    client: Arc<Mutex<Option<TdsClient>>>,
}

impl SqlServerTransaction {
    async fn finish(&self, statement: &str) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("connection closed during transaction"))?;
        run_simple(client, statement).await.map_err(transaction_error)
    }
}

#[async_trait]
impl Transaction for SqlServerTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("connection closed during transaction"))?;
        run_execute(client, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT TRANSACTION").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}

/// SQL Server connection factory
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerConnectionFactory;

#[async_trait]
impl ConnectionFactory for SqlServerConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let tib_config = Config::from_ado_string(&config.url)
            .map_err(|e| Error::config(format!("invalid SQL Server connection string: {}", e)))?;
        let addr = tib_config.get_addr();
        debug!(addr = %addr, "connecting to SQL Server");

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let timed_out = || {
            Error::timeout(format!(
                "connect timed out after {}ms",
                config.connect_timeout_ms
            ))
        };

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| Error::connection_with_source(format!("failed to reach {}", addr), e))?;
        tcp.set_nodelay(true).ok();

        let client = tokio::time::timeout(timeout, Client::connect(tib_config, tcp.compat_write()))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| Error::connection_with_source(e.to_string(), e))?;

        Ok(Box::new(SqlServerConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }
}
