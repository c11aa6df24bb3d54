//! MySQL / MariaDB backend
//!
//! Native connections over mysql_async. The DSN is the URL built by the MySQL
//! driver; `charset` and `tls` are consumed here (mysql_async rejects them as
//! URL parameters) and every other parameter is handed to mysql_async as-is.
//!
//! Statements without parameters go over the text protocol so DDL and session
//! statements work on servers that refuse to prepare them.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, SslOpts};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Convert a uniwrite Value to a MySQL parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int8(n) => mysql_async::Value::from(*n),
        Value::Int16(n) => mysql_async::Value::from(*n),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        // Sent as text so DECIMAL columns keep full precision
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.as_str()),
        Value::Bytes(b) => mysql_async::Value::from(b.as_slice()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => datetime_value(dt),
        Value::DateTimeTz(dt) => datetime_value(&dt.naive_utc()),
        Value::Uuid(u) => mysql_async::Value::from(u.to_string()),
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
    }
}

fn datetime_value(dt: &NaiveDateTime) -> mysql_async::Value {
    let (date, time) = (dt.date(), dt.time());
    mysql_async::Value::Date(
        date.year() as u16,
        date.month() as u8,
        date.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.nanosecond() / 1000,
    )
}

/// Convert a MySQL value to a uniwrite Value
fn mysql_value_to_value(val: mysql_async::Value) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => match i64::try_from(n) {
            Ok(n) => Value::Int64(n),
            Err(_) => Value::String(n.to_string()),
        },
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let Some(date) = NaiveDate::from_ymd_opt(year.into(), month.into(), day.into()) else {
                return Value::Null;
            };
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                return Value::Date(date);
            }
            NaiveTime::from_hms_micro_opt(hour.into(), min.into(), sec.into(), micro)
                .map(|time| Value::DateTime(NaiveDateTime::new(date, time)))
                .unwrap_or(Value::Null)
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => {
            if !neg && days == 0 {
                if let Some(time) =
                    NaiveTime::from_hms_micro_opt(hour.into(), min.into(), sec.into(), micro)
                {
                    return Value::Time(time);
                }
            }
            // Durations outside a clock day stay textual, as MySQL prints them
            let hours = days * 24 + u32::from(hour);
            Value::String(format!(
                "{}{:02}:{:02}:{:02}",
                if neg { "-" } else { "" },
                hours,
                min,
                sec
            ))
        }
    }
}

fn convert_rows(rows: Vec<mysql_async::Row>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let columns: Vec<String> = row
                .columns_ref()
                .iter()
                .map(|c| c.name_str().to_string())
                .collect();
            let values: Vec<Value> = row.unwrap().into_iter().map(mysql_value_to_value).collect();
            Row::new(columns, values)
        })
        .collect()
}

fn query_error(e: mysql_async::Error, sql: &str) -> Error {
    Error::query_with_sql(e.to_string(), sql)
}

fn transaction_error(e: mysql_async::Error) -> Error {
    Error::Transaction {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

async fn run_execute(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<u64> {
    let outcome = if params.is_empty() {
        conn.query_drop(sql).await
    } else {
        let params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
        conn.exec_drop(sql, params).await
    };
    outcome.map_err(|e| query_error(e, sql))?;
    Ok(conn.affected_rows())
}

async fn run_query(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let rows: Vec<mysql_async::Row> = if params.is_empty() {
        conn.query(sql).await
    } else {
        let params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
        conn.exec(sql, params).await
    }
    .map_err(|e| query_error(e, sql))?;
    Ok(convert_rows(rows))
}

/// Turn the driver URL into mysql_async options
fn parse_options(url: &str) -> Result<Opts> {
    let mut parsed = url::Url::parse(url)
        .map_err(|e| Error::config(format!("invalid MySQL URL: {}", e)))?;

    let mut charset = None;
    let mut tls = false;
    let passthrough: Vec<(String, String)> = parsed
        .query_pairs()
        .filter_map(|(k, v)| match &*k {
            "charset" => {
                charset = Some(v.into_owned());
                None
            }
            "tls" => {
                tls = v.eq_ignore_ascii_case("true") || v == "1";
                None
            }
            _ => Some((k.into_owned(), v.into_owned())),
        })
        .collect();

    parsed.set_query(None);
    if !passthrough.is_empty() {
        parsed.query_pairs_mut().extend_pairs(passthrough);
    }

    let opts = Opts::from_url(parsed.as_str())
        .map_err(|e| Error::config(format!("invalid MySQL connection string: {}", e)))?;
    let mut builder = OptsBuilder::from_opts(opts);

    if let Some(charset) = charset {
        if !charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::config(format!("invalid MySQL charset '{}'", charset)));
        }
        builder = builder.init(vec![format!("SET NAMES {}", charset)]);
    }
    if tls {
        builder = builder.ssl_opts(SslOpts::default());
    }
    Ok(builder.into())
}

/// MySQL connection
pub struct MySqlConnection {
    conn: Arc<Mutex<Option<Conn>>>,
}

impl MySqlConnection {
    /// Wrap a connected mysql_async connection
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;
        run_query(conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection is closed"))?;
        run_execute(conn, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        {
            let mut guard = self.conn.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| Error::connection("connection is closed"))?;
            conn.query_drop("START TRANSACTION")
                .await
                .map_err(transaction_error)?;
        }
        Ok(Box::new(MySqlTransaction {
            conn: Arc::clone(&self.conn),
        }))
    }

    async fn is_valid(&self) -> bool {
        match self.conn.lock().await.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        let taken = self.conn.lock().await.take();
        if let Some(conn) = taken {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("failed to close connection", e))?;
        }
        Ok(())
    }
}

/// MySQL transaction
///
/// Uses explicit `START TRANSACTION`/`COMMIT`/`ROLLBACK` on the shared
/// connection rather than `mysql_async::Transaction`, which borrows the
/// connection for its whole lifetime.
pub struct MySqlTransaction {
    conn: Arc<Mutex<Option<Conn>>>,
}

impl MySqlTransaction {
    async fn finish(&self, statement: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("connection closed during transaction"))?;
        conn.query_drop(statement).await.map_err(transaction_error)
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("connection closed during transaction"))?;
        run_execute(conn, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

/// MySQL connection factory
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnectionFactory;

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let opts = parse_options(&config.url)?;
        debug!(
            host = %opts.ip_or_hostname(),
            port = opts.tcp_port(),
            "connecting to MySQL"
        );

        let conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            Conn::new(opts),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "connect timed out after {}ms",
                config.connect_timeout_ms
            ))
        })?
        .map_err(|e| Error::connection_with_source(e.to_string(), e))?;

        Ok(Box::new(MySqlConnection::new(conn)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}
