//! In-memory connection used by the integration tests
//!
//! Models a single table: committed rows keyed by their unique column,
//! per-transaction staging, a statement log and MySQL-style error text.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uniwrite::prelude::*;

/// Shared state behind every connection the factory hands out
#[derive(Debug, Default)]
pub struct MockState {
    /// Every statement seen, in order
    pub statements: Vec<String>,
    /// Parameters of the most recent statement
    pub last_params: Vec<Value>,
    /// Committed rows keyed by unique-column text
    pub rows: BTreeMap<String, Vec<Value>>,
    /// Rows without a recognizable key
    pub anonymous_rows: usize,
    /// Column whose values must be unique
    pub unique_column: Option<String>,
    /// Reject every multi-row insert
    pub fail_bulk: bool,
    /// Report this many fewer rows than a bulk insert supplied
    pub bulk_shortfall: u64,
    /// Answer to existence probes
    pub table_present: bool,
    /// CREATE TABLE statements executed
    pub creates: usize,
    /// Rows reported affected by UPDATE and DELETE
    pub affected_on_change: u64,
    /// Connections opened
    pub connects: usize,
    /// Text of the error every statement fails with, if set
    pub fail_all: Option<String>,
    /// Rows returned for catalog queries
    pub catalog: Vec<Row>,
    /// INSERT statements that succeeded
    pub inserts_ok: usize,
    /// Cancel this context once `inserts_ok` reaches the count
    pub cancel_after_inserts: Option<(usize, ExecContext)>,
}

impl MockState {
    fn row_count(&self) -> i64 {
        (self.rows.len() + self.anonymous_rows) as i64
    }
}

/// Handle tests keep to seed and inspect the mock
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        let db = Self::default();
        db.with(|s| s.unique_column = Some("id".into()));
        db
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard)
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(MockFactory { db: self.clone() })
    }

    pub fn connection(&self) -> MockConnection {
        MockConnection { db: self.clone() }
    }

    pub fn statements(&self) -> Vec<String> {
        self.with(|s| s.statements.clone())
    }

    pub fn statements_starting(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.starts_with(prefix))
            .collect()
    }

    pub fn row_count(&self) -> i64 {
        self.with(|s| s.row_count())
    }

    pub fn insert_committed(&self, key: &str) {
        self.with(|s| {
            s.rows.insert(key.to_string(), Vec::new());
        });
    }
}

/// Rows staged by one open transaction
type Staged = Vec<(Option<String>, Vec<Value>)>;

/// Parse an INSERT produced by the statement builder into staged rows
fn parse_insert(state: &MockState, sql: &str, params: &[Value]) -> Result<Staged> {
    let open = sql.find('(').unwrap_or(0);
    let close = sql[open..].find(')').map(|i| open + i).unwrap_or(open);
    let columns: Vec<String> = sql[open + 1..close]
        .split(',')
        .map(|c| c.trim().trim_matches(|ch| ch == '`' || ch == '"').to_lowercase())
        .collect();

    let rows = if sql.starts_with("INSERT ALL") {
        sql.matches(" INTO ").count()
    } else {
        sql.matches("), (").count() + 1
    };

    let key_index = state
        .unique_column
        .as_ref()
        .and_then(|u| columns.iter().position(|c| c == u));
    let keyed = key_index.is_some() && params.len() == rows * columns.len();

    let mut staged = Vec::with_capacity(rows);
    for r in 0..rows {
        if keyed {
            let values = params[r * columns.len()..(r + 1) * columns.len()].to_vec();
            let key = key_index.and_then(|i| values[i].as_string());
            staged.push((key, values));
        } else {
            staged.push((None, Vec::new()));
        }
    }

    for (i, (key, _)) in staged.iter().enumerate() {
        if let Some(key) = key {
            let in_batch = staged[..i].iter().any(|(k, _)| k.as_ref() == Some(key));
            if in_batch || state.rows.contains_key(key) {
                return Err(Error::query_with_sql(
                    format!(
                        "ERROR 1062 (23000): Duplicate entry '{}' for key 'PRIMARY'",
                        key
                    ),
                    sql,
                ));
            }
        }
    }
    Ok(staged)
}

fn apply(state: &mut MockState, staged: Staged) {
    for (key, values) in staged {
        match key {
            Some(key) => {
                state.rows.insert(key, values);
            }
            None => state.anonymous_rows += 1,
        }
    }
}

/// Run one statement; inserts are returned staged instead of applied
fn run(state: &mut MockState, sql: &str, params: &[Value]) -> Result<(u64, Staged)> {
    state.statements.push(sql.to_string());
    state.last_params = params.to_vec();
    if let Some(message) = &state.fail_all {
        return Err(Error::query_with_sql(message.clone(), sql));
    }

    if sql.starts_with("INSERT") {
        let staged = parse_insert(state, sql, params)?;
        let supplied = staged.len() as u64;
        if supplied > 1 && state.fail_bulk {
            return Err(Error::query_with_sql(
                "ERROR 1213 (40001): bulk statement rejected",
                sql,
            ));
        }
        state.inserts_ok += 1;
        if let Some((after, ctx)) = &state.cancel_after_inserts {
            if state.inserts_ok == *after {
                ctx.cancel();
            }
        }
        if supplied > 1 {
            return Ok((supplied.saturating_sub(state.bulk_shortfall), staged));
        }
        return Ok((supplied, staged));
    }
    if sql.starts_with("CREATE TABLE") {
        state.creates += 1;
        state.table_present = true;
        return Ok((0, Vec::new()));
    }
    if sql.starts_with("UPDATE") || sql.starts_with("DELETE") {
        return Ok((state.affected_on_change, Vec::new()));
    }
    Ok((0, Vec::new()))
}

pub struct MockConnection {
    db: MockDatabase,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.db.with(|s| {
            s.statements.push(sql.to_string());
            if let Some(message) = &s.fail_all {
                return Err(Error::query_with_sql(message.clone(), sql));
            }
            if sql.contains("AS row_count") {
                return Ok(vec![Row::new(
                    vec!["row_count".into()],
                    vec![Value::Int64(s.row_count())],
                )]);
            }
            if sql.contains("COUNT(*)") {
                let present = i64::from(s.table_present);
                return Ok(vec![Row::new(vec!["cnt".into()], vec![Value::Int64(present)])]);
            }
            Ok(s.catalog.clone())
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.db.with(|s| {
            let (affected, staged) = run(s, sql, params)?;
            apply(s, staged);
            Ok(affected)
        })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.db.with(|s| s.statements.push("BEGIN".into()));
        Ok(Box::new(MockTransaction {
            db: self.db.clone(),
            staged: Mutex::new(Vec::new()),
        }))
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct MockTransaction {
    db: MockDatabase,
    staged: Mutex<Staged>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let (affected, mut staged) = self.db.with(|s| {
            // rows staged earlier in this transaction count towards uniqueness
            let pending = self.staged.lock().unwrap();
            for (key, _) in pending.iter() {
                if let Some(key) = key {
                    s.rows.entry(key.clone()).or_default();
                }
            }
            let outcome = run(s, sql, params);
            for (key, _) in pending.iter() {
                if let Some(key) = key {
                    s.rows.remove(key);
                }
            }
            outcome
        })?;
        self.staged.lock().unwrap().append(&mut staged);
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut *self.staged.lock().unwrap());
        self.db.with(|s| {
            s.statements.push("COMMIT".into());
            apply(s, staged);
        });
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.db.with(|s| s.statements.push("ROLLBACK".into()));
        Ok(())
    }
}

struct MockFactory {
    db: MockDatabase,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.db.with(|s| s.connects += 1);
        Ok(Box::new(self.db.connection()))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

pub fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn users(n: i64) -> Vec<Record> {
    (1..=n)
        .map(|i| {
            record(&[
                ("id", Value::Int64(i)),
                ("name", Value::String(format!("user{}", i))),
            ])
        })
        .collect()
}

pub fn mysql_table() -> TableDescriptor {
    TableDescriptor::new(
        "users",
        "mysql",
        ConnectionDescriptor::new("db.local", 3306, "root", "secret", "app"),
    )
    .with_field(FieldAttribute::new("id", "bigint").primary_key())
    .with_field(FieldAttribute::new("name", "varchar").with_length(64))
}
