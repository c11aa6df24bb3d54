//! Data-plane execution: insert, update and delete against one dialect
//!
//! Inserts follow a batch-then-fallback algorithm:
//!
//! 1. Count existing rows.
//! 2. If the batch size is 1 or the input is no larger than the minimum batch
//!    threshold, go straight to individual mode.
//! 3. Otherwise insert everything in multi-row chunks inside one transaction.
//!    Any error rolls the whole attempt back and switches to individual mode.
//!    A row-count shortfall is recorded as one aggregate `partial_batch_failure`.
//! 4. Individual mode runs one transaction per record, classifying each native
//!    error through the dialect's [`ErrorClassifier`].
//! 5. Count rows again.
//!
//! Values pass through an optional per-dialect [`ValuePreprocessor`] before
//! any statement is built.

pub mod oracle;
pub mod postgres;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, DatabaseType, Transaction};
use crate::context::ExecContext;
use crate::driver::{query_count, DatabaseDriver};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::model::{ExecutionResult, FieldAttribute, Operation, Record, TableDescriptor};
use crate::statement::{self, SqlArg};
use crate::taxonomy::{ErrorClassifier, FailureReason};
use crate::types::Value;

pub use oracle::OracleValuePreprocessor;
pub use postgres::PostgresValuePreprocessor;

/// Rows per bulk chunk when the descriptor does not say
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Inputs of this size or smaller always use individual mode
pub const DEFAULT_MIN_BATCH_THRESHOLD: usize = 1;

/// Per-dialect value coercion applied before statements are built
pub trait ValuePreprocessor: Send + Sync {
    /// Rewrite one value destined for `field`
    fn preprocess(&self, field: &FieldAttribute, value: Value) -> SqlArg;
}

/// Coarse value family of a canonical type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeFamily {
    Date,
    Timestamp,
    TimestampTz,
    Integer,
    Float,
    Decimal,
    Other,
}

pub(crate) fn type_family(field: &FieldAttribute) -> TypeFamily {
    match field.canonical_type().as_str() {
        "date" => TypeFamily::Date,
        "datetime" | "timestamp" => TypeFamily::Timestamp,
        "timestamptz" => TypeFamily::TimestampTz,
        "int" | "integer" | "bigint" | "long" | "smallint" | "tinyint" => TypeFamily::Integer,
        "float" | "double" | "real" => TypeFamily::Float,
        "decimal" | "numeric" | "number" => TypeFamily::Decimal,
        _ => TypeFamily::Other,
    }
}

/// Insert, update and delete for one dialect
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Insert records with batch-then-fallback semantics
    async fn execute_insert(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
        records: &[Record],
    ) -> Result<ExecutionResult>;

    /// Apply the first record's values to every row matching `filter`
    async fn execute_update(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
        records: &[Record],
        filter: Option<&Filter>,
    ) -> Result<ExecutionResult>;

    /// Delete every row matching `filter`
    async fn execute_delete(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
        filter: Option<&Filter>,
    ) -> Result<ExecutionResult>;
}

/// Statement-building executor shared by every SQL dialect
///
/// Dialect differences come from the driver (escaping, placeholders, bulk
/// shape, limits), the classifier rule table and the optional preprocessor.
pub struct SqlExecutor {
    driver: Arc<dyn DatabaseDriver>,
    classifier: ErrorClassifier,
    preprocessor: Option<Arc<dyn ValuePreprocessor>>,
    default_batch_size: usize,
    min_batch_threshold: usize,
}

impl SqlExecutor {
    /// Executor with an explicit classifier and no preprocessing
    pub fn new(driver: Arc<dyn DatabaseDriver>, classifier: ErrorClassifier) -> Self {
        Self {
            driver,
            classifier,
            preprocessor: None,
            default_batch_size: DEFAULT_BATCH_SIZE,
            min_batch_threshold: DEFAULT_MIN_BATCH_THRESHOLD,
        }
    }

    /// Executor with the built-in classifier and preprocessor for the driver's dialect
    pub fn for_driver(driver: Arc<dyn DatabaseDriver>) -> Self {
        let database_type = driver.database_type();
        let classifier = match database_type {
            DatabaseType::MySQL => ErrorClassifier::mysql(),
            DatabaseType::PostgreSQL => ErrorClassifier::postgres(),
            DatabaseType::Oracle => ErrorClassifier::oracle(),
            DatabaseType::SqlServer => ErrorClassifier::sqlserver(),
            DatabaseType::Unknown => ErrorClassifier::generic(),
        };
        let executor = Self::new(driver, classifier);
        match database_type {
            DatabaseType::PostgreSQL => executor.with_preprocessor(Arc::new(PostgresValuePreprocessor)),
            DatabaseType::Oracle => executor.with_preprocessor(Arc::new(OracleValuePreprocessor)),
            _ => executor,
        }
    }

    /// Set the value preprocessor
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn ValuePreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Set the batch size used when the descriptor leaves it at zero
    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size.max(1);
        self
    }

    /// Set the input size at or below which bulk mode is skipped
    pub fn with_min_batch_threshold(mut self, threshold: usize) -> Self {
        self.min_batch_threshold = threshold;
        self
    }

    /// The classifier rule table
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    fn batch_size(&self, table: &TableDescriptor) -> usize {
        match table.options.batch_size {
            0 => self.default_batch_size,
            n => n,
        }
    }

    /// Rename source fields to their target columns
    fn project(&self, table: &TableDescriptor, record: &Record) -> Record {
        if table.fields.is_empty() {
            return record.clone();
        }
        record
            .iter()
            .map(|(key, value)| {
                let column = table
                    .fields
                    .iter()
                    .find(|m| m.source == *key)
                    .map(|m| m.target.name.clone())
                    .unwrap_or_else(|| key.clone());
                (column, value.clone())
            })
            .collect()
    }

    fn prepare_value(&self, table: &TableDescriptor, column: &str, value: Value) -> SqlArg {
        match (&self.preprocessor, table.field(column)) {
            (Some(p), Some(field)) => p.preprocess(field, value),
            _ => SqlArg::Bound(value),
        }
    }

    /// Column list (sorted union of keys) and argument rows for a bulk insert
    fn bulk_rows(&self, table: &TableDescriptor, records: &[Record]) -> (Vec<String>, Vec<Vec<SqlArg>>) {
        let projected: Vec<Record> = records.iter().map(|r| self.project(table, r)).collect();
        let columns: Vec<String> = projected
            .iter()
            .flat_map(|r| r.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let rows = projected
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|c| {
                        let value = record.remove(c).unwrap_or(Value::Null);
                        self.prepare_value(table, c, value)
                    })
                    .collect()
            })
            .collect();
        (columns, rows)
    }

    fn single_row(&self, table: &TableDescriptor, record: &Record) -> (Vec<String>, Vec<SqlArg>) {
        self.project(table, record)
            .into_iter()
            .map(|(c, v)| {
                let arg = self.prepare_value(table, &c, v);
                (c, arg)
            })
            .unzip()
    }

    /// Rows per chunk, bounded by the batch size and the dialect's statement limits
    fn chunk_size(&self, batch_size: usize, columns: usize) -> usize {
        let by_binds = self.driver.max_bind_parameters() / columns.max(1);
        batch_size
            .min(self.driver.max_rows_per_statement())
            .min(by_binds)
            .max(1)
    }

    /// Row count; interruptions propagate, other failures are logged and skipped
    async fn row_count(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table_name: &str,
    ) -> Result<Option<i64>> {
        match query_count(ctx, conn, &statement::count(table_name), &[]).await {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.is_interrupted() => Err(e),
            Err(e) => {
                warn!(table = %table_name, error = %e, "row count failed");
                Ok(None)
            }
        }
    }

    /// All chunks in one transaction; returns total rows affected
    async fn insert_bulk(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table_name: &str,
        columns: &[String],
        rows: &[Vec<SqlArg>],
        chunk_size: usize,
    ) -> Result<u64> {
        let tx = begin(ctx, conn).await?;
        let mut affected = 0u64;

        for chunk in rows.chunks(chunk_size) {
            let stmt = statement::insert(&*self.driver, table_name, columns, chunk);
            ctx.log_statement(&stmt.sql, stmt.params.len());
            match ctx.run(tx.execute(&stmt.sql, &stmt.params)).await {
                Ok(n) => affected += n,
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "rollback failed after bulk insert error");
                    }
                    return Err(e);
                }
            }
        }

        commit(ctx, tx).await?;
        Ok(affected)
    }

    /// One transaction per record; failures are classified and accumulated
    async fn insert_individually(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
        table_name: &str,
        records: &[Record],
        result: &mut ExecutionResult,
    ) -> Result<()> {
        for (index, record) in records.iter().enumerate() {
            ctx.check()?;

            let (columns, row) = self.single_row(table, record);
            let stmt = statement::insert(&*self.driver, table_name, &columns, &[row]);

            let tx = match begin(ctx, conn).await {
                Ok(tx) => tx,
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    debug!(index, error = %e, "transaction start failed");
                    result.record_failure(
                        index,
                        record.clone(),
                        FailureReason::TransactionStartFailed,
                        e.native_message(),
                    );
                    continue;
                }
            };

            ctx.log_statement(&stmt.sql, stmt.params.len());
            if let Err(e) = ctx.run(tx.execute(&stmt.sql, &stmt.params)).await {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(index, error = %rollback_err, "rollback failed");
                }
                if e.is_interrupted() {
                    return Err(e);
                }
                let reason = self.classifier.classify_error(&e);
                debug!(index, reason = %reason, error = %e, "record insert failed");
                result.record_failure(index, record.clone(), reason, e.native_message());
                continue;
            }

            match commit(ctx, tx).await {
                Ok(()) => result.record_success(),
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    debug!(index, error = %e, "transaction commit failed");
                    result.record_failure(
                        index,
                        record.clone(),
                        FailureReason::TransactionCommitFailed,
                        e.native_message(),
                    );
                }
            }
        }
        Ok(())
    }
}

/// Open a transaction; `BEGIN` is never abandoned mid-flight
///
/// A context interrupted while `BEGIN` was running rolls the new transaction
/// back before the error is returned.
async fn begin(ctx: &ExecContext, conn: &dyn Connection) -> Result<Box<dyn Transaction>> {
    ctx.check()?;
    let tx = conn.begin().await?;
    if let Err(e) = ctx.check() {
        rollback(tx).await;
        return Err(e);
    }
    Ok(tx)
}

/// Commit, or roll back if the context was interrupted
///
/// Once issued, `COMMIT` runs to completion so the outcome is always known.
async fn commit(ctx: &ExecContext, tx: Box<dyn Transaction>) -> Result<()> {
    if let Err(e) = ctx.check() {
        rollback(tx).await;
        return Err(e);
    }
    tx.commit().await
}

async fn rollback(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rollback failed after interruption");
    }
}

#[async_trait]
impl DatabaseExecutor for SqlExecutor {
    async fn execute_insert(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
        records: &[Record],
    ) -> Result<ExecutionResult> {
        let table_name = self.driver.qualified_table_name(table);
        let mut result = ExecutionResult::new(Operation::Insert, &table_name);
        result.before_count = self.row_count(ctx, conn, &table_name).await?;

        let batch_size = self.batch_size(table);
        let use_bulk = batch_size > 1
            && records.len() > self.min_batch_threshold
            && self.driver.supports_batch_insert();

        let mut bulk_done = false;
        if use_bulk {
            let (columns, rows) = self.bulk_rows(table, records);
            let chunk_size = self.chunk_size(batch_size, columns.len());
            match self
                .insert_bulk(ctx, conn, &table_name, &columns, &rows, chunk_size)
                .await
            {
                Ok(affected) => {
                    result.record_bulk(records.len() as u64, affected);
                    bulk_done = true;
                    debug!(
                        table = %table_name,
                        records = records.len(),
                        affected,
                        chunk_size,
                        "bulk insert complete"
                    );
                }
                Err(e) if e.is_interrupted() => return Err(e.with_partial(result)),
                Err(e) => {
                    info!(
                        table = %table_name,
                        records = records.len(),
                        error = %e,
                        "bulk insert failed, falling back to individual inserts"
                    );
                }
            }
        }

        if !bulk_done {
            if let Err(e) = self
                .insert_individually(ctx, conn, table, &table_name, records, &mut result)
                .await
            {
                return Err(e.with_partial(result));
            }
        }

        result.after_count = self.row_count(ctx, conn, &table_name).await?;
        result.success = result.is_success();
        Ok(result)
    }

    async fn execute_update(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
        records: &[Record],
        filter: Option<&Filter>,
    ) -> Result<ExecutionResult> {
        let filter = filter.ok_or_else(|| Error::MissingFilter {
            operation: Operation::Update.to_string(),
        })?;
        let values = records
            .first()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::MissingRecords {
                operation: Operation::Update.to_string(),
            })?;

        let table_name = self.driver.qualified_table_name(table);
        let assignments: Vec<(String, SqlArg)> = self
            .project(table, values)
            .into_iter()
            .map(|(c, v)| {
                let arg = self.prepare_value(table, &c, v);
                (c, arg)
            })
            .collect();

        let stmt = statement::update(&*self.driver, &table_name, &assignments, filter)?;
        ctx.log_statement(&stmt.sql, stmt.params.len());
        let affected = ctx.run(conn.execute(&stmt.sql, &stmt.params)).await?;

        let mut result = ExecutionResult::new(Operation::Update, table_name);
        result.record_statement(affected);
        Ok(result)
    }

    async fn execute_delete(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
        filter: Option<&Filter>,
    ) -> Result<ExecutionResult> {
        let filter = filter.ok_or_else(|| Error::MissingFilter {
            operation: Operation::Delete.to_string(),
        })?;

        let table_name = self.driver.qualified_table_name(table);
        let stmt = statement::delete(&*self.driver, &table_name, filter)?;
        ctx.log_statement(&stmt.sql, stmt.params.len());
        let affected = ctx.run(conn.execute(&stmt.sql, &stmt.params)).await?;

        let mut result = ExecutionResult::new(Operation::Delete, table_name);
        result.record_statement(affected);
        Ok(result)
    }
}
