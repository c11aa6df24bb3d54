//! Universal writer
//!
//! The single entry point callers use. One [`UniversalWriter::execute`] call:
//!
//! 1. parses the operation and rejects update/delete without a filter
//! 2. resolves the dialect to a driver/executor pair
//! 3. validates the connection descriptor
//! 4. acquires a pooled connection (centralized or distributed strategy)
//! 5. creates the table when it is not known to exist
//! 6. dispatches to the executor
//!
//! The connection is released when the call returns, on every path.
//!
//! # Example
//!
//! ```rust,ignore
//! use uniwrite::prelude::*;
//!
//! let writer = UniversalWriter::new(WriterConfig::from_env())?;
//! let table = TableDescriptor::new(
//!     "events",
//!     "postgres",
//!     ConnectionDescriptor::new("localhost", 5432, "app", "secret", "warehouse"),
//! )
//! .with_field(FieldAttribute::new("id", "bigint").primary_key())
//! .with_field(FieldAttribute::new("name", "varchar").with_length(64));
//!
//! let result = writer
//!     .execute(&ExecContext::new(), &table, &records, None, "insert")
//!     .await?;
//! if !result.success {
//!     for failed in &result.failed_records {
//!         eprintln!("record {} failed: {}", failed.index, failed.reason);
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Strategy, WriterConfig};
use crate::context::ExecContext;
use crate::driver::{execute_ddl, open_pooled, DatabaseDriver};
use crate::error::{Error, Result};
use crate::executor::DatabaseExecutor;
use crate::filter::Filter;
use crate::model::{ExecutionResult, Operation, Record, TableDescriptor};
use crate::pool::{PoolManager, PooledConnection};
use crate::registry::DriverRegistry;
use crate::types::{ColumnMetadata, TableMetadata};

/// Orchestration facade over the registry, pools and executors
pub struct UniversalWriter {
    registry: Arc<DriverRegistry>,
    pools: PoolManager,
    config: WriterConfig,
}

impl UniversalWriter {
    /// Writer over the built-in dialects
    pub fn new(config: WriterConfig) -> Result<Self> {
        let registry =
            DriverRegistry::builtin_with(config.default_batch_size, config.min_batch_threshold);
        Self::with_registry(Arc::new(registry), config)
    }

    /// Writer over a caller-built registry
    pub fn with_registry(registry: Arc<DriverRegistry>, config: WriterConfig) -> Result<Self> {
        config.check()?;
        Ok(Self {
            registry,
            pools: PoolManager::new(),
            config,
        })
    }

    /// The registry in use
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// The configuration in use
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Write `records` to `table`
    ///
    /// `operation` is `insert` (alias `append`), `update` or `delete`,
    /// case-insensitive. Update applies the first record to every row matching
    /// `filter`; update and delete fail without a filter before anything runs.
    ///
    /// Partial failure is reported in the result, not as an error.
    pub async fn execute(
        &self,
        ctx: &ExecContext,
        table: &TableDescriptor,
        records: &[Record],
        filter: Option<&Filter>,
        operation: &str,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let operation: Operation = operation.parse()?;
        match operation {
            Operation::Update | Operation::Delete if filter.is_none() => {
                return Err(Error::MissingFilter {
                    operation: operation.to_string(),
                });
            }
            Operation::Update if records.first().map_or(true, |r| r.is_empty()) => {
                return Err(Error::MissingRecords {
                    operation: operation.to_string(),
                });
            }
            _ => {}
        }

        let (driver, executor) = self.resolve(&table.dialect)?;
        table.connection.check()?;

        let ctx = ctx
            .clone()
            .with_sql_log(self.config.log_sql || ctx.sql_log_enabled());

        let mut conn = self.acquire(&ctx, driver.as_ref(), table).await?;

        let outcome = async {
            if !table.table_exists && !table.fields.is_empty() {
                self.ensure_table(&ctx, driver.as_ref(), &conn, table).await?;
            }
            match operation {
                Operation::Insert => executor.execute_insert(&ctx, &*conn, table, records).await,
                Operation::Update => {
                    executor
                        .execute_update(&ctx, &*conn, table, records, filter)
                        .await
                }
                Operation::Delete => executor.execute_delete(&ctx, &*conn, table, filter).await,
            }
        }
        .await;

        // an interrupted statement may leave the session mid-transaction
        if matches!(&outcome, Err(e) if e.is_interrupted()) {
            conn.discard();
        }
        let mut result = outcome?;
        result.duration = started.elapsed();

        info!(
            dialect = driver.name(),
            table = %result.table,
            operation = %operation,
            success = result.success,
            succeeded = result.success_count,
            failed = result.failed_count,
            duration_ms = result.duration.as_millis() as u64,
            "write complete"
        );
        Ok(result)
    }

    /// Tables visible in `schema` (dialect default when `None`)
    pub async fn list_tables(
        &self,
        ctx: &ExecContext,
        table: &TableDescriptor,
        schema: Option<&str>,
    ) -> Result<Vec<TableMetadata>> {
        let (driver, _) = self.resolve(&table.dialect)?;
        table.connection.check()?;
        let conn = self.acquire(ctx, driver.as_ref(), table).await?;
        driver.list_tables(ctx, &*conn, schema).await
    }

    /// Columns of the descriptor's table, with canonical type names
    pub async fn describe_table(
        &self,
        ctx: &ExecContext,
        table: &TableDescriptor,
    ) -> Result<TableMetadata> {
        let (driver, _) = self.resolve(&table.dialect)?;
        table.connection.check()?;
        let conn = self.acquire(ctx, driver.as_ref(), table).await?;

        let schema = table.connection.explicit_schema();
        let columns: Vec<ColumnMetadata> =
            driver.list_columns(ctx, &*conn, &table.table, schema).await?;
        let mut metadata = TableMetadata::new(table.table.clone());
        metadata.schema = driver.resolve_schema(&table.connection);
        metadata.columns = columns;
        Ok(metadata)
    }

    /// Close every pooled connection
    pub async fn close(&self) -> Result<()> {
        self.pools.close_all().await
    }

    fn resolve(
        &self,
        dialect: &str,
    ) -> Result<(Arc<dyn DatabaseDriver>, Arc<dyn DatabaseExecutor>)> {
        match (
            self.registry.resolve_driver(dialect),
            self.registry.resolve_executor(dialect),
        ) {
            (Some(driver), Some(executor)) => Ok((driver, executor)),
            _ => Err(Error::unsupported_dialect(dialect)),
        }
    }

    async fn acquire(
        &self,
        ctx: &ExecContext,
        driver: &dyn DatabaseDriver,
        table: &TableDescriptor,
    ) -> Result<PooledConnection> {
        let settings = &self.config.pool;
        if self.config.connection_strategy == Strategy::Distributed {
            if let Some(conn) = driver
                .acquire_connection(ctx, &self.pools, &table.connection, settings)
                .await?
            {
                return Ok(conn);
            }
            debug!(dialect = driver.name(), "driver declined, using centralized connection");
        }
        let conn = open_pooled(driver, ctx, &self.pools, &table.connection, settings).await?;
        driver.configure_session(ctx, &*conn, &table.connection).await;
        Ok(conn)
    }

    async fn ensure_table(
        &self,
        ctx: &ExecContext,
        driver: &dyn DatabaseDriver,
        conn: &PooledConnection,
        table: &TableDescriptor,
    ) -> Result<()> {
        match self.config.table_creation_strategy {
            Strategy::Centralized => execute_ddl(driver, ctx, &**conn, table).await,
            Strategy::Distributed => {
                match driver.create_table_if_absent(ctx, &**conn, table).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_interrupted() => Err(e),
                    Err(e) => {
                        warn!(
                            dialect = driver.name(),
                            table = %table.table,
                            error = %e,
                            "driver table creation failed, using shared DDL executor"
                        );
                        execute_ddl(driver, ctx, &**conn, table).await
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for UniversalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniversalWriter")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
