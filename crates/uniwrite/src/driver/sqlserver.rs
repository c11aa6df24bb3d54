//! SQL Server driver

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{
    column_definitions, column_from_row, introspect, merge_params, query_count,
    table_from_row, Casing, DatabaseDriver, QuoteStyle, COMMON_RESERVED,
};
use crate::connection::{Connection, ConnectionFactory, DatabaseType};
use crate::context::ExecContext;
use crate::error::Result;
use crate::model::{ConnectionDescriptor, TableDescriptor};
use crate::security::escape_string_literal;
use crate::typemap::{TypeMap, SQLSERVER};
use crate::types::{ColumnMetadata, TableMetadata};

const STYLE: QuoteStyle = QuoteStyle {
    open: '[',
    close: ']',
    casing: Casing::Insensitive,
    reserved: COMMON_RESERVED,
};

const DEFAULT_SCHEMA: &str = "dbo";

const DEFAULT_PARAMS: &[(&str, &str)] = &[
    ("encrypt", "false"),
    ("TrustServerCertificate", "true"),
];

const ALREADY_EXISTS: &[&str] = &["there is already an object named", "code: 2714"];

/// SQL Server driver
pub struct SqlServerDriver {
    factory: Arc<dyn ConnectionFactory>,
}

impl Default for SqlServerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlServerDriver {
    /// Driver backed by the native client (when compiled in)
    pub fn new() -> Self {
        #[cfg(feature = "sqlserver")]
        let factory: Arc<dyn ConnectionFactory> =
            Arc::new(crate::sqlserver::SqlServerConnectionFactory);
        #[cfg(not(feature = "sqlserver"))]
        let factory: Arc<dyn ConnectionFactory> = Arc::new(
            crate::connection::UnavailableFactory::new(DatabaseType::SqlServer, "sqlserver"),
        );
        Self { factory }
    }

    /// Driver using a custom connection factory
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }

    fn schema_literal(schema: Option<&str>) -> String {
        escape_string_literal(schema.unwrap_or(DEFAULT_SCHEMA))
    }
}

/// ADO values containing `;` must be wrapped in braces
fn ado_value(value: &str) -> String {
    if value.contains(';') || value.starts_with('{') {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

#[async_trait]
impl DatabaseDriver for SqlServerDriver {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    fn type_map(&self) -> &'static TypeMap {
        &SQLSERVER
    }

    fn connection_factory(&self) -> Arc<dyn ConnectionFactory> {
        self.factory.clone()
    }

    /// ADO.NET style: `server=tcp:host,port;database=..;user=..;password=..`
    fn build_connection_string(&self, conn: &ConnectionDescriptor) -> Result<String> {
        let mut parts = vec![
            format!("server=tcp:{},{}", conn.host, conn.port),
            format!("database={}", ado_value(&conn.database)),
            format!("user={}", ado_value(&conn.username)),
            format!("password={}", ado_value(&conn.password)),
        ];
        let params = merge_params(DEFAULT_PARAMS, &conn.params);
        parts.extend(params.iter().map(|(k, v)| format!("{}={}", k, ado_value(v))));
        Ok(parts.join(";"))
    }

    async fn configure_session(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        _desc: &ConnectionDescriptor,
    ) {
        let sql = "SET DATEFORMAT ymd";
        ctx.log_statement(sql, 0);
        if let Err(e) = ctx.run(conn.execute(sql, &[])).await {
            warn!(error = %e, "sqlserver session setup failed");
        }
    }

    fn default_schema(&self, _conn: &ConnectionDescriptor) -> Option<String> {
        Some(DEFAULT_SCHEMA.to_string())
    }

    /// `schema.table`, defaulting to `dbo`
    fn qualified_table_name(&self, table: &TableDescriptor) -> String {
        let schema = self
            .resolve_schema(&table.connection)
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        format!("{}.{}", STYLE.escape(&schema), STYLE.escape(&table.table))
    }

    fn generate_create_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        let defs = column_definitions(self, table)?;
        let qualified = self.qualified_table_name(table);
        Ok(vec![format!(
            "IF NOT EXISTS (SELECT * FROM sys.objects WHERE object_id = OBJECT_ID(N'{}') AND type in (N'U')) \
             BEGIN CREATE TABLE {} ({}) END",
            escape_string_literal(&qualified),
            qualified,
            defs.join(", ")
        )])
    }

    fn escape_identifier(&self, name: &str) -> String {
        STYLE.escape(name)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn max_bind_parameters(&self) -> usize {
        2098
    }

    fn max_rows_per_statement(&self) -> usize {
        1000
    }

    fn is_already_exists_error(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        ALREADY_EXISTS.iter().any(|p| lowered.contains(p))
    }

    async fn table_exists(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &TableDescriptor,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) AS cnt FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}'",
            Self::schema_literal(table.connection.explicit_schema()),
            escape_string_literal(&table.table)
        );
        Ok(query_count(ctx, conn, &sql, &[]).await? > 0)
    }

    async fn list_tables(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        schema: Option<&str>,
    ) -> Result<Vec<TableMetadata>> {
        let sql = format!(
            "SELECT s.name AS table_schema, t.name AS table_name, \
                    CAST(ep.value AS NVARCHAR(4000)) AS table_comment \
             FROM sys.tables t \
             JOIN sys.schemas s ON s.schema_id = t.schema_id \
             LEFT JOIN sys.extended_properties ep \
                ON ep.major_id = t.object_id AND ep.minor_id = 0 AND ep.name = 'MS_Description' \
             WHERE s.name = '{}' ORDER BY t.name",
            Self::schema_literal(schema)
        );
        let rows = introspect(ctx, conn, &sql).await?;
        Ok(rows.iter().filter_map(|r| table_from_row(r, schema)).collect())
    }

    async fn list_columns(
        &self,
        ctx: &ExecContext,
        conn: &dyn Connection,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnMetadata>> {
        let sql = format!(
            "SELECT c.COLUMN_NAME AS column_name, \
                    c.DATA_TYPE AS data_type, \
                    c.IS_NULLABLE AS nullable, \
                    c.ORDINAL_POSITION AS ordinal_position, \
                    c.COLUMN_DEFAULT AS column_default, \
                    c.CHARACTER_MAXIMUM_LENGTH AS max_length, \
                    c.NUMERIC_PRECISION AS numeric_precision, \
                    c.NUMERIC_SCALE AS numeric_scale, \
                    k.ORDINAL_POSITION AS pk_ordinal, \
                    CAST(ep.value AS NVARCHAR(4000)) AS column_comment \
             FROM INFORMATION_SCHEMA.COLUMNS c \
             LEFT JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                ON tc.TABLE_SCHEMA = c.TABLE_SCHEMA AND tc.TABLE_NAME = c.TABLE_NAME \
               AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
             LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k \
                ON k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME AND k.TABLE_SCHEMA = c.TABLE_SCHEMA \
               AND k.TABLE_NAME = c.TABLE_NAME AND k.COLUMN_NAME = c.COLUMN_NAME \
             LEFT JOIN sys.extended_properties ep \
                ON ep.major_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)) \
               AND ep.minor_id = COLUMNPROPERTY(ep.major_id, c.COLUMN_NAME, 'ColumnId') \
               AND ep.name = 'MS_Description' \
             WHERE c.TABLE_SCHEMA = '{}' AND c.TABLE_NAME = '{}' \
             ORDER BY c.ORDINAL_POSITION",
            Self::schema_literal(schema),
            escape_string_literal(table)
        );
        let rows = introspect(ctx, conn, &sql).await?;
        Ok(rows
            .iter()
            .filter_map(|r| column_from_row(r, &SQLSERVER))
            .collect())
    }

    fn supports_schema(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldAttribute;

    fn descriptor() -> TableDescriptor {
        TableDescriptor::new(
            "users",
            "sqlserver",
            ConnectionDescriptor::new("mssql.local", 1433, "sa", "Str0ng;Pass", "app"),
        )
        .with_field(FieldAttribute::new("id", "int").primary_key())
        .with_field(FieldAttribute::new("active", "boolean"))
    }

    #[test]
    fn test_connection_string() {
        let dsn = SqlServerDriver::new()
            .build_connection_string(&descriptor().connection)
            .unwrap();
        assert_eq!(
            dsn,
            "server=tcp:mssql.local,1433;database=app;user=sa;password={Str0ng;Pass};\
             TrustServerCertificate=true;encrypt=false"
        );
    }

    #[test]
    fn test_connection_string_override() {
        let conn = descriptor().connection.with_param("Encrypt", "true");
        let dsn = SqlServerDriver::new().build_connection_string(&conn).unwrap();
        assert!(dsn.contains("Encrypt=true"));
        assert!(!dsn.contains("encrypt=false"));
    }

    #[test]
    fn test_guarded_create_table() {
        let ddl = SqlServerDriver::new()
            .generate_create_table_ddl(&descriptor())
            .unwrap();
        assert_eq!(
            ddl[0],
            "IF NOT EXISTS (SELECT * FROM sys.objects WHERE object_id = OBJECT_ID(N'dbo.users') \
             AND type in (N'U')) BEGIN CREATE TABLE dbo.users (id INT NOT NULL, active BIT, \
             PRIMARY KEY (id)) END"
        );
    }

    #[test]
    fn test_escape_identifier() {
        let d = SqlServerDriver::new();
        assert_eq!(d.escape_identifier("UserName"), "UserName");
        assert_eq!(d.escape_identifier("select"), "[select]");
        assert_eq!(d.escape_identifier("odd]name"), "[odd]]name]");
        assert_eq!(d.placeholder(1), "@P1");
    }

    #[test]
    fn test_already_exists_detection() {
        let d = SqlServerDriver::new();
        assert!(d.is_already_exists_error(
            "There is already an object named 'users' in the database."
        ));
        assert!(!d.is_already_exists_error("Invalid object name 'users'."));
    }
}
