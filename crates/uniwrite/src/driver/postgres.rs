//! PostgreSQL driver

use async_trait::async_trait;
use std::sync::Arc;

use super::{
    column_definitions, column_from_row, introspect, merge_params, query_count,
    schema_predicate, table_from_row, Casing, DatabaseDriver, QuoteStyle, COMMON_RESERVED,
};
use crate::connection::{Connection, ConnectionFactory, DatabaseType};
use crate::context::ExecContext;
use crate::error::Result;
use crate::model::{ConnectionDescriptor, TableDescriptor};
use crate::security::escape_string_literal;
use crate::typemap::{TypeMap, POSTGRES};
use crate::types::{ColumnMetadata, TableMetadata};

const STYLE: QuoteStyle = QuoteStyle {
    open: '"',
    close: '"',
    casing: Casing::Lower,
    reserved: COMMON_RESERVED,
};

const DEFAULT_PARAMS: &[(&str, &str)] = &[
    ("application_name", "uniwrite"),
    ("connect_timeout", "10"),
    ("sslmode", "disable"),
];

const ALREADY_EXISTS: &[&str] = &["already exists", "42p07"];

/// PostgreSQL driver
pub struct PostgresDriver {
    factory: Arc<dyn ConnectionFactory>,
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresDriver {
    /// Driver backed by the native client (when compiled in)
    pub fn new() -> Self {
        #[cfg(feature = "postgres")]
        let factory: Arc<dyn ConnectionFactory> = Arc::new(crate::postgres::PgConnectionFactory);
        #[cfg(not(feature = "postgres"))]
        let factory: Arc<dyn ConnectionFactory> = Arc::new(
            crate::connection::UnavailableFactory::new(DatabaseType::PostgreSQL, "postgres"),
        );
        Self { factory }
    }

    /// Driver using a custom connection factory
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }
}

/// Quote a keyword/value DSN value when it contains spaces, quotes or backslashes
fn dsn_value(value: &str) -> String {
    if !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\')
    {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn type_map(&self) -> &'static TypeMap {
        &POSTGRES
    }

    fn connection_factory(&self) -> Arc<dyn ConnectionFactory> {
        self.factory.clone()
    }

    /// Keyword/value DSN; an explicit schema becomes the session search path
    fn build_connection_string(&self, conn: &ConnectionDescriptor) -> Result<String> {
        let mut parts = vec![
            format!("host={}", dsn_value(&conn.host)),
            format!("port={}", conn.port),
            format!("user={}", dsn_value(&conn.username)),
        ];
        if !conn.password.is_empty() {
            parts.push(format!("password={}", dsn_value(&conn.password)));
        }
        parts.push(format!("dbname={}", dsn_value(&conn.database)));

        let mut params = merge_params(DEFAULT_PARAMS, &conn.params);
        if let Some(schema) = conn.explicit_schema() {
            params
                .entry("options".to_string())
                .or_insert_with(|| format!("-c search_path={}", schema));
        }
        parts.extend(params.iter().map(|(k, v)| format!("{}={}", k, dsn_value(v))));
        Ok(parts.join(" "))
    }

    fn qualified_table_name(&self, table: &TableDescriptor) -> String {
        match table.connection.explicit_schema() {
            Some(schema) => format!(
                "{}.{}",
                STYLE.escape(schema),
                STYLE.escape(&table.table)
            ),
            None => STYLE.escape(&table.table),
        }
    }

    fn generate_create_table_ddl(&self, table: &TableDescriptor) -> Result<Vec<String>> {
        let defs = column_definitions(self, table)?;
        Ok(vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified_table_name(table),
            defs.join(", ")
        )])
    }

    fn escape_identifier(&self, name: &str) -> String {
        STYLE.escape(name)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn max_bind_parameters(&self) -> usize {
        65535
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
            "SELECT COUNT(*) AS cnt FROM information_schema.tables WHERE {} AND table_name = '{}'",
            schema_predicate(
                "table_schema",
                table.connection.explicit_schema(),
                "current_schema()"
            ),
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
            "SELECT t.table_schema AS table_schema, t.table_name AS table_name, \
                    obj_description(c.oid, 'pg_class') AS table_comment \
             FROM information_schema.tables t \
             LEFT JOIN pg_catalog.pg_namespace n ON n.nspname = t.table_schema \
             LEFT JOIN pg_catalog.pg_class c ON c.relname = t.table_name AND c.relnamespace = n.oid \
             WHERE {} AND t.table_type = 'BASE TABLE' ORDER BY t.table_name",
            schema_predicate("t.table_schema", schema, "current_schema()")
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
        let table = escape_string_literal(table);
        let sql = format!(
            "SELECT c.column_name AS column_name, \
                    c.data_type AS data_type, \
                    c.is_nullable AS nullable, \
                    c.ordinal_position AS ordinal_position, \
                    c.column_default AS column_default, \
                    c.character_maximum_length AS max_length, \
                    c.numeric_precision AS numeric_precision, \
                    c.numeric_scale AS numeric_scale, \
                    pk.ordinal_position AS pk_ordinal, \
                    col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, c.ordinal_position::int) AS column_comment \
             FROM information_schema.columns c \
             LEFT JOIN ( \
                SELECT ku.table_schema, ku.table_name, ku.column_name, ku.ordinal_position \
                FROM information_schema.table_constraints tc \
                JOIN information_schema.key_column_usage ku \
                  ON tc.constraint_name = ku.constraint_name \
                 AND tc.table_schema = ku.table_schema \
                 AND tc.table_name = ku.table_name \
                WHERE tc.constraint_type = 'PRIMARY KEY' \
             ) pk ON pk.table_schema = c.table_schema AND pk.table_name = c.table_name AND pk.column_name = c.column_name \
             WHERE {} AND c.table_name = '{}' \
             ORDER BY c.ordinal_position",
            schema_predicate("c.table_schema", schema, "current_schema()"),
            table
        );
        let rows = introspect(ctx, conn, &sql).await?;
        Ok(rows
            .iter()
            .filter_map(|r| column_from_row(r, &POSTGRES))
            .collect())
    }

    fn supports_schema(&self) -> bool {
        true
    }
}
