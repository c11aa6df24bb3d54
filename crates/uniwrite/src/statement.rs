//! DML statement builders
//!
//! Values reach the SQL text in one of two ways, modelled by [`SqlArg`]:
//! bound as a placeholder parameter, or interpolated as a raw expression
//! (Oracle `TO_DATE(...)` rewrites). Builders take columns in the caller's
//! order; record-based callers pass them sorted, so the generated text is
//! stable for a given record shape.

use crate::driver::{BulkInsertStyle, DatabaseDriver};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::model::Operation;
use crate::types::Value;

/// A value headed for a statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    /// Bound as a placeholder parameter
    Bound(Value),
    /// Interpolated verbatim into the SQL text
    Raw(String),
}

impl From<Value> for SqlArg {
    fn from(value: Value) -> Self {
        Self::Bound(value)
    }
}

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text
    pub sql: String,
    /// Parameters in placeholder order
    pub params: Vec<Value>,
}

/// Incremental SQL writer that tracks placeholder numbering
pub struct SqlWriter<'a> {
    driver: &'a dyn DatabaseDriver,
    sql: String,
    params: Vec<Value>,
}

impl<'a> SqlWriter<'a> {
    /// Start an empty statement for a driver
    pub fn new(driver: &'a dyn DatabaseDriver) -> Self {
        Self {
            driver,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    /// Append literal SQL
    pub fn push_str(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Append an escaped column identifier
    pub fn push_column(&mut self, name: &str) {
        let ident = self.driver.column_identifier(name);
        self.sql.push_str(&ident);
    }

    /// Bind a value and append its placeholder
    pub fn bind(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.driver.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    /// Append an argument, binding or interpolating by variant
    pub fn push_arg(&mut self, arg: &SqlArg) {
        match arg {
            SqlArg::Bound(v) => self.bind(v.clone()),
            SqlArg::Raw(expr) => self.sql.push_str(expr),
        }
    }

    /// Number of parameters bound so far
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Finish the statement
    pub fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

fn push_column_list(w: &mut SqlWriter<'_>, columns: &[String]) {
    w.push_str("(");
    for (i, c) in columns.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        w.push_column(c);
    }
    w.push_str(")");
}

fn push_values_tuple(w: &mut SqlWriter<'_>, row: &[SqlArg]) {
    w.push_str("(");
    for (i, arg) in row.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        w.push_arg(arg);
    }
    w.push_str(")");
}

/// Build an INSERT for one or more rows
///
/// Every row must have one argument per column. Multi-row inserts use the
/// driver's bulk style.
pub fn insert(
    driver: &dyn DatabaseDriver,
    table: &str,
    columns: &[String],
    rows: &[Vec<SqlArg>],
) -> Statement {
    let mut w = SqlWriter::new(driver);

    if rows.len() > 1 && driver.bulk_insert_style() == BulkInsertStyle::InsertAll {
        w.push_str("INSERT ALL");
        for row in rows {
            w.push_str(" INTO ");
            w.push_str(table);
            w.push_str(" ");
            push_column_list(&mut w, columns);
            w.push_str(" VALUES ");
            push_values_tuple(&mut w, row);
        }
        w.push_str(" SELECT 1 FROM DUAL");
        return w.finish();
    }

    w.push_str("INSERT INTO ");
    w.push_str(table);
    w.push_str(" ");
    push_column_list(&mut w, columns);
    w.push_str(" VALUES ");
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        push_values_tuple(&mut w, row);
    }
    w.finish()
}

/// Build `UPDATE table SET ... WHERE filter`
pub fn update(
    driver: &dyn DatabaseDriver,
    table: &str,
    assignments: &[(String, SqlArg)],
    filter: &Filter,
) -> Result<Statement> {
    require_constraint(filter, Operation::Update)?;
    let mut w = SqlWriter::new(driver);
    w.push_str("UPDATE ");
    w.push_str(table);
    w.push_str(" SET ");
    for (i, (column, arg)) in assignments.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        w.push_column(column);
        w.push_str(" = ");
        w.push_arg(arg);
    }
    w.push_str(" WHERE ");
    filter.render(&mut w)?;
    Ok(w.finish())
}

/// Build `DELETE FROM table WHERE filter`
pub fn delete(driver: &dyn DatabaseDriver, table: &str, filter: &Filter) -> Result<Statement> {
    require_constraint(filter, Operation::Delete)?;
    let mut w = SqlWriter::new(driver);
    w.push_str("DELETE FROM ");
    w.push_str(table);
    w.push_str(" WHERE ");
    filter.render(&mut w)?;
    Ok(w.finish())
}

/// An unconstrained filter would touch every row; treat it as missing
fn require_constraint(filter: &Filter, operation: Operation) -> Result<()> {
    if filter.is_unconstrained() {
        return Err(Error::MissingFilter {
            operation: operation.to_string(),
        });
    }
    Ok(())
}

/// Build the row-count query for a qualified table
pub fn count(table: &str) -> String {
    format!("SELECT COUNT(*) AS row_count FROM {}", table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mysql::MySqlDriver;
    use crate::driver::oracle::OracleDriver;
    use crate::driver::sqlserver::SqlServerDriver;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_multi_row_insert_mysql() {
        let stmt = insert(
            &MySqlDriver::new(),
            "`app`.`users`",
            &cols(&["id", "name"]),
            &[
                vec![Value::Int64(1).into(), Value::from("a").into()],
                vec![Value::Int64(2).into(), Value::from("b").into()],
            ],
        );
        assert_eq!(
            stmt.sql,
            "INSERT INTO `app`.`users` (id, name) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn test_oracle_insert_all_with_raw_expression() {
        let stmt = insert(
            &OracleDriver::new(),
            "\"SCOTT\".\"T\"",
            &cols(&["born", "id"]),
            &[
                vec![
                    SqlArg::Raw("TO_DATE('2024-01-15', 'YYYY-MM-DD')".into()),
                    Value::Int64(1).into(),
                ],
                vec![SqlArg::Bound(Value::Null), Value::Int64(2).into()],
            ],
        );
        assert_eq!(
            stmt.sql,
            "INSERT ALL INTO \"SCOTT\".\"T\" (BORN, ID) VALUES (TO_DATE('2024-01-15', 'YYYY-MM-DD'), :1) \
             INTO \"SCOTT\".\"T\" (BORN, ID) VALUES (:2, :3) SELECT 1 FROM DUAL"
        );
        assert_eq!(stmt.params, vec![Value::Int64(1), Value::Null, Value::Int64(2)]);
    }

    #[test]
    fn test_oracle_single_row_uses_plain_insert() {
        let stmt = insert(
            &OracleDriver::new(),
            "\"SCOTT\".\"T\"",
            &cols(&["id"]),
            &[vec![Value::Int64(1).into()]],
        );
        assert_eq!(stmt.sql, "INSERT INTO \"SCOTT\".\"T\" (ID) VALUES (:1)");
    }

    #[test]
    fn test_update_and_delete_sqlserver() {
        let driver = SqlServerDriver::new();
        let stmt = update(
            &driver,
            "dbo.users",
            &[("name".to_string(), Value::from("z").into())],
            &Filter::eq("id", 1i64),
        )
        .unwrap();
        assert_eq!(stmt.sql, "UPDATE dbo.users SET name = @P1 WHERE id = @P2");

        let stmt = delete(&driver, "dbo.users", &Filter::gt("id", 10i64)).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM dbo.users WHERE id > @P1");
        assert_eq!(stmt.params, vec![Value::Int64(10)]);
    }

    #[test]
    fn test_unconstrained_filter_is_rejected() {
        let driver = MySqlDriver::new();
        let everything = Filter::And(vec![]);

        assert!(matches!(
            delete(&driver, "users", &everything),
            Err(Error::MissingFilter { .. })
        ));
        assert!(matches!(
            update(&driver, "users", &[("name".to_string(), Value::from("z").into())], &everything),
            Err(Error::MissingFilter { .. })
        ));
    }
}
