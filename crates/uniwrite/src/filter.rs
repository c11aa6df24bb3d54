//! Dialect-agnostic row predicate
//!
//! A [`Filter`] is built by the caller and handed through the writer untouched.
//! It only becomes SQL inside a [`SqlWriter`], which applies the target
//! dialect's identifier escaping and placeholder style.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::security::validate_where_clause;
use crate::statement::SqlWriter;
use crate::types::Value;

/// Row predicate for update and delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// `column <> value`
    Ne(String, Value),
    /// `column < value`
    Lt(String, Value),
    /// `column <= value`
    Le(String, Value),
    /// `column > value`
    Gt(String, Value),
    /// `column >= value`
    Ge(String, Value),
    /// `column IN (values...)`; an empty list matches nothing
    In(String, Vec<Value>),
    /// `column IS NULL`
    IsNull(String),
    /// `column IS NOT NULL`
    IsNotNull(String),
    /// `column LIKE pattern`
    Like(String, String),
    /// Conjunction; empty matches everything, which update and delete reject
    And(Vec<Filter>),
    /// Disjunction; empty matches nothing
    Or(Vec<Filter>),
    /// Negation
    Not(Box<Filter>),
    /// Trusted raw SQL fragment, inserted verbatim
    Raw(String),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    /// `column <> value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(column.into(), value.into())
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(column.into(), value.into())
    }

    /// `column <= value`
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Le(column.into(), value.into())
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(column.into(), value.into())
    }

    /// `column >= value`
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ge(column.into(), value.into())
    }

    /// `column IN (...)`
    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull(column.into())
    }

    /// `column LIKE pattern`
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like(column.into(), pattern.into())
    }

    /// Raw fragment
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    /// Combine with AND, flattening nested conjunctions
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Combine with OR, flattening nested disjunctions
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negate
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Whether the filter places no constraint on rows
    ///
    /// True for an empty `And`, and for an `And` made only of such filters.
    pub fn is_unconstrained(&self) -> bool {
        match self {
            Self::And(parts) => parts.iter().all(Filter::is_unconstrained),
            _ => false,
        }
    }

    /// Render into a statement, binding values as parameters
    pub fn render(&self, w: &mut SqlWriter<'_>) -> Result<()> {
        match self {
            Self::Eq(c, v) => compare(w, c, "=", v),
            Self::Ne(c, v) => compare(w, c, "<>", v),
            Self::Lt(c, v) => compare(w, c, "<", v),
            Self::Le(c, v) => compare(w, c, "<=", v),
            Self::Gt(c, v) => compare(w, c, ">", v),
            Self::Ge(c, v) => compare(w, c, ">=", v),
            Self::In(c, values) => {
                if values.is_empty() {
                    w.push_str("1=0");
                    return Ok(());
                }
                w.push_column(c);
                w.push_str(" IN (");
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        w.push_str(", ");
                    }
                    w.bind(v.clone());
                }
                w.push_str(")");
                Ok(())
            }
            Self::IsNull(c) => {
                w.push_column(c);
                w.push_str(" IS NULL");
                Ok(())
            }
            Self::IsNotNull(c) => {
                w.push_column(c);
                w.push_str(" IS NOT NULL");
                Ok(())
            }
            Self::Like(c, pattern) => {
                w.push_column(c);
                w.push_str(" LIKE ");
                w.bind(Value::String(pattern.clone()));
                Ok(())
            }
            Self::And(parts) => join(w, parts, " AND ", "1=1"),
            Self::Or(parts) => join(w, parts, " OR ", "1=0"),
            Self::Not(inner) => {
                w.push_str("NOT (");
                inner.render(w)?;
                w.push_str(")");
                Ok(())
            }
            Self::Raw(sql) => {
                validate_where_clause(sql)?;
                w.push_str("(");
                w.push_str(sql.trim());
                w.push_str(")");
                Ok(())
            }
        }
    }
}

fn compare(w: &mut SqlWriter<'_>, column: &str, op: &str, value: &Value) -> Result<()> {
    // `= NULL` never matches; render the intended null test instead.
    if value.is_null() {
        match op {
            "=" => return Filter::IsNull(column.to_string()).render(w),
            "<>" => return Filter::IsNotNull(column.to_string()).render(w),
            _ => {}
        }
    }
    w.push_column(column);
    w.push_str(" ");
    w.push_str(op);
    w.push_str(" ");
    w.bind(value.clone());
    Ok(())
}

fn join(w: &mut SqlWriter<'_>, parts: &[Filter], sep: &str, empty: &str) -> Result<()> {
    match parts {
        [] => {
            w.push_str(empty);
            Ok(())
        }
        [only] => only.render(w),
        _ => {
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    w.push_str(sep);
                }
                w.push_str("(");
                part.render(w)?;
                w.push_str(")");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mysql::MySqlDriver;
    use crate::driver::postgres::PostgresDriver;

    fn render(driver: &dyn crate::driver::DatabaseDriver, filter: &Filter) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new(driver);
        filter.render(&mut w).unwrap();
        let stmt = w.finish();
        (stmt.sql, stmt.params)
    }

    #[test]
    fn test_simple_comparison_mysql() {
        let (sql, params) = render(&MySqlDriver::new(), &Filter::eq("id", 7i64));
        assert_eq!(sql, "id = ?");
        assert_eq!(params, vec![Value::Int64(7)]);
    }

    #[test]
    fn test_numbered_placeholders_postgres() {
        let f = Filter::eq("status", "active").and(Filter::is_in("id", [1i64, 2, 3]));
        let (sql, params) = render(&PostgresDriver::new(), &f);
        assert_eq!(sql, "(status = $1) AND (id IN ($2, $3, $4))");
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_null_comparisons_become_null_tests() {
        let (sql, params) = render(&MySqlDriver::new(), &Filter::eq("deleted_at", Value::Null));
        assert_eq!(sql, "deleted_at IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_combinators() {
        let driver = MySqlDriver::new();
        assert_eq!(render(&driver, &Filter::And(vec![])).0, "1=1");
        assert_eq!(render(&driver, &Filter::Or(vec![])).0, "1=0");
        assert_eq!(render(&driver, &Filter::In("id".into(), vec![])).0, "1=0");
    }

    #[test]
    fn test_unconstrained_filters() {
        assert!(Filter::And(vec![]).is_unconstrained());
        assert!(Filter::And(vec![Filter::And(vec![])]).is_unconstrained());
        assert!(!Filter::And(vec![Filter::eq("id", 1i64)]).is_unconstrained());
        assert!(!Filter::Or(vec![]).is_unconstrained());
        assert!(!Filter::And(vec![]).not().is_unconstrained());
    }

    #[test]
    fn test_not_and_reserved_column() {
        let f = Filter::like("order", "a%").not();
        let (sql, _) = render(&MySqlDriver::new(), &f);
        assert_eq!(sql, "NOT (`order` LIKE ?)");
    }

    #[test]
    fn test_raw_fragment_is_validated() {
        let driver = MySqlDriver::new();
        assert_eq!(render(&driver, &Filter::raw("a > 1")).0, "(a > 1)");

        let mut w = SqlWriter::new(&driver);
        assert!(Filter::raw("1=1; DROP TABLE t").render(&mut w).is_err());
    }
}
