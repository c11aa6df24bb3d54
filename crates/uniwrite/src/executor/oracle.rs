//! Oracle value preprocessing
//!
//! Oracle does not convert ISO date strings implicitly under arbitrary NLS
//! settings, and NUMBER rejects values outside ±(10^38 − 1). Strings headed for
//! temporal columns become `TO_DATE` / `TO_TIMESTAMP` / `TO_TIMESTAMP_TZ`
//! expressions interpolated into the SQL text; numeric values are clamped.

use regex::Regex;
use std::sync::LazyLock;

use super::{type_family, TypeFamily, ValuePreprocessor};
use crate::model::FieldAttribute;
use crate::security::escape_string_literal;
use crate::statement::SqlArg;
use crate::types::Value;

/// Largest magnitude an Oracle NUMBER holds
pub const ORACLE_NUMBER_MAX: f64 = 9.999_999_999_999_999e37;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2})(\.\d{1,9})?$").unwrap()
});

static DATETIME_TZ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2})(\.\d{1,9})?\s?([+-]\d{2}:\d{2})$")
        .unwrap()
});

/// Value rewriting for Oracle
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleValuePreprocessor;

impl ValuePreprocessor for OracleValuePreprocessor {
    fn preprocess(&self, field: &FieldAttribute, value: Value) -> SqlArg {
        match type_family(field) {
            TypeFamily::Date | TypeFamily::Timestamp | TypeFamily::TimestampTz => {
                match value {
                    Value::String(s) => match temporal_expression(&s) {
                        Some(expr) => SqlArg::Raw(expr),
                        None => SqlArg::Bound(Value::String(s)),
                    },
                    other => SqlArg::Bound(other),
                }
            }
            TypeFamily::Integer | TypeFamily::Float | TypeFamily::Decimal => {
                SqlArg::Bound(clamp_numeric(value))
            }
            TypeFamily::Other => SqlArg::Bound(value),
        }
    }
}

/// Rewrite a recognized date/time literal into an Oracle conversion call
///
/// The shape of the literal decides the function, not the column type.
pub fn temporal_expression(literal: &str) -> Option<String> {
    let s = literal.trim();

    if DATE_RE.is_match(s) {
        return Some(format!(
            "TO_DATE('{}', 'YYYY-MM-DD')",
            escape_string_literal(s)
        ));
    }

    if let Some(caps) = DATETIME_TZ_RE.captures(s) {
        let fraction = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let normalized = format!("{} {}{} {}", &caps[1], &caps[2], fraction, &caps[4]);
        let mask = if fraction.is_empty() {
            "YYYY-MM-DD HH24:MI:SS TZH:TZM"
        } else {
            "YYYY-MM-DD HH24:MI:SS.FF TZH:TZM"
        };
        return Some(format!(
            "TO_TIMESTAMP_TZ('{}', '{}')",
            escape_string_literal(&normalized),
            mask
        ));
    }

    if let Some(caps) = DATETIME_RE.captures(s) {
        let fraction = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let normalized = format!("{} {}{}", &caps[1], &caps[2], fraction);
        let mask = if fraction.is_empty() {
            "YYYY-MM-DD HH24:MI:SS"
        } else {
            "YYYY-MM-DD HH24:MI:SS.FF"
        };
        return Some(format!(
            "TO_TIMESTAMP('{}', '{}')",
            escape_string_literal(&normalized),
            mask
        ));
    }

    None
}

fn clamp_f64(v: f64) -> Value {
    if v.is_nan() {
        return Value::Int64(0);
    }
    Value::Float64(v.clamp(-ORACLE_NUMBER_MAX, ORACLE_NUMBER_MAX))
}

/// Clamp a numeric value into NUMBER range; NaN becomes 0
///
/// Strings are parsed as an integer, then as a float; anything else passes
/// through unchanged.
pub fn clamp_numeric(value: Value) -> Value {
    match value {
        Value::Float64(v) => {
            if v.is_finite() && v.abs() <= ORACLE_NUMBER_MAX {
                Value::Float64(v)
            } else {
                clamp_f64(v)
            }
        }
        Value::Float32(v) => {
            if v.is_finite() {
                Value::Float32(v)
            } else {
                clamp_f64(f64::from(v))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Value::Int64(i)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                clamp_f64(f)
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}
