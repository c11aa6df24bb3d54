//! PostgreSQL value preprocessing
//!
//! The PostgreSQL wire protocol binds parameters with their exact types, so a
//! text value sent for a DATE or INTEGER column is rejected before the server
//! sees it. Strings and mismatched numeric widths are coerced to the Rust type
//! the column expects; values that cannot be coerced pass through and fail
//! per record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::ValuePreprocessor;
use crate::model::FieldAttribute;
use crate::statement::SqlArg;
use crate::types::Value;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

const DATETIME_TZ_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];

/// Value coercion for PostgreSQL
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresValuePreprocessor;

impl ValuePreprocessor for PostgresValuePreprocessor {
    fn preprocess(&self, field: &FieldAttribute, value: Value) -> SqlArg {
        if value.is_null() {
            return SqlArg::Bound(value);
        }
        let coerced = match field.canonical_type().as_str() {
            "date" => to_date(&value),
            "datetime" | "timestamp" => to_timestamp(&value),
            "timestamptz" => to_timestamptz(&value),
            "smallint" | "tinyint" => value.as_i64().and_then(|n| i16::try_from(n).ok()).map(Value::Int16),
            "int" | "integer" => value.as_i64().and_then(|n| i32::try_from(n).ok()).map(Value::Int32),
            "bigint" | "long" => integral(&value).map(Value::Int64),
            "float" | "real" => value.as_f64().map(|f| Value::Float32(f as f32)),
            "double" => value.as_f64().map(Value::Float64),
            "decimal" | "numeric" | "number" => to_decimal(&value),
            "boolean" | "bool" => value.as_bool().map(Value::Bool),
            _ => None,
        };
        SqlArg::Bound(coerced.unwrap_or(value))
    }
}

/// Integer value without silently truncating fractional floats
fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Float32(_) | Value::Float64(_) => value
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .and_then(|f| f.to_i64()),
        other => other.as_i64(),
    }
}

fn to_decimal(value: &Value) -> Option<Value> {
    match value {
        Value::Decimal(_) => None,
        Value::String(s) => Decimal::from_str(s.trim()).ok().map(Value::Decimal),
        Value::Float32(_) | Value::Float64(_) => {
            value.as_f64().and_then(Decimal::from_f64).map(Value::Decimal)
        }
        other => other.as_i64().map(|n| Value::Decimal(Decimal::from(n))),
    }
}

fn to_date(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(s).map(|dt| dt.date()))
                .map(Value::Date)
        }
        Value::DateTime(dt) => Some(Value::Date(dt.date())),
        _ => None,
    }
}

fn to_timestamp(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            parse_datetime(s)
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(Value::DateTime)
        }
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::DateTime),
        Value::DateTimeTz(dt) => Some(Value::DateTime(dt.naive_utc())),
        _ => None,
    }
}

fn to_timestamptz(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .ok()
                .or_else(|| {
                    DATETIME_TZ_FORMATS
                        .iter()
                        .find_map(|f| DateTime::parse_from_str(s, f).ok())
                })
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| parse_datetime(s).map(|dt| dt.and_utc()))
                .map(Value::DateTimeTz)
        }
        Value::DateTime(dt) => Some(Value::DateTimeTz(dt.and_utc())),
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}
