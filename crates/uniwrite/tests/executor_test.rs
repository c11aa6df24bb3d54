//! Tests for SqlExecutor against an in-memory connection

mod common;

use chrono::NaiveDate;
use common::{mysql_table, record, users, MockDatabase};
use std::sync::Arc;
use uniwrite::driver::mysql::MySqlDriver;
use uniwrite::driver::oracle::OracleDriver;
use uniwrite::driver::postgres::PostgresDriver;
use uniwrite::executor::oracle::ORACLE_NUMBER_MAX;
use uniwrite::prelude::*;

fn mysql_executor() -> SqlExecutor {
    SqlExecutor::for_driver(Arc::new(MySqlDriver::new()))
}

fn connection() -> ConnectionDescriptor {
    ConnectionDescriptor::new("db.local", 1, "app", "secret", "main")
}

// ==================== Bulk Mode Tests ====================

#[tokio::test]
async fn test_bulk_chunks_share_one_transaction() {
    let db = MockDatabase::new();
    let table = mysql_table().with_batch_size(2);

    let result = mysql_executor()
        .execute_insert(&ExecContext::new(), &db.connection(), &table, &users(5))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.success_count, 5);
    assert_eq!(db.statements_starting("INSERT").len(), 3);
    assert_eq!(db.statements_starting("BEGIN").len(), 1);
    assert_eq!(db.statements_starting("COMMIT").len(), 1);
}

#[tokio::test]
async fn test_threshold_forces_individual_mode() {
    let db = MockDatabase::new();
    let executor = mysql_executor().with_min_batch_threshold(5);

    let result = executor
        .execute_insert(&ExecContext::new(), &db.connection(), &mysql_table(), &users(3))
        .await
        .unwrap();

    assert_eq!(result.success_count, 3);
    assert_eq!(db.statements_starting("INSERT").len(), 3);
    assert_eq!(db.statements_starting("BEGIN").len(), 3);
}

#[tokio::test]
async fn test_missing_keys_bind_null() {
    let db = MockDatabase::new();
    let records = vec![
        record(&[("id", Value::Int64(1)), ("name", Value::from("a"))]),
        record(&[("id", Value::Int64(2))]),
    ];

    mysql_executor()
        .execute_insert(&ExecContext::new(), &db.connection(), &mysql_table(), &records)
        .await
        .unwrap();

    let inserts = db.statements_starting("INSERT");
    assert_eq!(
        inserts[0],
        "INSERT INTO users (id, name) VALUES (?, ?), (?, ?)"
    );
    assert_eq!(
        db.with(|s| s.last_params.clone()),
        vec![
            Value::Int64(1),
            Value::from("a"),
            Value::Int64(2),
            Value::Null
        ]
    );
}

#[tokio::test]
async fn test_postgres_placeholders_are_numbered() {
    let db = MockDatabase::new();
    let executor = SqlExecutor::for_driver(Arc::new(PostgresDriver::new()));
    let table = TableDescriptor::new("users", "postgres", connection());

    executor
        .execute_insert(&ExecContext::new(), &db.connection(), &table, &users(2))
        .await
        .unwrap();

    assert_eq!(
        db.statements_starting("INSERT"),
        vec!["INSERT INTO users (id, name) VALUES ($1, $2), ($3, $4)".to_string()]
    );
}

// ==================== Classification Tests ====================

#[tokio::test]
async fn test_every_failure_is_classified() {
    let db = MockDatabase::new();
    db.with(|s| {
        s.fail_all = Some("ERROR 1406 (22001): Data too long for column 'name' at row 1".into())
    });

    let result = mysql_executor()
        .execute_insert(&ExecContext::new(), &db.connection(), &mysql_table(), &users(2))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.before_count, None);
    assert_eq!(result.after_count, None);
    assert_eq!(result.failed_count, 2);
    assert_eq!(result.reason_count(FailureReason::DataTooLong), 2);
    assert_eq!(
        result
            .failed_records
            .iter()
            .map(|f| f.index)
            .collect::<Vec<_>>(),
        vec![0, 1]
    );
}

#[tokio::test]
async fn test_unmatched_error_is_unknown() {
    let db = MockDatabase::new();
    db.with(|s| s.fail_all = Some("something odd happened".into()));

    let result = mysql_executor()
        .execute_insert(&ExecContext::new(), &db.connection(), &mysql_table(), &users(1))
        .await
        .unwrap();

    assert_eq!(result.reason_count(FailureReason::UnknownError), 1);
    assert_eq!(result.failed_records[0].error, "something odd happened");
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn test_cancel_after_insert_rolls_back() {
    let db = MockDatabase::new();
    let ctx = ExecContext::new();
    db.with(|s| s.cancel_after_inserts = Some((1, ctx.clone())));

    let err = mysql_executor()
        .execute_insert(&ctx, &db.connection(), &mysql_table().with_batch_size(1), &users(1))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled { .. }));
    assert_eq!(db.statements_starting("ROLLBACK").len(), 1);
    assert!(db.statements_starting("COMMIT").is_empty());
    assert_eq!(db.row_count(), 0);
    assert_eq!(err.partial_result().map(|p| p.success_count), Some(0));
}

#[tokio::test]
async fn test_cancel_mid_loop_keeps_processed_records() {
    let db = MockDatabase::new();
    let ctx = ExecContext::new();
    // third record's insert is the second to succeed
    db.with(|s| s.cancel_after_inserts = Some((2, ctx.clone())));
    let records = vec![
        record(&[("id", Value::Int64(1))]),
        record(&[("id", Value::Int64(1))]),
        record(&[("id", Value::Int64(2))]),
        record(&[("id", Value::Int64(3))]),
        record(&[("id", Value::Int64(4))]),
    ];

    let err = mysql_executor()
        .execute_insert(&ctx, &db.connection(), &mysql_table().with_batch_size(1), &records)
        .await
        .unwrap_err();

    let partial = err.partial_result().unwrap();
    assert_eq!(partial.success_count + partial.failed_count, 2);
    assert_eq!(partial.success_count, 1);
    assert_eq!(partial.failed_records.len(), 1);
    assert_eq!(partial.failed_records[0].index, 1);
    assert_eq!(partial.failed_records[0].reason, FailureReason::DuplicateKey);

    assert_eq!(db.statements_starting("INSERT").len(), 3);
    assert_eq!(db.statements_starting("COMMIT").len(), 1);
    assert_eq!(db.row_count(), 1);
}

// ==================== Update / Delete Tests ====================

#[tokio::test]
async fn test_update_requires_filter() {
    let db = MockDatabase::new();
    let err = mysql_executor()
        .execute_update(
            &ExecContext::new(),
            &db.connection(),
            &mysql_table(),
            &users(1),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingFilter { .. }));
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_delete_binds_filter_values() {
    let db = MockDatabase::new();
    db.with(|s| s.affected_on_change = 3);
    let filter = Filter::eq("id", 7i64);

    let result = mysql_executor()
        .execute_delete(&ExecContext::new(), &db.connection(), &mysql_table(), Some(&filter))
        .await
        .unwrap();

    assert_eq!(result.affected_rows, 3);
    assert_eq!(db.with(|s| s.last_params.clone()), vec![Value::Int64(7)]);
}

#[tokio::test]
async fn test_delete_with_empty_conjunction_runs_nothing() {
    let db = MockDatabase::new();
    let err = mysql_executor()
        .execute_delete(
            &ExecContext::new(),
            &db.connection(),
            &mysql_table(),
            Some(&Filter::And(vec![])),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingFilter { .. }));
    assert!(db.statements_starting("DELETE").is_empty());
}

// ==================== Preprocessing Tests ====================

fn oracle_table() -> TableDescriptor {
    TableDescriptor::new("events", "oracle", connection())
        .with_field(FieldAttribute::new("id", "bigint").primary_key())
        .with_field(FieldAttribute::new("created_on", "date"))
        .with_field(FieldAttribute::new("amount", "double"))
}

#[tokio::test]
async fn test_oracle_date_strings_become_to_date() {
    let db = MockDatabase::new();
    let executor = SqlExecutor::for_driver(Arc::new(OracleDriver::new()));
    let records = vec![record(&[
        ("id", Value::Int64(1)),
        ("created_on", Value::from("2024-01-15")),
    ])];

    let result = executor
        .execute_insert(&ExecContext::new(), &db.connection(), &oracle_table(), &records)
        .await
        .unwrap();

    assert!(result.success);
    let inserts = db.statements_starting("INSERT");
    assert_eq!(inserts.len(), 1);
    assert!(inserts[0].ends_with("(CREATED_ON, ID) VALUES (TO_DATE('2024-01-15', 'YYYY-MM-DD'), :1)"));
}

#[tokio::test]
async fn test_oracle_bulk_uses_insert_all() {
    let db = MockDatabase::new();
    let executor = SqlExecutor::for_driver(Arc::new(OracleDriver::new()));

    let result = executor
        .execute_insert(&ExecContext::new(), &db.connection(), &oracle_table(), &users(2))
        .await
        .unwrap();

    assert_eq!(result.success_count, 2);
    let inserts = db.statements_starting("INSERT ALL");
    assert_eq!(inserts.len(), 1);
    assert!(inserts[0].ends_with("SELECT 1 FROM DUAL"));
    assert_eq!(inserts[0].matches(" INTO ").count(), 2);
}

#[tokio::test]
async fn test_oracle_numbers_are_clamped() {
    let db = MockDatabase::new();
    let executor = SqlExecutor::for_driver(Arc::new(OracleDriver::new()));
    let records = vec![record(&[("amount", Value::Float64(1e40))])];

    executor
        .execute_insert(&ExecContext::new(), &db.connection(), &oracle_table(), &records)
        .await
        .unwrap();

    assert_eq!(
        db.with(|s| s.last_params.clone()),
        vec![Value::Float64(ORACLE_NUMBER_MAX)]
    );
}

#[tokio::test]
async fn test_postgres_strings_are_coerced() {
    let db = MockDatabase::new();
    let executor = SqlExecutor::for_driver(Arc::new(PostgresDriver::new()));
    let table = TableDescriptor::new("events", "postgres", connection())
        .with_field(FieldAttribute::new("created_on", "date"));
    let records = vec![record(&[("created_on", Value::from("2024-01-15"))])];

    executor
        .execute_insert(&ExecContext::new(), &db.connection(), &table, &records)
        .await
        .unwrap();

    assert_eq!(
        db.with(|s| s.last_params.clone()),
        vec![Value::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())]
    );
}
