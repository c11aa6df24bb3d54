//! End-to-end tests for UniversalWriter over an in-memory connection

mod common;

use common::{mysql_table, record, users, MockDatabase};
use std::sync::Arc;
use std::time::Duration;
use uniwrite::driver::mysql::MySqlDriver;
use uniwrite::prelude::*;

fn writer_for(db: &MockDatabase, config: WriterConfig) -> UniversalWriter {
    let driver: Arc<dyn DatabaseDriver> = Arc::new(MySqlDriver::with_factory(db.factory()));
    let executor = SqlExecutor::for_driver(driver.clone())
        .with_default_batch_size(config.default_batch_size)
        .with_min_batch_threshold(config.min_batch_threshold);
    let mut registry = DriverRegistry::new();
    registry.register_aliases(&["mysql", "mariadb"], driver, Arc::new(executor));
    UniversalWriter::with_registry(Arc::new(registry), config).unwrap()
}

fn writer(db: &MockDatabase) -> UniversalWriter {
    writer_for(db, WriterConfig::default())
}

// ==================== Insert Tests ====================

#[tokio::test]
async fn test_bulk_insert_into_new_table() {
    let db = MockDatabase::new();
    let result = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(3), None, "insert")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.operation, Operation::Insert);
    assert_eq!(result.table, "users");
    assert_eq!(result.before_count, Some(0));
    assert_eq!(result.after_count, Some(3));
    assert_eq!(result.success_count, 3);
    assert_eq!(result.failed_count, 0);
    assert_eq!(result.total_processed, 3);
    assert!(result.failed_records.is_empty());

    let inserts = db.statements_starting("INSERT");
    assert_eq!(
        inserts,
        vec!["INSERT INTO users (id, name) VALUES (?, ?), (?, ?), (?, ?)".to_string()]
    );
    assert_eq!(db.with(|s| s.creates), 1);
}

#[tokio::test]
async fn test_append_is_insert() {
    let db = MockDatabase::new();
    let result = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(2), None, "APPEND")
        .await
        .unwrap();
    assert_eq!(result.operation, Operation::Insert);
    assert_eq!(result.success_count, 2);
}

#[tokio::test]
async fn test_batch_size_one_reports_duplicate() {
    let db = MockDatabase::new();
    let table = mysql_table().with_batch_size(1);
    let records = vec![
        record(&[("id", Value::Int64(1)), ("name", Value::from("a"))]),
        record(&[("id", Value::Int64(1)), ("name", Value::from("b"))]),
    ];

    let result = writer(&db)
        .execute(&ExecContext::new(), &table, &records, None, "insert")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.success_count, 1);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.before_count, Some(0));
    assert_eq!(result.after_count, Some(1));
    assert_eq!(result.reason_count(FailureReason::DuplicateKey), 1);

    let failed = &result.failed_records[0];
    assert_eq!(failed.index, 1);
    assert_eq!(failed.reason, FailureReason::DuplicateKey);
    assert_eq!(failed.record, records[1]);
    assert!(failed.error.contains("Duplicate entry '1'"));

    // individual mode never issues a multi-row statement
    assert!(db
        .statements_starting("INSERT")
        .iter()
        .all(|sql| !sql.contains("), (")));
}

#[tokio::test]
async fn test_bulk_failure_falls_back_to_individual_inserts() {
    let db = MockDatabase::new();
    db.insert_committed("2");

    let result = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(3), None, "insert")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.before_count, Some(1));
    assert_eq!(result.after_count, Some(3));
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.failed_records.len(), 1);
    assert_eq!(result.failed_records[0].index, 1);
    assert_eq!(result.failed_records[0].reason, FailureReason::DuplicateKey);

    let log = db.statements();
    assert!(log.contains(&"ROLLBACK".to_string()));
    // one bulk attempt, then one statement per record
    assert_eq!(db.statements_starting("INSERT").len(), 4);
}

#[tokio::test]
async fn test_rejected_bulk_recovers_every_record() {
    let db = MockDatabase::new();
    db.with(|s| s.fail_bulk = true);

    let result = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(5), None, "insert")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.success_count, 5);
    assert_eq!(result.after_count, Some(5));
    assert_eq!(db.row_count(), 5);
}

#[tokio::test]
async fn test_bulk_shortfall_is_aggregate() {
    let db = MockDatabase::new();
    db.with(|s| s.bulk_shortfall = 1);

    let result = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(3), None, "insert")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.reason_count(FailureReason::PartialBatchFailure), 1);
    assert!(result.failed_records.is_empty());
}

#[tokio::test]
async fn test_single_record_uses_individual_mode() {
    let db = MockDatabase::new();
    let result = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(1), None, "insert")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.success_count, 1);
    assert_eq!(
        db.statements_starting("INSERT"),
        vec!["INSERT INTO users (id, name) VALUES (?, ?)".to_string()]
    );
}

#[tokio::test]
async fn test_empty_insert_is_successful() {
    let db = MockDatabase::new();
    let result = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &[], None, "insert")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.total_processed, 0);
    assert!(db.statements_starting("INSERT").is_empty());
}

// ==================== Table Creation Tests ====================

#[tokio::test]
async fn test_create_table_is_idempotent() {
    let db = MockDatabase::new();
    let w = writer(&db);
    let ctx = ExecContext::new();

    w.execute(&ctx, &mysql_table(), &users(2), None, "insert")
        .await
        .unwrap();
    let result = w
        .execute(&ctx, &mysql_table(), &[], None, "insert")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(db.with(|s| s.creates), 1);
    assert_eq!(result.after_count, Some(2));
}

#[tokio::test]
async fn test_known_table_skips_creation() {
    let db = MockDatabase::new();
    let table = mysql_table().with_table_exists(true);

    writer(&db)
        .execute(&ExecContext::new(), &table, &users(2), None, "insert")
        .await
        .unwrap();

    assert_eq!(db.with(|s| s.creates), 0);
    assert!(db
        .statements()
        .iter()
        .all(|sql| !sql.contains("information_schema")));
}

#[tokio::test]
async fn test_centralized_strategies_skip_existence_probe() {
    let db = MockDatabase::new();
    let config = WriterConfig::default()
        .with_connection_strategy(Strategy::Centralized)
        .with_table_creation_strategy(Strategy::Centralized);

    let result = writer_for(&db, config)
        .execute(&ExecContext::new(), &mysql_table(), &users(2), None, "insert")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(
        db.statements_starting("CREATE TABLE"),
        vec![
            "CREATE TABLE IF NOT EXISTS users (id BIGINT NOT NULL, name VARCHAR(64), PRIMARY KEY (id)) \
             ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
                .to_string()
        ]
    );
    assert!(db
        .statements()
        .iter()
        .all(|sql| !sql.contains("information_schema")));
}

// ==================== Update / Delete Tests ====================

#[tokio::test]
async fn test_update_without_filter_runs_nothing() {
    let db = MockDatabase::new();
    let err = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(1), None, "update")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingFilter { .. }));
    assert!(db.statements().is_empty());
    assert_eq!(db.with(|s| s.connects), 0);
}

#[tokio::test]
async fn test_delete_without_filter_runs_nothing() {
    let db = MockDatabase::new();
    let err = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &[], None, "DELETE")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingFilter { .. }));
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_update_without_values_is_rejected() {
    let db = MockDatabase::new();
    let filter = Filter::eq("id", 1i64);
    let err = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &[], Some(&filter), "update")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingRecords { .. }));
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_update_applies_first_record() {
    let db = MockDatabase::new();
    db.with(|s| s.affected_on_change = 2);
    let filter = Filter::gt("id", 10i64);
    let records = vec![
        record(&[("name", Value::from("renamed"))]),
        record(&[("name", Value::from("ignored"))]),
    ];

    let result = writer(&db)
        .execute(
            &ExecContext::new(),
            &mysql_table().with_table_exists(true),
            &records,
            Some(&filter),
            "update",
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.operation, Operation::Update);
    assert_eq!(result.affected_rows, 2);
    assert_eq!(result.success_count, 2);

    let updates = db.statements_starting("UPDATE");
    assert_eq!(updates.len(), 1);
    assert!(updates[0].starts_with("UPDATE users SET name = ? WHERE"));
}

#[tokio::test]
async fn test_delete_reports_affected_rows() {
    let db = MockDatabase::new();
    db.with(|s| s.affected_on_change = 4);
    let filter = Filter::eq("name", "gone");

    let result = writer(&db)
        .execute(
            &ExecContext::new(),
            &mysql_table().with_table_exists(true),
            &[],
            Some(&filter),
            "delete",
        )
        .await
        .unwrap();

    assert_eq!(result.operation, Operation::Delete);
    assert_eq!(result.affected_rows, 4);
    assert_eq!(db.statements_starting("DELETE FROM users WHERE").len(), 1);
}

// ==================== Validation Tests ====================

#[tokio::test]
async fn test_unknown_dialect() {
    let db = MockDatabase::new();
    let table = TableDescriptor::new(
        "users",
        "db2",
        ConnectionDescriptor::new("h", 50000, "u", "p", "d"),
    );
    let err = writer(&db)
        .execute(&ExecContext::new(), &table, &users(1), None, "insert")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedDialect { .. }));
    assert_eq!(db.with(|s| s.connects), 0);
}

#[tokio::test]
async fn test_dialect_lookup_is_case_insensitive() {
    let db = MockDatabase::new();
    let mut table = mysql_table();
    table.dialect = "MariaDB".into();

    let result = writer(&db)
        .execute(&ExecContext::new(), &table, &users(2), None, "insert")
        .await
        .unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn test_unknown_operation() {
    let db = MockDatabase::new();
    let err = writer(&db)
        .execute(&ExecContext::new(), &mysql_table(), &users(1), None, "merge")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation { .. }));
}

#[tokio::test]
async fn test_incomplete_connection_is_rejected() {
    let db = MockDatabase::new();
    let table = TableDescriptor::new(
        "users",
        "mysql",
        ConnectionDescriptor::new("", 3306, "root", "secret", "app"),
    );
    let err = writer(&db)
        .execute(&ExecContext::new(), &table, &users(1), None, "insert")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert_eq!(db.with(|s| s.connects), 0);
}

#[tokio::test]
async fn test_cancelled_context_aborts() {
    let db = MockDatabase::new();
    let ctx = ExecContext::new();
    ctx.cancel();

    let err = writer(&db)
        .execute(&ctx, &mysql_table(), &users(3), None, "insert")
        .await
        .unwrap_err();

    assert!(err.is_interrupted());
    assert!(db.statements_starting("INSERT").is_empty());
}

// ==================== Pooling Tests ====================

#[tokio::test]
async fn test_connections_are_reused() {
    let db = MockDatabase::new();
    let w = writer(&db);
    let ctx = ExecContext::new();

    for _ in 0..3 {
        w.execute(&ctx, &mysql_table().with_table_exists(true), &users(1), None, "insert")
            .await
            .unwrap();
        db.with(|s| s.rows.clear());
        // connections go back to the pool on a spawned task
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(db.with(|s| s.connects), 1);
    w.close().await.unwrap();
}

#[tokio::test]
async fn test_interrupted_connection_is_not_reused() {
    let db = MockDatabase::new();
    let w = writer(&db);
    let table = mysql_table().with_table_exists(true);

    let ctx = ExecContext::new();
    db.with(|s| s.cancel_after_inserts = Some((1, ctx.clone())));
    let err = w
        .execute(&ctx, &table, &users(1), None, "insert")
        .await
        .unwrap_err();
    assert!(err.is_interrupted());
    tokio::time::sleep(Duration::from_millis(20)).await;

    w.execute(&ExecContext::new(), &table, &users(1), None, "insert")
        .await
        .unwrap();

    assert_eq!(db.with(|s| s.connects), 2);
    assert_eq!(db.row_count(), 1);
}

// ==================== Introspection Tests ====================

fn column_row(name: &str, data_type: &str, nullable: &str, ordinal: i64, pk: Option<i64>) -> Row {
    Row::new(
        vec![
            "column_name".into(),
            "data_type".into(),
            "nullable".into(),
            "ordinal_position".into(),
            "max_length".into(),
            "pk_ordinal".into(),
        ],
        vec![
            Value::from(name),
            Value::from(data_type),
            Value::from(nullable),
            Value::Int64(ordinal),
            Value::Null,
            pk.map(Value::Int64).unwrap_or(Value::Null),
        ],
    )
}

#[tokio::test]
async fn test_describe_table_maps_canonical_types() {
    let db = MockDatabase::new();
    db.with(|s| {
        s.catalog = vec![
            column_row("id", "bigint", "NO", 1, Some(1)),
            column_row("name", "varchar", "YES", 2, None),
        ]
    });

    let metadata = writer(&db)
        .describe_table(&ExecContext::new(), &mysql_table())
        .await
        .unwrap();

    assert_eq!(metadata.name, "users");
    assert_eq!(metadata.columns.len(), 2);

    let id = &metadata.columns[0];
    assert_eq!(id.type_name, "bigint");
    assert!(!id.nullable);
    assert!(id.is_primary_key());

    let name = &metadata.columns[1];
    assert_eq!(name.type_name, "varchar");
    assert_eq!(name.native_type, "varchar");
    assert!(name.nullable);
    assert_eq!(name.max_length, None);
}
