//! Failure taxonomy and native error classification
//!
//! Native database errors are mapped to a fixed set of [`FailureReason`] codes by an
//! [`ErrorClassifier`]: an ordered list of `(predicate, reason)` rules evaluated
//! against the lower-cased native error text. The first matching rule wins, so
//! rule order encodes precedence.
//!
//! Each dialect ships its own rule table (`ErrorClassifier::mysql()`, `::oracle()`, ...).
//! Tables are plain data and can be extended with [`ErrorClassifier::with_rule`]
//! or [`ErrorClassifier::prepend`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// Stable reason code attached to a failed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Unique or primary key violation
    DuplicateKey,
    /// Referenced row missing, or row still referenced
    ForeignKeyConstraint,
    /// NULL written into a NOT NULL column
    NullConstraint,
    /// Value longer or larger than the column allows
    DataTooLong,
    /// Column does not exist
    FieldNotExist,
    /// Value cannot be converted to the column type
    DataTypeMismatch,
    /// Statement or lock timed out
    Timeout,
    /// Connection dropped or refused
    ConnectionError,
    /// Could not open the per-record transaction
    TransactionStartFailed,
    /// Could not commit the per-record transaction
    TransactionCommitFailed,
    /// Bulk statement reported fewer rows than supplied (aggregate only)
    PartialBatchFailure,
    /// Nothing matched
    UnknownError,
}

impl FailureReason {
    /// Reason code as emitted in results
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateKey => "duplicate_key",
            Self::ForeignKeyConstraint => "foreign_key_constraint",
            Self::NullConstraint => "null_constraint",
            Self::DataTooLong => "data_too_long",
            Self::FieldNotExist => "field_not_exist",
            Self::DataTypeMismatch => "data_type_mismatch",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::TransactionStartFailed => "transaction_start_failed",
            Self::TransactionCommitFailed => "transaction_commit_failed",
            Self::PartialBatchFailure => "partial_batch_failure",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Predicate over lower-cased native error text
#[derive(Clone)]
pub enum Predicate {
    /// Text contains the substring
    Contains(String),
    /// Text contains every substring
    ContainsAll(Vec<String>),
    /// Arbitrary test
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Predicate {
    /// Substring predicate (case-insensitive)
    pub fn contains(pattern: &str) -> Self {
        Self::Contains(pattern.to_lowercase())
    }

    /// Conjunction of substrings (case-insensitive)
    pub fn contains_all(patterns: &[&str]) -> Self {
        Self::ContainsAll(patterns.iter().map(|p| p.to_lowercase()).collect())
    }

    /// Evaluate against already lower-cased text
    pub fn matches(&self, lowered: &str) -> bool {
        match self {
            Self::Contains(p) => lowered.contains(p.as_str()),
            Self::ContainsAll(ps) => ps.iter().all(|p| lowered.contains(p.as_str())),
            Self::Custom(f) => f(lowered),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains(p) => f.debug_tuple("Contains").field(p).finish(),
            Self::ContainsAll(ps) => f.debug_tuple("ContainsAll").field(ps).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One classification rule
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    /// Match condition
    pub predicate: Predicate,
    /// Reason assigned on match
    pub reason: FailureReason,
}

/// Ordered rule table; first match wins
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl ErrorClassifier {
    /// Empty classifier; everything is `unknown_error`
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one rule
    pub fn with_rule(mut self, predicate: Predicate, reason: FailureReason) -> Self {
        self.rules.push(ClassifierRule { predicate, reason });
        self
    }

    /// Append one substring rule per pattern, all mapping to `reason`
    pub fn with_patterns(mut self, reason: FailureReason, patterns: &[&str]) -> Self {
        for p in patterns {
            self.rules.push(ClassifierRule {
                predicate: Predicate::contains(p),
                reason,
            });
        }
        self
    }

    /// Insert a rule ahead of all existing rules
    pub fn prepend(mut self, predicate: Predicate, reason: FailureReason) -> Self {
        self.rules.insert(0, ClassifierRule { predicate, reason });
        self
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Classify native error text
    pub fn classify(&self, message: &str) -> FailureReason {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.predicate.matches(&lowered))
            .map(|r| r.reason)
            .unwrap_or(FailureReason::UnknownError)
    }

    /// Classify a crate error; interruptions and pool failures are decided by variant
    pub fn classify_error(&self, error: &Error) -> FailureReason {
        match error {
            Error::Timeout { .. } => FailureReason::Timeout,
            Error::ConnectionFailed { .. } | Error::PoolExhausted { .. } => {
                FailureReason::ConnectionError
            }
            other => self.classify(&other.native_message()),
        }
    }

    /// MySQL / MariaDB rules
    pub fn mysql() -> Self {
        Self::new()
            .with_patterns(FailureReason::DuplicateKey, &["duplicate entry", "error 1062"])
            .with_patterns(
                FailureReason::ForeignKeyConstraint,
                &["foreign key constraint fails", "error 1451", "error 1452"],
            )
            .with_patterns(
                FailureReason::NullConstraint,
                &[
                    "cannot be null",
                    "doesn't have a default value",
                    "error 1048",
                    "error 1364",
                ],
            )
            .with_patterns(FailureReason::DataTooLong, &["data too long", "error 1406"])
            .with_patterns(FailureReason::FieldNotExist, &["unknown column", "error 1054"])
            .with_patterns(
                FailureReason::DataTypeMismatch,
                &[
                    "incorrect integer value",
                    "incorrect decimal value",
                    "incorrect double value",
                    "incorrect date value",
                    "incorrect datetime value",
                    "incorrect string value",
                    "truncated incorrect",
                    "out of range value",
                    "error 1264",
                    "error 1292",
                    "error 1366",
                ],
            )
            .with_patterns(
                FailureReason::Timeout,
                &["lock wait timeout", "error 1205", "timed out", "timeout"],
            )
            .with_patterns(
                FailureReason::ConnectionError,
                &[
                    "server has gone away",
                    "lost connection",
                    "connection refused",
                    "connection reset",
                    "broken pipe",
                    "error 2006",
                    "error 2013",
                ],
            )
    }

    /// PostgreSQL rules (SQLSTATE codes are appended to driver messages)
    pub fn postgres() -> Self {
        Self::new()
            .with_patterns(
                FailureReason::DuplicateKey,
                &["duplicate key value", "sqlstate 23505"],
            )
            .with_patterns(
                FailureReason::ForeignKeyConstraint,
                &["violates foreign key constraint", "sqlstate 23503"],
            )
            .with_patterns(
                FailureReason::NullConstraint,
                &["violates not-null constraint", "null value in column", "sqlstate 23502"],
            )
            .with_patterns(
                FailureReason::DataTooLong,
                &["value too long", "sqlstate 22001"],
            )
            .with_rule(
                Predicate::contains_all(&["column", "does not exist"]),
                FailureReason::FieldNotExist,
            )
            .with_patterns(FailureReason::FieldNotExist, &["sqlstate 42703"])
            .with_patterns(
                FailureReason::DataTypeMismatch,
                &[
                    "invalid input syntax",
                    "is of type",
                    "out of range",
                    "error serializing parameter",
                    "sqlstate 22p02",
                    "sqlstate 42804",
                    "sqlstate 22003",
                    "sqlstate 22007",
                    "sqlstate 22008",
                ],
            )
            .with_patterns(
                FailureReason::Timeout,
                &["statement timeout", "sqlstate 57014", "timed out", "timeout"],
            )
            .with_patterns(
                FailureReason::ConnectionError,
                &[
                    "connection refused",
                    "connection reset",
                    "connection closed",
                    "broken pipe",
                    "sqlstate 08000",
                    "sqlstate 08003",
                    "sqlstate 08006",
                ],
            )
    }

    /// Oracle rules
    pub fn oracle() -> Self {
        Self::new()
            .with_patterns(
                FailureReason::DuplicateKey,
                &["ora-00001", "unique constraint"],
            )
            .with_patterns(
                FailureReason::ForeignKeyConstraint,
                &["ora-02291", "ora-02292", "integrity constraint"],
            )
            .with_patterns(
                FailureReason::NullConstraint,
                &["ora-01400", "ora-01407", "cannot insert null", "cannot update"],
            )
            .with_patterns(
                FailureReason::DataTooLong,
                &["ora-12899", "ora-01438", "value too large"],
            )
            .with_patterns(
                FailureReason::FieldNotExist,
                &["ora-00904", "invalid identifier"],
            )
            .with_patterns(
                FailureReason::DataTypeMismatch,
                &[
                    "ora-01722",
                    "ora-01830",
                    "ora-01843",
                    "ora-01847",
                    "ora-01858",
                    "ora-01861",
                    "ora-00932",
                    "invalid number",
                    "inconsistent datatypes",
                ],
            )
            .with_patterns(
                FailureReason::Timeout,
                &["ora-01013", "ora-12170", "ora-00060", "timed out", "timeout"],
            )
            .with_patterns(
                FailureReason::ConnectionError,
                &[
                    "ora-03113",
                    "ora-03114",
                    "ora-03135",
                    "ora-12514",
                    "ora-12541",
                    "not connected",
                ],
            )
    }

    /// SQL Server rules (tiberius reports `code: N` in messages)
    pub fn sqlserver() -> Self {
        Self::new()
            .with_patterns(
                FailureReason::DuplicateKey,
                &[
                    "violation of primary key",
                    "violation of unique key",
                    "cannot insert duplicate key",
                    "code: 2627",
                    "code: 2601",
                ],
            )
            .with_patterns(
                FailureReason::ForeignKeyConstraint,
                &["foreign key constraint", "code: 547"],
            )
            .with_patterns(
                FailureReason::NullConstraint,
                &["cannot insert the value null", "code: 515"],
            )
            .with_patterns(
                FailureReason::DataTooLong,
                &[
                    "would be truncated",
                    "string or binary data",
                    "code: 8152",
                    "code: 2628",
                ],
            )
            .with_patterns(
                FailureReason::FieldNotExist,
                &["invalid column name", "code: 207"],
            )
            .with_patterns(
                FailureReason::DataTypeMismatch,
                &[
                    "conversion failed",
                    "error converting",
                    "arithmetic overflow",
                    "code: 241",
                    "code: 245",
                    "code: 8114",
                ],
            )
            .with_patterns(
                FailureReason::Timeout,
                &["lock request time out", "code: 1222", "timed out", "timeout"],
            )
            .with_patterns(
                FailureReason::ConnectionError,
                &[
                    "connection refused",
                    "connection reset",
                    "connection closed",
                    "broken pipe",
                    "failed to connect",
                ],
            )
    }

    /// Dialect-neutral rules for dialects without their own table
    pub fn generic() -> Self {
        Self::new()
            .with_patterns(
                FailureReason::DuplicateKey,
                &["duplicate", "unique constraint", "unique key"],
            )
            .with_patterns(FailureReason::ForeignKeyConstraint, &["foreign key"])
            .with_patterns(FailureReason::NullConstraint, &["not null", "cannot be null"])
            .with_patterns(FailureReason::DataTooLong, &["too long", "too large"])
            .with_rule(
                Predicate::contains_all(&["column", "not exist"]),
                FailureReason::FieldNotExist,
            )
            .with_patterns(
                FailureReason::DataTypeMismatch,
                &["invalid input", "conversion", "type mismatch"],
            )
            .with_patterns(FailureReason::Timeout, &["timed out", "timeout"])
            .with_patterns(FailureReason::ConnectionError, &["connection"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_snake_case() {
        assert_eq!(FailureReason::DuplicateKey.code(), "duplicate_key");
        assert_eq!(
            FailureReason::TransactionCommitFailed.to_string(),
            "transaction_commit_failed"
        );
        let json = serde_json::to_string(&FailureReason::PartialBatchFailure).unwrap();
        assert_eq!(json, "\"partial_batch_failure\"");
    }

    #[test]
    fn test_mysql_classification() {
        let c = ErrorClassifier::mysql();
        assert_eq!(
            c.classify("ERROR 1062 (23000): Duplicate entry '1' for key 'PRIMARY'"),
            FailureReason::DuplicateKey
        );
        assert_eq!(
            c.classify("Column 'name' cannot be null"),
            FailureReason::NullConstraint
        );
        assert_eq!(
            c.classify("Data too long for column 'name' at row 1"),
            FailureReason::DataTooLong
        );
        assert_eq!(
            c.classify("Unknown column 'nope' in 'field list'"),
            FailureReason::FieldNotExist
        );
        assert_eq!(c.classify("something odd"), FailureReason::UnknownError);
    }

    #[test]
    fn test_oracle_classification_by_code() {
        let c = ErrorClassifier::oracle();
        assert_eq!(
            c.classify("ORA-00001: unique constraint (APP.PK_T) violated"),
            FailureReason::DuplicateKey
        );
        assert_eq!(
            c.classify("ORA-12899: value too large for column"),
            FailureReason::DataTooLong
        );
        assert_eq!(
            c.classify("ORA-01722: invalid number"),
            FailureReason::DataTypeMismatch
        );
    }

    #[test]
    fn test_postgres_field_not_exist_needs_both_words() {
        let c = ErrorClassifier::postgres();
        assert_eq!(
            c.classify("column \"nope\" of relation \"t\" does not exist"),
            FailureReason::FieldNotExist
        );
        assert_eq!(
            c.classify("relation \"t\" does not exist"),
            FailureReason::UnknownError
        );
    }

    #[test]
    fn test_first_match_wins() {
        // "duplicate" rule precedes the timeout rule
        let c = ErrorClassifier::generic();
        assert_eq!(
            c.classify("duplicate row after timeout"),
            FailureReason::DuplicateKey
        );

        let c = c.prepend(Predicate::contains("TIMEOUT"), FailureReason::Timeout);
        assert_eq!(
            c.classify("duplicate row after timeout"),
            FailureReason::Timeout
        );
    }

    #[test]
    fn test_custom_predicate() {
        let c = ErrorClassifier::new().with_rule(
            Predicate::Custom(Arc::new(|m| m.starts_with("e42"))),
            FailureReason::DataTypeMismatch,
        );
        assert_eq!(c.classify("E42: bad"), FailureReason::DataTypeMismatch);
        assert_eq!(c.classify("x E42"), FailureReason::UnknownError);
    }

    #[test]
    fn test_classify_error_by_variant() {
        let c = ErrorClassifier::mysql();
        assert_eq!(
            c.classify_error(&Error::timeout("deadline exceeded")),
            FailureReason::Timeout
        );
        assert_eq!(
            c.classify_error(&Error::connection("refused")),
            FailureReason::ConnectionError
        );
        assert_eq!(
            c.classify_error(&Error::query("Duplicate entry '2' for key 'PRIMARY'")),
            FailureReason::DuplicateKey
        );
    }
}
