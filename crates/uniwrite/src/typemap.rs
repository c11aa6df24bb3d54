//! Canonical to native column type mapping
//!
//! Each dialect owns a static [`TypeMap`]:
//! - a fixed table for types without a length (`int`, `date`, `json`, ...)
//! - length tiers for `varchar` and `char`, switching native type at documented thresholds
//! - a decimal rule with a default precision/scale and a maximum precision
//! - a wide-string fallback for unknown canonical types
//!
//! Keys are matched case-insensitively. The reverse direction, native to canonical,
//! is used by introspection.

use crate::model::FieldAttribute;

/// Native type template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    /// Rendered as-is
    Fixed(&'static str),
    /// Rendered as `NAME(n)`
    Sized(&'static str),
}

impl Native {
    fn render(&self, n: u32) -> String {
        match self {
            Self::Fixed(name) => (*name).to_string(),
            Self::Sized(name) => format!("{}({})", name, n),
        }
    }
}

/// A length tier; applies to lengths up to and including `max_length`
#[derive(Debug, Clone, Copy)]
pub struct LengthTier {
    /// Inclusive upper bound
    pub max_length: u32,
    /// Type used within the tier
    pub native: Native,
}

const fn tier(max_length: u32, native: Native) -> LengthTier {
    LengthTier { max_length, native }
}

/// Decimal mapping rule
#[derive(Debug, Clone, Copy)]
pub struct DecimalRule {
    /// Native decimal type name
    pub name: &'static str,
    /// Largest precision the native type accepts
    pub max_precision: u32,
    /// Precision used when none is declared
    pub default_precision: u32,
    /// Scale used when no precision is declared
    pub default_scale: u32,
    /// Type used when the declared precision exceeds `max_precision`
    pub overflow: &'static str,
}

/// Static canonical to native table for one dialect
#[derive(Debug)]
pub struct TypeMap {
    /// Fixed mappings, canonical key (lower-case) to native type
    pub fixed: &'static [(&'static str, &'static str)],
    /// Tiers for `varchar`/`string`, ascending
    pub varchar: &'static [LengthTier],
    /// Tiers for `char`, ascending
    pub char: &'static [LengthTier],
    /// Decimal rule
    pub decimal: DecimalRule,
    /// Length used when none is declared and for unknown types
    pub default_length: u32,
    /// Wide string type used for unknown canonical types
    pub fallback: Native,
    /// Native base type (upper-case) to canonical
    pub reverse: &'static [(&'static str, &'static str)],
}

impl TypeMap {
    /// Map a field attribute to its native column type
    pub fn map(&self, field: &FieldAttribute) -> String {
        let key = field.canonical_type();
        match key.as_str() {
            "varchar" | "string" | "nvarchar" | "varchar2" | "nvarchar2" => {
                self.sized(self.varchar, field.length)
            }
            "char" | "nchar" => self.sized(self.char, field.length),
            "decimal" | "numeric" | "number" => self.decimal(field.precision, field.scale),
            other => match self.fixed.iter().find(|(k, _)| *k == other) {
                Some((_, native)) => (*native).to_string(),
                None => self.fallback.render(self.default_length),
            },
        }
    }

    fn sized(&self, tiers: &[LengthTier], length: u32) -> String {
        let length = if length == 0 {
            self.default_length
        } else {
            length
        };
        tiers
            .iter()
            .find(|t| length <= t.max_length)
            .or_else(|| tiers.last())
            .map(|t| t.native.render(length))
            .unwrap_or_else(|| self.fallback.render(length))
    }

    fn decimal(&self, precision: u32, scale: u32) -> String {
        let rule = &self.decimal;
        if precision == 0 {
            return format!(
                "{}({},{})",
                rule.name, rule.default_precision, rule.default_scale
            );
        }
        if precision > rule.max_precision {
            return rule.overflow.to_string();
        }
        format!("{}({},{})", rule.name, precision, scale.min(precision))
    }

    /// Normalize a native type name back to its canonical name
    ///
    /// `precision`/`scale` refine unconstrained numeric types (Oracle `NUMBER`).
    pub fn canonical(&self, native: &str, precision: Option<u32>, scale: Option<u32>) -> String {
        let upper = native.trim().to_uppercase();
        if upper.contains("WITH TIME ZONE") || upper.contains("WITH LOCAL TIME ZONE") {
            return "timestamptz".to_string();
        }
        let base = upper
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        if base == "NUMBER" && scale == Some(0) {
            return match precision {
                Some(1) => "boolean",
                Some(p) if p <= 5 => "smallint",
                Some(p) if p <= 10 => "int",
                Some(p) if p <= 19 => "bigint",
                _ => "decimal",
            }
            .to_string();
        }

        self.reverse
            .iter()
            .find(|(n, _)| *n == base)
            .map(|(_, c)| (*c).to_string())
            .unwrap_or_else(|| base.to_lowercase())
    }
}

/// MySQL / MariaDB
pub static MYSQL: TypeMap = TypeMap {
    fixed: &[
        ("text", "TEXT"),
        ("longtext", "LONGTEXT"),
        ("int", "INT"),
        ("integer", "INT"),
        ("bigint", "BIGINT"),
        ("long", "BIGINT"),
        ("smallint", "SMALLINT"),
        ("tinyint", "TINYINT"),
        ("float", "FLOAT"),
        ("double", "DOUBLE"),
        ("real", "DOUBLE"),
        ("boolean", "TINYINT(1)"),
        ("bool", "TINYINT(1)"),
        ("date", "DATE"),
        ("time", "TIME"),
        ("datetime", "DATETIME"),
        ("timestamp", "DATETIME(6)"),
        ("timestamptz", "DATETIME(6)"),
        ("json", "JSON"),
        ("binary", "LONGBLOB"),
        ("blob", "BLOB"),
        ("bytes", "LONGBLOB"),
        ("uuid", "CHAR(36)"),
    ],
    varchar: &[
        tier(16383, Native::Sized("VARCHAR")),
        tier(65535, Native::Fixed("TEXT")),
        tier(16_777_215, Native::Fixed("MEDIUMTEXT")),
        tier(u32::MAX, Native::Fixed("LONGTEXT")),
    ],
    char: &[
        tier(255, Native::Sized("CHAR")),
        tier(16383, Native::Sized("VARCHAR")),
        tier(u32::MAX, Native::Fixed("TEXT")),
    ],
    decimal: DecimalRule {
        name: "DECIMAL",
        max_precision: 65,
        default_precision: 65,
        default_scale: 30,
        overflow: "DOUBLE",
    },
    default_length: 255,
    fallback: Native::Sized("VARCHAR"),
    reverse: &[
        ("VARCHAR", "varchar"),
        ("CHAR", "char"),
        ("TINYTEXT", "text"),
        ("TEXT", "text"),
        ("MEDIUMTEXT", "text"),
        ("LONGTEXT", "longtext"),
        ("TINYINT", "tinyint"),
        ("SMALLINT", "smallint"),
        ("MEDIUMINT", "int"),
        ("INT", "int"),
        ("INTEGER", "int"),
        ("BIGINT", "bigint"),
        ("FLOAT", "float"),
        ("DOUBLE", "double"),
        ("DECIMAL", "decimal"),
        ("NUMERIC", "decimal"),
        ("BIT", "boolean"),
        ("DATE", "date"),
        ("TIME", "time"),
        ("DATETIME", "datetime"),
        ("TIMESTAMP", "timestamp"),
        ("JSON", "json"),
        ("BLOB", "blob"),
        ("MEDIUMBLOB", "binary"),
        ("LONGBLOB", "binary"),
        ("VARBINARY", "binary"),
        ("BINARY", "binary"),
    ],
};

/// PostgreSQL
pub static POSTGRES: TypeMap = TypeMap {
    fixed: &[
        ("text", "TEXT"),
        ("longtext", "TEXT"),
        ("int", "INTEGER"),
        ("integer", "INTEGER"),
        ("bigint", "BIGINT"),
        ("long", "BIGINT"),
        ("smallint", "SMALLINT"),
        ("tinyint", "SMALLINT"),
        ("float", "REAL"),
        ("double", "DOUBLE PRECISION"),
        ("real", "REAL"),
        ("boolean", "BOOLEAN"),
        ("bool", "BOOLEAN"),
        ("date", "DATE"),
        ("time", "TIME"),
        ("datetime", "TIMESTAMP"),
        ("timestamp", "TIMESTAMP"),
        ("timestamptz", "TIMESTAMPTZ"),
        ("json", "JSONB"),
        ("binary", "BYTEA"),
        ("blob", "BYTEA"),
        ("bytes", "BYTEA"),
        ("uuid", "UUID"),
    ],
    varchar: &[
        tier(10_485_760, Native::Sized("VARCHAR")),
        tier(u32::MAX, Native::Fixed("TEXT")),
    ],
    char: &[
        tier(10_485_760, Native::Sized("CHAR")),
        tier(u32::MAX, Native::Fixed("TEXT")),
    ],
    decimal: DecimalRule {
        name: "NUMERIC",
        max_precision: 1000,
        default_precision: 38,
        default_scale: 10,
        overflow: "NUMERIC",
    },
    default_length: 255,
    fallback: Native::Sized("VARCHAR"),
    reverse: &[
        ("CHARACTER VARYING", "varchar"),
        ("VARCHAR", "varchar"),
        ("CHARACTER", "char"),
        ("BPCHAR", "char"),
        ("CHAR", "char"),
        ("TEXT", "text"),
        ("SMALLINT", "smallint"),
        ("INTEGER", "int"),
        ("BIGINT", "bigint"),
        ("REAL", "float"),
        ("DOUBLE PRECISION", "double"),
        ("NUMERIC", "decimal"),
        ("BOOLEAN", "boolean"),
        ("DATE", "date"),
        ("TIME WITHOUT TIME ZONE", "time"),
        ("TIMESTAMP WITHOUT TIME ZONE", "timestamp"),
        ("TIMESTAMP", "timestamp"),
        ("JSON", "json"),
        ("JSONB", "json"),
        ("BYTEA", "binary"),
        ("UUID", "uuid"),
    ],
};

/// Oracle
///
/// `VARCHAR2` holds at most 1999 declared characters here; from 2000 on the
/// column becomes a `CLOB`.
pub static ORACLE: TypeMap = TypeMap {
    fixed: &[
        ("text", "CLOB"),
        ("longtext", "CLOB"),
        ("int", "NUMBER(10)"),
        ("integer", "NUMBER(10)"),
        ("bigint", "NUMBER(19)"),
        ("long", "NUMBER(19)"),
        ("smallint", "NUMBER(5)"),
        ("tinyint", "NUMBER(3)"),
        ("float", "BINARY_FLOAT"),
        ("double", "BINARY_DOUBLE"),
        ("real", "BINARY_DOUBLE"),
        ("boolean", "NUMBER(1)"),
        ("bool", "NUMBER(1)"),
        ("date", "DATE"),
        ("time", "VARCHAR2(32)"),
        ("datetime", "TIMESTAMP(6)"),
        ("timestamp", "TIMESTAMP(6)"),
        ("timestamptz", "TIMESTAMP(6) WITH TIME ZONE"),
        ("json", "CLOB"),
        ("binary", "BLOB"),
        ("blob", "BLOB"),
        ("bytes", "BLOB"),
        ("uuid", "VARCHAR2(36)"),
    ],
    varchar: &[
        tier(1999, Native::Sized("VARCHAR2")),
        tier(u32::MAX, Native::Fixed("CLOB")),
    ],
    char: &[
        tier(1999, Native::Sized("CHAR")),
        tier(u32::MAX, Native::Fixed("CLOB")),
    ],
    decimal: DecimalRule {
        name: "NUMBER",
        max_precision: 38,
        default_precision: 38,
        default_scale: 10,
        overflow: "NUMBER",
    },
    default_length: 255,
    fallback: Native::Sized("VARCHAR2"),
    reverse: &[
        ("VARCHAR2", "varchar"),
        ("NVARCHAR2", "varchar"),
        ("CHAR", "char"),
        ("NCHAR", "char"),
        ("CLOB", "text"),
        ("NCLOB", "text"),
        ("LONG", "text"),
        ("NUMBER", "decimal"),
        ("FLOAT", "double"),
        ("BINARY_FLOAT", "float"),
        ("BINARY_DOUBLE", "double"),
        ("DATE", "date"),
        ("TIMESTAMP", "timestamp"),
        ("BLOB", "binary"),
        ("RAW", "binary"),
    ],
};

/// SQL Server
pub static SQLSERVER: TypeMap = TypeMap {
    fixed: &[
        ("text", "NVARCHAR(MAX)"),
        ("longtext", "NVARCHAR(MAX)"),
        ("int", "INT"),
        ("integer", "INT"),
        ("bigint", "BIGINT"),
        ("long", "BIGINT"),
        ("smallint", "SMALLINT"),
        ("tinyint", "TINYINT"),
        ("float", "REAL"),
        ("double", "FLOAT"),
        ("real", "REAL"),
        ("boolean", "BIT"),
        ("bool", "BIT"),
        ("date", "DATE"),
        ("time", "TIME"),
        ("datetime", "DATETIME2"),
        ("timestamp", "DATETIME2(6)"),
        ("timestamptz", "DATETIMEOFFSET"),
        ("json", "NVARCHAR(MAX)"),
        ("binary", "VARBINARY(MAX)"),
        ("blob", "VARBINARY(MAX)"),
        ("bytes", "VARBINARY(MAX)"),
        ("uuid", "UNIQUEIDENTIFIER"),
    ],
    varchar: &[
        tier(4000, Native::Sized("NVARCHAR")),
        tier(u32::MAX, Native::Fixed("NVARCHAR(MAX)")),
    ],
    char: &[
        tier(4000, Native::Sized("NCHAR")),
        tier(u32::MAX, Native::Fixed("NVARCHAR(MAX)")),
    ],
    decimal: DecimalRule {
        name: "DECIMAL",
        max_precision: 38,
        default_precision: 38,
        default_scale: 10,
        overflow: "FLOAT",
    },
    default_length: 255,
    fallback: Native::Sized("NVARCHAR"),
    reverse: &[
        ("VARCHAR", "varchar"),
        ("NVARCHAR", "varchar"),
        ("CHAR", "char"),
        ("NCHAR", "char"),
        ("TEXT", "text"),
        ("NTEXT", "text"),
        ("TINYINT", "tinyint"),
        ("SMALLINT", "smallint"),
        ("INT", "int"),
        ("BIGINT", "bigint"),
        ("REAL", "float"),
        ("FLOAT", "double"),
        ("DECIMAL", "decimal"),
        ("NUMERIC", "decimal"),
        ("MONEY", "decimal"),
        ("BIT", "boolean"),
        ("DATE", "date"),
        ("TIME", "time"),
        ("DATETIME", "datetime"),
        ("DATETIME2", "datetime"),
        ("SMALLDATETIME", "datetime"),
        ("DATETIMEOFFSET", "timestamptz"),
        ("VARBINARY", "binary"),
        ("BINARY", "binary"),
        ("IMAGE", "binary"),
        ("UNIQUEIDENTIFIER", "uuid"),
    ],
};
