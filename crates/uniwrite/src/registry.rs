//! Dialect registry
//!
//! Maps dialect names (and their aliases) to a driver/executor pair. Lookups
//! are case-insensitive. A registry is built once at startup and handed to the
//! [`UniversalWriter`](crate::writer::UniversalWriter); there is no global
//! instance.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use uniwrite::driver::mysql::MySqlDriver;
//! use uniwrite::executor::SqlExecutor;
//! use uniwrite::registry::DriverRegistry;
//!
//! let mut registry = DriverRegistry::new();
//! let driver = Arc::new(MySqlDriver::new());
//! let executor = Arc::new(SqlExecutor::for_driver(driver.clone()));
//! registry.register_aliases(&["mysql", "mariadb"], driver, executor);
//!
//! assert!(registry.resolve_driver("MariaDB").is_some());
//! assert!(registry.resolve_executor("db2").is_none());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::mysql::MySqlDriver;
use crate::driver::oracle::OracleDriver;
use crate::driver::postgres::PostgresDriver;
use crate::driver::sqlserver::SqlServerDriver;
use crate::driver::DatabaseDriver;
use crate::executor::{
    DatabaseExecutor, SqlExecutor, DEFAULT_BATCH_SIZE, DEFAULT_MIN_BATCH_THRESHOLD,
};

const MYSQL_ALIASES: &[&str] = &["mysql", "mariadb", "maria"];
const POSTGRES_ALIASES: &[&str] = &["postgres", "postgresql", "pg"];
const ORACLE_ALIASES: &[&str] = &["oracle"];
const SQLSERVER_ALIASES: &[&str] = &["sqlserver", "mssql"];

/// Dialect name to driver/executor lookup
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
    executors: HashMap<String, Arc<dyn DatabaseExecutor>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in dialects and default batch settings
    pub fn builtin() -> Self {
        Self::builtin_with(DEFAULT_BATCH_SIZE, DEFAULT_MIN_BATCH_THRESHOLD)
    }

    /// Registry with the four built-in dialects and the given batch settings
    pub fn builtin_with(default_batch_size: usize, min_batch_threshold: usize) -> Self {
        let mut registry = Self::new();
        let drivers: [(&[&str], Arc<dyn DatabaseDriver>); 4] = [
            (MYSQL_ALIASES, Arc::new(MySqlDriver::new())),
            (POSTGRES_ALIASES, Arc::new(PostgresDriver::new())),
            (ORACLE_ALIASES, Arc::new(OracleDriver::new())),
            (SQLSERVER_ALIASES, Arc::new(SqlServerDriver::new())),
        ];
        for (aliases, driver) in drivers {
            let executor = SqlExecutor::for_driver(driver.clone())
                .with_default_batch_size(default_batch_size)
                .with_min_batch_threshold(min_batch_threshold);
            registry.register_aliases(aliases, driver, Arc::new(executor));
        }
        registry
    }

    /// Insert or replace the pair registered under `name`
    pub fn register(
        &mut self,
        name: &str,
        driver: Arc<dyn DatabaseDriver>,
        executor: Arc<dyn DatabaseExecutor>,
    ) {
        let key = name.trim().to_lowercase();
        self.drivers.insert(key.clone(), driver);
        self.executors.insert(key, executor);
    }

    /// Register one pair under several names
    pub fn register_aliases(
        &mut self,
        names: &[&str],
        driver: Arc<dyn DatabaseDriver>,
        executor: Arc<dyn DatabaseExecutor>,
    ) {
        for name in names {
            self.register(name, driver.clone(), executor.clone());
        }
    }

    /// Driver registered under `name`
    pub fn resolve_driver(&self, name: &str) -> Option<Arc<dyn DatabaseDriver>> {
        self.drivers.get(&name.trim().to_lowercase()).cloned()
    }

    /// Executor registered under `name`
    pub fn resolve_executor(&self, name: &str) -> Option<Arc<dyn DatabaseExecutor>> {
        self.executors.get(&name.trim().to_lowercase()).cloned()
    }

    /// Registered names, sorted
    pub fn supported_dialects(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` resolves to a driver
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(&name.trim().to_lowercase())
    }

    /// Number of registered names
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("dialects", &self.supported_dialects())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_aliases_share_one_driver() {
        let registry = DriverRegistry::builtin();
        let a = registry.resolve_driver("mysql").unwrap();
        let b = registry.resolve_driver("Maria").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.resolve_driver("PG").unwrap().name(), "postgres");
        assert_eq!(registry.resolve_driver("mssql").unwrap().name(), "sqlserver");
    }

    #[test]
    fn test_supported_dialects_sorted() {
        let registry = DriverRegistry::builtin();
        assert_eq!(
            registry.supported_dialects(),
            vec![
                "maria", "mariadb", "mssql", "mysql", "oracle", "pg", "postgres", "postgresql",
                "sqlserver"
            ]
        );
    }

    #[test]
    fn test_register_is_an_upsert() {
        let mut registry = DriverRegistry::new();
        let pg: Arc<dyn DatabaseDriver> = Arc::new(PostgresDriver::new());
        let ora: Arc<dyn DatabaseDriver> = Arc::new(OracleDriver::new());
        registry.register("x", pg.clone(), Arc::new(SqlExecutor::for_driver(pg)));
        registry.register("X", ora.clone(), Arc::new(SqlExecutor::for_driver(ora)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve_driver("x").unwrap().name(), "oracle");
    }
}
