//! Connection pooling for uniwrite
//!
//! - [`SimpleConnectionPool`]: semaphore-bounded pool (max open), LIFO idle
//!   stack capped at max idle, lifetime and idle recycling, validation on borrow
//! - [`PooledConnection`]: a borrowed connection that returns itself on drop
//! - [`PoolManager`]: one pool per (dialect, DSN), shared across `execute` calls
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("postgres://localhost/db").with_max_open(10),
//!     Arc::new(PgConnectionFactory),
//! );
//!
//! let conn = pool.get().await?;
//! conn.execute("SELECT 1", &[]).await?;
//! // Connection is returned to pool when dropped
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

use crate::config::PoolSettings;
use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// A connection borrowed from the pool
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    pool: Weak<SimpleConnectionPool>,
    discard: bool,
}

impl PooledConnection {
    /// Wrap a connection that does not belong to any pool
    ///
    /// Dropping it simply closes the connection.
    pub fn detached(conn: Box<dyn Connection>) -> Self {
        Self {
            conn: Some(conn),
            created_at: Instant::now(),
            pool: Weak::new(),
            discard: false,
        }
    }

    /// Close the connection on drop instead of returning it to the pool
    ///
    /// Used when a call was interrupted and the session state is unknown.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &dyn Connection {
        &**self
    }

    /// Age of the underlying connection
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        match self.conn.as_ref() {
            Some(conn) => conn.as_ref(),
            None => unreachable!("connection already returned"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let created_at = self.created_at;
        let discard = self.discard;
        let pool = self.pool.upgrade();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                match pool {
                    Some(pool) if discard => pool.discard_connection(conn).await,
                    Some(pool) => pool.return_connection(conn, created_at).await,
                    None => {
                        let _ = conn.close().await;
                    }
                }
            });
        } else if let Some(pool) = pool {
            // No runtime left to close on; just free the slot.
            pool.release_slot();
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Maximum number of open connections
    pub max_open: usize,
    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum connection lifetime (for recycling)
    pub max_lifetime: Duration,
    /// Idle timeout (connections idle longer are closed)
    pub idle_timeout: Duration,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_open: 10,
            max_idle: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(600),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a DSN
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Create pool config from writer pool settings
    pub fn from_settings(url: impl Into<String>, settings: &PoolSettings) -> Self {
        Self {
            connection: ConnectionConfig::new(url)
                .with_connect_timeout(settings.connect_timeout_ms),
            max_open: settings.max_open,
            max_idle: settings.max_idle,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            max_lifetime: Duration::from_secs(settings.max_lifetime_secs),
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            test_on_borrow: true,
        }
    }

    /// Set maximum open connections
    pub fn with_max_open(mut self, size: usize) -> Self {
        self.max_open = size;
        self
    }

    /// Set maximum idle connections
    pub fn with_max_idle(mut self, size: usize) -> Self {
        self.max_idle = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections created
    pub connections_created: u64,
    /// Total number of connections closed
    pub connections_closed: u64,
    /// Total number of connection acquisitions
    pub acquisitions: u64,
    /// Number of times pool was exhausted
    pub exhausted_count: u64,
    /// Number of health check failures
    pub health_check_failures: u64,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    acquisitions: AtomicU64,
    exhausted_count: AtomicU64,
    health_check_failures: AtomicU64,
}

impl AtomicPoolStats {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
        }
    }
}

struct PoolEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

/// Semaphore-bounded connection pool
pub struct SimpleConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections (LIFO)
    idle: Mutex<Vec<PoolEntry>>,
    /// One permit per open connection slot
    semaphore: Semaphore,
    total_connections: AtomicUsize,
    stats: AtomicPoolStats,
    shutdown: AtomicBool,
    self_ref: Weak<Self>,
}

impl SimpleConnectionPool {
    /// Create a new, empty connection pool
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Arc<Self> {
        let max_open = config.max_open.max(1);
        Arc::new_cyclic(|self_ref| Self {
            semaphore: Semaphore::new(max_open),
            idle: Mutex::new(Vec::with_capacity(config.max_idle)),
            config,
            factory,
            total_connections: AtomicUsize::new(0),
            stats: AtomicPoolStats::default(),
            shutdown: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Open connections (idle and borrowed)
    pub fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let connect = self.factory.connect(&self.config.connection);
        let timeout = Duration::from_millis(self.config.connection.connect_timeout_ms.max(1));
        let conn = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "connect timed out after {}ms",
                    timeout.as_millis()
                ))
            })??;
        self.total_connections.fetch_add(1, Ordering::Release);
        self.stats
            .connections_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn should_recycle(&self, entry: &PoolEntry) -> bool {
        entry.created_at.elapsed() > self.config.max_lifetime
            || entry.last_used.elapsed() > self.config.idle_timeout
    }

    fn record_closed(&self) {
        self.total_connections.fetch_sub(1, Ordering::Release);
        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn release_slot(&self) {
        self.semaphore.add_permits(1);
        self.record_closed();
    }

    /// Borrow a connection, opening a new one if no valid idle connection exists
    pub async fn get(&self) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::PoolExhausted {
                message: "pool is shut down".to_string(),
            });
        }

        let permit = tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                self.stats.exhausted_count.fetch_add(1, Ordering::Relaxed);
                Error::PoolExhausted {
                    message: format!(
                        "timeout waiting for connection ({}ms)",
                        self.config.acquire_timeout.as_millis()
                    ),
                }
            })?
            .map_err(|_| Error::PoolExhausted {
                message: "pool semaphore closed".to_string(),
            })?;

        let reused = loop {
            let entry = self.idle.lock().await.pop();
            let Some(entry) = entry else {
                break None;
            };
            if self.should_recycle(&entry) {
                debug!("recycling expired pooled connection");
                let _ = entry.conn.close().await;
                self.record_closed();
                continue;
            }
            if self.config.test_on_borrow && !entry.conn.is_valid().await {
                self.record_closed();
                self.stats
                    .health_check_failures
                    .fetch_add(1, Ordering::Relaxed);
                continue;
            }
            break Some((entry.conn, entry.created_at));
        };

        // Dropping the permit on error frees the slot.
        let (conn, created_at) = match reused {
            Some(found) => found,
            None => (self.create_connection().await?, Instant::now()),
        };

        self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
        // Released in `return_connection`.
        permit.forget();

        Ok(PooledConnection {
            conn: Some(conn),
            created_at,
            pool: self.self_ref.clone(),
            discard: false,
        })
    }

    async fn discard_connection(&self, conn: Box<dyn Connection>) {
        debug!("closing discarded connection");
        let _ = conn.close().await;
        self.release_slot();
    }

    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant) {
        self.semaphore.add_permits(1);

        let expired = created_at.elapsed() > self.config.max_lifetime;
        if self.shutdown.load(Ordering::Acquire) || expired {
            let _ = conn.close().await;
            self.record_closed();
            return;
        }

        let mut idle = self.idle.lock().await;
        if idle.len() >= self.config.max_idle {
            drop(idle);
            let _ = conn.close().await;
            self.record_closed();
            return;
        }
        idle.push(PoolEntry {
            conn,
            created_at,
            last_used: Instant::now(),
        });
    }

    /// Close idle connections and refuse further borrows
    pub async fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let mut idle = self.idle.lock().await;
        for entry in idle.drain(..) {
            let _ = entry.conn.close().await;
            self.record_closed();
        }

        Ok(())
    }
}

/// One pool per (dialect, DSN)
///
/// Pool settings are taken from the first request for a key.
#[derive(Default)]
pub struct PoolManager {
    pools: Mutex<HashMap<(String, String), Arc<SimpleConnectionPool>>>,
}

impl PoolManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pool for a key, creating it on first use
    pub async fn pool(
        &self,
        dialect: &str,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Arc<SimpleConnectionPool> {
        let key = (dialect.to_lowercase(), config.connection.url.clone());
        let mut pools = self.pools.lock().await;
        pools
            .entry(key)
            .or_insert_with(|| {
                info!(
                    dialect = %dialect,
                    max_open = config.max_open,
                    max_idle = config.max_idle,
                    "creating connection pool"
                );
                SimpleConnectionPool::new(config, factory)
            })
            .clone()
    }

    /// Borrow a connection from the pool for a key
    pub async fn acquire(
        &self,
        dialect: &str,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<PooledConnection> {
        self.pool(dialect, config, factory).await.get().await
    }

    /// Number of pools created so far
    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Whether no pool has been created
    pub async fn is_empty(&self) -> bool {
        self.pools.lock().await.is_empty()
    }

    /// Close every pool
    pub async fn close_all(&self) -> Result<()> {
        let pools: Vec<_> = self.pools.lock().await.drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DatabaseType, Transaction};
    use crate::types::{Row, Value};
    use async_trait::async_trait;

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(0)
        }
        async fn begin(&self) -> Result<Box<dyn Transaction>> {
            Err(Error::transaction("not supported"))
        }
        async fn is_valid(&self) -> bool {
            true
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullConnection))
        }
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Unknown
        }
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new("postgres://localhost/test")
            .with_max_open(20)
            .with_max_idle(4)
            .with_acquire_timeout(Duration::from_secs(10))
            .with_test_on_borrow(false);

        assert_eq!(config.max_open, 20);
        assert_eq!(config.max_idle, 4);
        assert_eq!(config.acquire_timeout, Duration::from_secs(10));
        assert!(!config.test_on_borrow);
    }

    #[test]
    fn test_pool_config_from_settings() {
        let settings = PoolSettings::default();
        let config = PoolConfig::from_settings("mysql://db/app", &settings);
        assert_eq!(config.max_open, 10);
        assert_eq!(config.max_idle, 5);
        assert_eq!(config.max_lifetime, Duration::from_secs(3600));
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
    }

    #[tokio::test]
    async fn test_connection_is_reused_after_drop() {
        let factory = Arc::new(CountingFactory::default());
        let pool = SimpleConnectionPool::new(PoolConfig::new("mock://"), factory.clone());

        let conn = pool.get().await.unwrap();
        drop(conn);
        // Return happens on a spawned task.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let _conn = pool.get().await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().acquisitions, 2);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let factory = Arc::new(CountingFactory::default());
        let pool = SimpleConnectionPool::new(
            PoolConfig::new("mock://")
                .with_max_open(1)
                .with_acquire_timeout(Duration::from_millis(20)),
            factory,
        );

        let _held = pool.get().await.unwrap();
        let err = pool.get().await.err().unwrap();
        assert!(matches!(err, Error::PoolExhausted { .. }));
        assert_eq!(pool.stats().exhausted_count, 1);
    }

    #[tokio::test]
    async fn test_manager_caches_by_dialect_and_dsn() {
        let manager = PoolManager::new();
        let factory: Arc<dyn ConnectionFactory> = Arc::new(CountingFactory::default());

        let a = manager
            .pool("MySQL", PoolConfig::new("dsn-1"), factory.clone())
            .await;
        let b = manager
            .pool("mysql", PoolConfig::new("dsn-1"), factory.clone())
            .await;
        let _c = manager
            .pool("mysql", PoolConfig::new("dsn-2"), factory)
            .await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_discarded_connection_is_not_reused() {
        let factory = Arc::new(CountingFactory::default());
        let pool = SimpleConnectionPool::new(PoolConfig::new("mock://"), factory.clone());

        let mut conn = pool.get().await.unwrap();
        conn.discard();
        drop(conn);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.stats().connections_closed, 1);
        let _conn = pool.get().await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_borrow() {
        let pool = SimpleConnectionPool::new(
            PoolConfig::new("mock://"),
            Arc::new(CountingFactory::default()),
        );
        pool.close().await.unwrap();
        assert!(matches!(
            pool.get().await.err().unwrap(),
            Error::PoolExhausted { .. }
        ));
    }
}
