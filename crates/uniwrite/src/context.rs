//! Per-call execution context threaded through every statement call
//!
//! Carries the caller's cancellation token, an optional deadline and the SQL
//! logging switch.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Caller-supplied cancellation signal and optional deadline
///
/// Cloning shares the same cancellation token.
#[derive(Debug, Clone)]
pub struct ExecContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    log_sql: bool,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecContext {
    /// Context that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            log_sql: false,
        }
    }

    /// Context driven by an existing token
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
            log_sql: false,
        }
    }

    /// Set a deadline relative to now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Set an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Log each statement at debug level
    pub fn with_sql_log(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    /// Whether statement logging is on
    pub fn sql_log_enabled(&self) -> bool {
        self.log_sql
    }

    /// Log a statement if statement logging is on
    pub fn log_statement(&self, sql: &str, params: usize) {
        if self.log_sql {
            debug!(sql = %sql, params, "executing statement");
        }
    }

    /// The underlying token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if cancelled or past the deadline
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled("operation cancelled"));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::timeout("deadline exceeded"));
            }
        }
        Ok(())
    }

    /// Run a statement future, aborting it on cancellation or deadline
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(Error::cancelled("operation cancelled")),
                res = fut => res,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .map_err(|_| Error::timeout("deadline exceeded"))?,
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_through() {
        let ctx = ExecContext::new();
        let v = ctx.run(async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let ctx = ExecContext::new();
        ctx.cancel();
        let err = ctx.run(async { Ok::<_, Error>(()) }).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight() {
        let ctx = ExecContext::new();
        let token = ctx.token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let ctx = ExecContext::new().with_timeout(Duration::from_millis(10));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
