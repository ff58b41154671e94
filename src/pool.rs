//! Managed database handle
//!
//! [`ManagedDb`] wraps a driver pool with begin statistics, statement
//! logging configuration, and health monitoring. One instance exists per
//! cached `(source, key)` endpoint and lives until process teardown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backends::{DriverPool, DriverRow, DriverTransaction, PoolStats, SqlValue};
use crate::config::ConnConfig;
use crate::error::TxResult;

/// Connection pool error types.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to create database pool: {0}")]
    CreateFailed(String),

    #[error("failed to begin transaction: {0}")]
    BeginFailed(String),

    #[error("database pool is closed")]
    PoolClosed,

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),
}

/// Statistics snapshot for a managed handle.
#[derive(Debug, Clone)]
pub struct DbStats {
    pub pool: PoolStats,
    pub begin_count: u64,
    pub begin_errors: u64,
    pub created_at: Instant,
}

/// A pooled database handle owned by the connection cache.
///
/// The transaction manager draws fresh transactions from here; everything
/// else goes through context-bound [`Db`](crate::context::Db) views that do
/// not extend ownership.
pub struct ManagedDb {
    pool: Arc<dyn DriverPool>,
    config: ConnConfig,
    begin_count: AtomicU64,
    begin_errors: AtomicU64,
    created_at: Instant,
}

impl std::fmt::Debug for ManagedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedDb")
            .field("config", &self.config)
            .field("begin_count", &self.begin_count)
            .field("begin_errors", &self.begin_errors)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl ManagedDb {
    pub fn new(pool: Arc<dyn DriverPool>, config: ConnConfig) -> Self {
        Self {
            pool,
            config,
            begin_count: AtomicU64::new(0),
            begin_errors: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Begin a driver transaction with statistics tracking.
    pub async fn begin(&self) -> Result<Box<dyn DriverTransaction>, PoolError> {
        if self.pool.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        self.begin_count.fetch_add(1, Ordering::Relaxed);
        match self.pool.begin().await {
            Ok(tx) => {
                tracing::debug!("database transaction started");
                Ok(tx)
            }
            Err(err) => {
                self.begin_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %err, "failed to begin database transaction");
                Err(PoolError::BeginFailed(err.to_string()))
            }
        }
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> TxResult<u64> {
        self.pool.execute(sql, params).await
    }

    pub async fn fetch_all(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Vec<Box<dyn DriverRow>>> {
        self.pool.fetch_all(sql, params).await
    }

    pub async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>> {
        self.pool.fetch_optional(sql, params).await
    }

    /// Current pool and begin statistics.
    pub fn stats(&self) -> DbStats {
        DbStats {
            pool: self.pool.stats(),
            begin_count: self.begin_count.load(Ordering::Relaxed),
            begin_errors: self.begin_errors.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }

    /// Verify the pool can serve a statement.
    pub async fn health_check(&self) -> Result<Duration, PoolError> {
        if self.pool.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        let start = Instant::now();
        self.pool
            .execute("SELECT 1", &[])
            .await
            .map_err(|e| PoolError::HealthCheckFailed(e.to_string()))?;
        Ok(start.elapsed())
    }

    pub fn config(&self) -> &ConnConfig {
        &self.config
    }

    pub(crate) fn log_sql(&self) -> bool {
        self.config.db_log
    }

    pub(crate) fn savepoints_enabled(&self) -> bool {
        self.pool.savepoints_enabled()
    }
}
