//! Database driver abstractions
//!
//! The engine talks to databases exclusively through the traits in this
//! module: a [`DriverBackend`] builds a [`DriverPool`] from connection
//! configuration, the pool begins [`DriverTransaction`]s, and both can run
//! statements that produce [`DriverRow`]s. Concrete implementations live in
//! the per-dialect submodules.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnConfig;
use crate::error::{TxError, TxResult};

pub mod mysql;
pub mod postgres;

pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;

/// SQL dialect tag carried in [`ConnConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Default server port for the dialect.
    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::MySql => 3306,
            Dialect::Postgres => 5432,
            Dialect::Sqlite => 0,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            _ => Err(format!("unsupported dialect: {s}")),
        }
    }
}

/// Resolve the backend implementation for a dialect.
pub fn backend_for(dialect: Dialect) -> TxResult<Arc<dyn DriverBackend>> {
    match dialect {
        Dialect::MySql => Ok(Arc::new(MySqlBackend::new())),
        Dialect::Postgres => Ok(Arc::new(PostgresBackend::new())),
        Dialect::Sqlite => Err(TxError::Configuration(
            "sqlite backend is not available".into(),
        )),
    }
}

/// Parameter value for statement binding.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Bytes(value)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// Snapshot of a pool's connection counts.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

/// A result row produced by the driver.
pub trait DriverRow: Send + Sync {
    /// Get a column value by name.
    fn get(&self, name: &str) -> TxResult<SqlValue>;

    /// Column names in result order.
    fn column_names(&self) -> Vec<String>;
}

/// A live driver transaction.
///
/// `commit` and `rollback` consume the transaction; no method may be called
/// afterwards. Savepoint operations take engine-generated names that are
/// unique within the transaction.
#[async_trait]
pub trait DriverTransaction: Send {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> TxResult<u64>;

    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue])
        -> TxResult<Vec<Box<dyn DriverRow>>>;

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>>;

    async fn savepoint(&mut self, name: &str) -> TxResult<()>;

    async fn rollback_to(&mut self, name: &str) -> TxResult<()>;

    async fn release(&mut self, name: &str) -> TxResult<()>;

    async fn commit(self: Box<Self>) -> TxResult<()>;

    async fn rollback(self: Box<Self>) -> TxResult<()>;
}

/// A driver connection pool.
///
/// Statements issued directly on the pool run in the driver's implicit
/// autocommit mode; [`begin`](DriverPool::begin) starts an explicit
/// transaction on a dedicated connection.
#[async_trait]
pub trait DriverPool: Send + Sync {
    async fn begin(&self) -> TxResult<Box<dyn DriverTransaction>>;

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> TxResult<u64>;

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> TxResult<Vec<Box<dyn DriverRow>>>;

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>>;

    fn stats(&self) -> PoolStats;

    fn is_closed(&self) -> bool;

    async fn close(&self);

    /// Whether the driver supports savepoints inside a transaction. Consulted
    /// at runtime by nested propagation; when false the engine degrades to
    /// joining the ambient transaction without a savepoint.
    fn savepoints_enabled(&self) -> bool {
        true
    }
}

/// Builds a connection pool for one dialect.
#[async_trait]
pub trait DriverBackend: Send + Sync {
    /// Create a connection pool from a patched [`ConnConfig`].
    async fn create_pool(&self, config: &ConnConfig) -> TxResult<Arc<dyn DriverPool>>;

    /// The dialect this backend serves.
    fn dialect(&self) -> Dialect;
}
