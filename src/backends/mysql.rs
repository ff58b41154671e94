//! MySQL driver backend
//!
//! Implements the driver contract over a sqlx MySQL pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, Pool};

use super::{Dialect, DriverBackend, DriverPool, DriverRow, DriverTransaction, PoolStats, SqlValue};
use crate::config::ConnConfig;
use crate::error::{TxError, TxResult};
use crate::pool::PoolError;

/// MySQL backend.
#[derive(Debug, Default)]
pub struct MySqlBackend;

impl MySqlBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DriverBackend for MySqlBackend {
    async fn create_pool(&self, config: &ConnConfig) -> TxResult<Arc<dyn DriverPool>> {
        let dsn = format!(
            "mysql://{}:{}@{}:{}/{}",
            config.user, config.password, config.host, config.port, config.database
        );
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns.min(config.max_open_conns))
            .max_lifetime(Duration::from_secs(config.conn_max_lifetime_sec))
            .connect(&dsn)
            .await
            .map_err(|e| PoolError::CreateFailed(e.to_string()))?;
        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "mysql pool created"
        );
        Ok(Arc::new(MySqlDriverPool { pool }))
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }
}

/// MySQL connection pool.
pub struct MySqlDriverPool {
    pool: Pool<MySql>,
}

#[async_trait]
impl DriverPool for MySqlDriverPool {
    async fn begin(&self) -> TxResult<Box<dyn DriverTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlTransaction { tx: Some(tx) }))
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> TxResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> TxResult<Vec<Box<dyn DriverRow>>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(boxed_row).collect())
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(boxed_row))
    }

    fn stats(&self) -> PoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
        }
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// MySQL transaction over a pooled connection.
pub struct MySqlTransaction {
    tx: Option<sqlx::Transaction<'static, MySql>>,
}

impl MySqlTransaction {
    fn live(&mut self) -> TxResult<&mut sqlx::Transaction<'static, MySql>> {
        self.tx
            .as_mut()
            .ok_or_else(|| TxError::Driver("transaction already completed".into()))
    }
}

#[async_trait]
impl DriverTransaction for MySqlTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> TxResult<u64> {
        let tx = self.live()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query.execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Vec<Box<dyn DriverRow>>> {
        let tx = self.live()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = query.fetch_all(&mut **tx).await?;
        Ok(rows.into_iter().map(boxed_row).collect())
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>> {
        let tx = self.live()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let row = query.fetch_optional(&mut **tx).await?;
        Ok(row.map(boxed_row))
    }

    async fn savepoint(&mut self, name: &str) -> TxResult<()> {
        let tx = self.live()?;
        sqlx::query(&format!("SAVEPOINT {name}"))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn rollback_to(&mut self, name: &str) -> TxResult<()> {
        let tx = self.live()?;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn release(&mut self, name: &str) -> TxResult<()> {
        let tx = self.live()?;
        sqlx::query(&format!("RELEASE SAVEPOINT {name}"))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> TxResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| TxError::Driver("transaction already completed".into()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> TxResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| TxError::Driver("transaction already completed".into()))?;
        tx.rollback().await?;
        Ok(())
    }
}

/// MySQL result row.
pub struct MySqlDriverRow {
    row: MySqlRow,
}

fn boxed_row(row: MySqlRow) -> Box<dyn DriverRow> {
    Box::new(MySqlDriverRow { row })
}

impl DriverRow for MySqlDriverRow {
    fn get(&self, name: &str) -> TxResult<SqlValue> {
        use sqlx::{Column, Row};
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| TxError::Driver(format!("column '{name}' not found")))?;
        row_value(&self.row, index)
    }

    fn column_names(&self) -> Vec<String> {
        use sqlx::{Column, Row};
        self.row
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn row_value(row: &MySqlRow, index: usize) -> TxResult<SqlValue> {
    use sqlx::{Column, Row, TypeInfo, ValueRef};

    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let value = match row.columns()[index].type_info().name() {
        "BOOLEAN" => SqlValue::Bool(row.try_get(index)?),
        "TINYINT" => SqlValue::Int(row.try_get::<i8, _>(index)? as i64),
        "SMALLINT" => SqlValue::Int(row.try_get::<i16, _>(index)? as i64),
        "INT" | "MEDIUMINT" => SqlValue::Int(row.try_get::<i32, _>(index)? as i64),
        "BIGINT" => SqlValue::Int(row.try_get(index)?),
        "FLOAT" => SqlValue::Float(row.try_get::<f32, _>(index)? as f64),
        "DOUBLE" => SqlValue::Float(row.try_get(index)?),
        "BLOB" | "VARBINARY" | "BINARY" => SqlValue::Bytes(row.try_get(index)?),
        _ => SqlValue::Text(row.try_get(index)?),
    };
    Ok(value)
}
