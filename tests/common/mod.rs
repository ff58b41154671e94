//! In-memory mock driver for propagation tests.
//!
//! Implements the driver contract with a committed row store, per-transaction
//! write journals with savepoint marks, and a log of every transaction
//! control command, so tests can assert both row visibility and the exact
//! driver op stream.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqltx::{
    ConnConfig, Db, DbFactory, DriverPool, DriverRow, DriverTransaction, ManagedDb, PoolStats,
    SqlValue, TxContext, TxError, TxResult,
};

/// Shared state of one mock database.
pub struct MockState {
    committed: Mutex<Vec<String>>,
    ops: Mutex<Vec<String>>,
}

impl MockState {
    fn new() -> Self {
        Self {
            committed: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    /// Usernames visible after commit.
    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }

    /// Transaction control commands in issue order.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn exists(&self, username: &str) -> bool {
        self.committed
            .lock()
            .unwrap()
            .iter()
            .any(|u| u == username)
    }
}

fn username_param(sql: &str, params: &[SqlValue]) -> TxResult<String> {
    match params.first() {
        Some(SqlValue::Text(name)) => Ok(name.clone()),
        _ => Err(TxError::Driver(format!("unsupported statement: {sql}"))),
    }
}

fn rows_from(names: Vec<String>) -> Vec<Box<dyn DriverRow>> {
    names
        .into_iter()
        .map(|username| Box::new(MockRow { username }) as Box<dyn DriverRow>)
        .collect()
}

pub struct MockRow {
    username: String,
}

impl DriverRow for MockRow {
    fn get(&self, name: &str) -> TxResult<SqlValue> {
        if name == "username" {
            Ok(SqlValue::Text(self.username.clone()))
        } else {
            Err(TxError::Driver(format!("column '{name}' not found")))
        }
    }

    fn column_names(&self) -> Vec<String> {
        vec!["username".to_string()]
    }
}

pub struct MockPool {
    state: Arc<MockState>,
    savepoints_enabled: bool,
}

#[async_trait]
impl DriverPool for MockPool {
    async fn begin(&self) -> TxResult<Box<dyn DriverTransaction>> {
        self.state.record("BEGIN".into());
        Ok(Box::new(MockTx {
            state: self.state.clone(),
            writes: Vec::new(),
            savepoints: Vec::new(),
        }))
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> TxResult<u64> {
        // Autocommit: the write is immediately visible.
        if sql.starts_with("INSERT") {
            let name = username_param(sql, params)?;
            self.state.committed.lock().unwrap().push(name);
            return Ok(1);
        }
        Err(TxError::Driver(format!("unsupported statement: {sql}")))
    }

    async fn fetch_all(&self, _sql: &str, _params: &[SqlValue]) -> TxResult<Vec<Box<dyn DriverRow>>> {
        Ok(rows_from(self.state.committed()))
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total_connections: 1,
            idle_connections: 1,
            active_connections: 0,
        }
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&self) {}

    fn savepoints_enabled(&self) -> bool {
        self.savepoints_enabled
    }
}

pub struct MockTx {
    state: Arc<MockState>,
    writes: Vec<String>,
    savepoints: Vec<(String, usize)>,
}

#[async_trait]
impl DriverTransaction for MockTx {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> TxResult<u64> {
        if sql.starts_with("INSERT") {
            let name = username_param(sql, params)?;
            self.writes.push(name);
            return Ok(1);
        }
        Err(TxError::Driver(format!("unsupported statement: {sql}")))
    }

    async fn fetch_all(
        &mut self,
        _sql: &str,
        _params: &[SqlValue],
    ) -> TxResult<Vec<Box<dyn DriverRow>>> {
        // Statements inside the transaction see committed rows plus this
        // transaction's own uncommitted writes.
        let mut names = self.state.committed();
        names.extend(self.writes.iter().cloned());
        Ok(rows_from(names))
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    async fn savepoint(&mut self, name: &str) -> TxResult<()> {
        self.state.record(format!("SAVEPOINT {name}"));
        self.savepoints.push((name.to_string(), self.writes.len()));
        Ok(())
    }

    async fn rollback_to(&mut self, name: &str) -> TxResult<()> {
        self.state.record(format!("ROLLBACK TO {name}"));
        let pos = self
            .savepoints
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| TxError::Driver(format!("unknown savepoint: {name}")))?;
        let mark = self.savepoints[pos].1;
        self.writes.truncate(mark);
        // Later savepoints are destroyed; the target stays defined.
        self.savepoints.truncate(pos + 1);
        Ok(())
    }

    async fn release(&mut self, name: &str) -> TxResult<()> {
        self.state.record(format!("RELEASE {name}"));
        let pos = self
            .savepoints
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| TxError::Driver(format!("unknown savepoint: {name}")))?;
        self.savepoints.remove(pos);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> TxResult<()> {
        self.state.record("COMMIT".into());
        self.state
            .committed
            .lock()
            .unwrap()
            .extend(self.writes.iter().cloned());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> TxResult<()> {
        self.state.record("ROLLBACK".into());
        Ok(())
    }
}

/// Factory over a single mock database.
pub struct MockFactory {
    db: Arc<ManagedDb>,
}

impl MockFactory {
    pub fn new(savepoints_enabled: bool) -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::new());
        let db = Arc::new(mock_managed_db(state.clone(), savepoints_enabled));
        (Self { db }, state)
    }
}

impl DbFactory for MockFactory {
    fn db(&self, ctx: &TxContext) -> Db {
        Db::from_pool(self.db.clone(), ctx)
    }

    fn origin_db(&self) -> Arc<ManagedDb> {
        self.db.clone()
    }
}

/// Build a [`ManagedDb`] over a fresh mock pool sharing `state`.
pub fn mock_managed_db(state: Arc<MockState>, savepoints_enabled: bool) -> ManagedDb {
    let pool = Arc::new(MockPool {
        state,
        savepoints_enabled,
    });
    let config = ConnConfig {
        host: "localhost".into(),
        database: "testdb".into(),
        dialect: "postgres".into(),
        ..Default::default()
    };
    ManagedDb::new(pool, config)
}

/// Insert one user row through the given handle.
pub async fn insert(db: &Db, username: &str) -> TxResult<()> {
    db.execute(
        "INSERT INTO user (username) VALUES ($1)",
        &[SqlValue::from(username)],
    )
    .await?;
    Ok(())
}
