//! Transaction carrier and context
//!
//! The [`TxContext`] is the ambient value threaded through nested business
//! calls: it carries the caller's deadline and, when a transaction is live,
//! a [`Carrier`] describing it. Nested invocations recover the ambient
//! transaction from the context they were handed, without cooperation from
//! intermediate code. Business code runs DML through a [`Db`] handle that
//! targets either the shared transaction or the pool.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::backends::{DriverRow, DriverTransaction, SqlValue};
use crate::error::{TxError, TxResult};
use crate::pool::ManagedDb;

/// Context value passed into and out of every propagation frame.
///
/// Cheap to clone. Cancellation follows the tokio model (dropping the
/// future aborts the work); the optional deadline is enforced on every
/// statement issued through a [`Db`] bound to this context.
#[derive(Clone, Default)]
pub struct TxContext {
    deadline: Option<Instant>,
    carrier: Option<Carrier>,
}

impl TxContext {
    /// An empty root context with no deadline and no ambient transaction.
    pub fn background() -> Self {
        Self::default()
    }

    /// A root context whose statements must finish before `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            carrier: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The ambient carrier, if any frame above this context opened or
    /// joined a transaction.
    pub fn carrier(&self) -> Option<&Carrier> {
        self.carrier.as_ref()
    }

    /// Whether this context is inside a live transaction.
    pub async fn in_transaction(&self) -> bool {
        match &self.carrier {
            Some(carrier) => carrier.in_transaction().await,
            None => false,
        }
    }

    /// Derive a child context carrying `carrier`.
    pub(crate) fn with_carrier(&self, carrier: Carrier) -> TxContext {
        TxContext {
            deadline: self.deadline,
            carrier: Some(carrier),
        }
    }

    /// Derive a context with the carrier stripped but the deadline kept.
    /// Used when an outer transaction is logically suspended.
    pub(crate) fn pure(&self) -> TxContext {
        TxContext {
            deadline: self.deadline,
            carrier: None,
        }
    }
}

struct SharedTxInner {
    slot: Mutex<Option<Box<dyn DriverTransaction>>>,
    savepoint_seq: AtomicU32,
    savepoints_enabled: bool,
    log_sql: bool,
}

impl Drop for SharedTxInner {
    /// Fires when the last carrier holding this transaction goes away. An
    /// occupied slot here means no frame reached commit or rollback, e.g.
    /// the entrypoint future was cancelled mid-frame; the driver rolls the
    /// transaction back when the connection is reclaimed.
    fn drop(&mut self) {
        if self.slot.get_mut().is_some() {
            tracing::warn!(
                "transaction dropped without explicit commit or rollback, \
                 the driver will roll it back on connection reuse"
            );
        }
    }
}

/// A physical driver transaction shared by every frame that joined it.
///
/// The handle lives in a slot that is emptied by commit or rollback, so
/// liveness is a runtime check: after the root finalizes, every carrier
/// still holding this value observes `is_live() == false`.
#[derive(Clone)]
pub struct SharedTx {
    inner: Arc<SharedTxInner>,
}

impl SharedTx {
    /// BEGIN a fresh transaction on `db`.
    pub(crate) async fn begin(db: &ManagedDb) -> TxResult<SharedTx> {
        let handle = db.begin().await?;
        Ok(SharedTx {
            inner: Arc::new(SharedTxInner {
                slot: Mutex::new(Some(handle)),
                savepoint_seq: AtomicU32::new(0),
                savepoints_enabled: db.savepoints_enabled(),
                log_sql: db.log_sql(),
            }),
        })
    }

    pub async fn is_live(&self) -> bool {
        self.inner.slot.lock().await.is_some()
    }

    pub(crate) fn savepoints_enabled(&self) -> bool {
        self.inner.savepoints_enabled
    }

    pub(crate) fn log_sql(&self) -> bool {
        self.inner.log_sql
    }

    /// Next savepoint name, unique for the lifetime of this transaction.
    pub(crate) fn next_savepoint_name(&self) -> String {
        let seq = self.inner.savepoint_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("sp_{seq}")
    }

    pub(crate) async fn execute(&self, sql: &str, params: &[SqlValue]) -> TxResult<u64> {
        let mut slot = self.inner.slot.lock().await;
        let tx = slot
            .as_mut()
            .ok_or_else(|| TxError::Driver("transaction is closed".into()))?;
        tx.execute(sql, params).await
    }

    pub(crate) async fn fetch_all(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Vec<Box<dyn DriverRow>>> {
        let mut slot = self.inner.slot.lock().await;
        let tx = slot
            .as_mut()
            .ok_or_else(|| TxError::Driver("transaction is closed".into()))?;
        tx.fetch_all(sql, params).await
    }

    pub(crate) async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>> {
        let mut slot = self.inner.slot.lock().await;
        let tx = slot
            .as_mut()
            .ok_or_else(|| TxError::Driver("transaction is closed".into()))?;
        tx.fetch_optional(sql, params).await
    }

    pub(crate) async fn savepoint(&self, name: &str) -> TxResult<()> {
        let mut slot = self.inner.slot.lock().await;
        let tx = slot
            .as_mut()
            .ok_or_else(|| TxError::Driver("transaction is closed".into()))?;
        tx.savepoint(name).await
    }

    pub(crate) async fn rollback_to(&self, name: &str) -> TxResult<()> {
        let mut slot = self.inner.slot.lock().await;
        let tx = slot
            .as_mut()
            .ok_or_else(|| TxError::Driver("transaction is closed".into()))?;
        tx.rollback_to(name).await
    }

    /// COMMIT and empty the slot. Errors if the slot is already empty.
    pub(crate) async fn commit(&self) -> TxResult<()> {
        let handle = self
            .inner
            .slot
            .lock()
            .await
            .take()
            .ok_or(TxError::CommitWithoutTransaction)?;
        handle.commit().await
    }

    /// ROLLBACK and empty the slot. A no-op when already finalized.
    pub(crate) async fn rollback(&self) -> TxResult<()> {
        let handle = self.inner.slot.lock().await.take();
        match handle {
            Some(handle) => handle.rollback().await,
            None => Ok(()),
        }
    }
}

/// Ambient transaction descriptor threaded through nested calls.
///
/// Exactly one carrier per physical transaction is the root: the frame that
/// opened it, and the only one permitted to finalize it. Children created
/// by [`session`](Carrier::session) share the transaction and keep a
/// back-reference to their parent; the back-reference is never used to
/// mutate the outer frame.
#[derive(Clone)]
pub struct Carrier {
    tx: SharedTx,
    parent: Option<Box<Carrier>>,
}

impl Carrier {
    pub(crate) fn root(tx: SharedTx) -> Carrier {
        Carrier { tx, parent: None }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Runtime liveness check against the driver handle. A rolled-back
    /// transaction is observed as not-in-transaction by later calls.
    pub async fn in_transaction(&self) -> bool {
        self.tx.is_live().await
    }

    /// Child carrier sharing this transaction, with `self` as parent. This
    /// is what an inner frame that joins the ambient transaction receives.
    pub fn session(&self) -> Carrier {
        Carrier {
            tx: self.tx.clone(),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub(crate) fn shared(&self) -> &SharedTx {
        &self.tx
    }

    /// Commit the transaction.
    ///
    /// Fails with [`TxError::CommitWithoutTransaction`] when not in a
    /// transaction. A non-root carrier returns success without touching the
    /// driver; the root frame is authoritative.
    pub async fn commit(&self) -> TxResult<()> {
        if !self.in_transaction().await {
            return Err(TxError::CommitWithoutTransaction);
        }
        if self.is_root() {
            return self.tx.commit().await;
        }
        Ok(())
    }

    /// Roll back the transaction. No-op unless this carrier is the root of
    /// a live transaction.
    pub async fn rollback(&self) -> TxResult<()> {
        if self.in_transaction().await && self.is_root() {
            return self.tx.rollback().await;
        }
        Ok(())
    }
}

#[derive(Clone)]
enum DbTarget {
    Pool(Arc<ManagedDb>),
    Tx(SharedTx),
}

/// Handle business code runs DML on.
///
/// Targets the ambient transaction when one is live, otherwise the pool in
/// autocommit mode. Bound to a context: its deadline applies to every
/// statement.
#[derive(Clone)]
pub struct Db {
    target: DbTarget,
    deadline: Option<Instant>,
}

impl Db {
    /// A pool-targeting view bound to `ctx`. Statements run in the driver's
    /// implicit autocommit mode.
    pub fn from_pool(db: Arc<ManagedDb>, ctx: &TxContext) -> Db {
        Db {
            target: DbTarget::Pool(db),
            deadline: ctx.deadline(),
        }
    }

    pub(crate) fn from_tx(tx: SharedTx, ctx: &TxContext) -> Db {
        Db {
            target: DbTarget::Tx(tx),
            deadline: ctx.deadline(),
        }
    }

    /// Whether statements run inside a transaction.
    pub async fn in_transaction(&self) -> bool {
        match &self.target {
            DbTarget::Tx(tx) => tx.is_live().await,
            DbTarget::Pool(_) => false,
        }
    }

    /// Execute a statement, returning the affected row count.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> TxResult<u64> {
        self.log(sql);
        self.bounded(async {
            match &self.target {
                DbTarget::Pool(db) => db.execute(sql, params).await,
                DbTarget::Tx(tx) => tx.execute(sql, params).await,
            }
        })
        .await
    }

    /// Run a query and collect every result row.
    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> TxResult<Vec<Box<dyn DriverRow>>> {
        self.log(sql);
        self.bounded(async {
            match &self.target {
                DbTarget::Pool(db) => db.fetch_all(sql, params).await,
                DbTarget::Tx(tx) => tx.fetch_all(sql, params).await,
            }
        })
        .await
    }

    /// Run a query and collect the first result row, if any.
    pub async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> TxResult<Option<Box<dyn DriverRow>>> {
        self.log(sql);
        self.bounded(async {
            match &self.target {
                DbTarget::Pool(db) => db.fetch_optional(sql, params).await,
                DbTarget::Tx(tx) => tx.fetch_optional(sql, params).await,
            }
        })
        .await
    }

    fn log(&self, sql: &str) {
        let enabled = match &self.target {
            DbTarget::Pool(db) => db.log_sql(),
            DbTarget::Tx(tx) => tx.log_sql(),
        };
        if enabled {
            tracing::info!(%sql, "executing statement");
        } else {
            tracing::debug!(%sql, "executing statement");
        }
    }

    async fn bounded<T>(&self, fut: impl std::future::Future<Output = TxResult<T>>) -> TxResult<T> {
        match self.deadline {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(TxError::Driver("statement deadline exceeded".into())),
                }
            }
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeTx;

    #[async_trait]
    impl DriverTransaction for FakeTx {
        async fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> TxResult<u64> {
            Ok(1)
        }
        async fn fetch_all(
            &mut self,
            _sql: &str,
            _params: &[SqlValue],
        ) -> TxResult<Vec<Box<dyn DriverRow>>> {
            Ok(Vec::new())
        }
        async fn fetch_optional(
            &mut self,
            _sql: &str,
            _params: &[SqlValue],
        ) -> TxResult<Option<Box<dyn DriverRow>>> {
            Ok(None)
        }
        async fn savepoint(&mut self, _name: &str) -> TxResult<()> {
            Ok(())
        }
        async fn rollback_to(&mut self, _name: &str) -> TxResult<()> {
            Ok(())
        }
        async fn release(&mut self, _name: &str) -> TxResult<()> {
            Ok(())
        }
        async fn commit(self: Box<Self>) -> TxResult<()> {
            Ok(())
        }
        async fn rollback(self: Box<Self>) -> TxResult<()> {
            Ok(())
        }
    }

    fn fake_shared() -> SharedTx {
        SharedTx {
            inner: Arc::new(SharedTxInner {
                slot: Mutex::new(Some(Box::new(FakeTx))),
                savepoint_seq: AtomicU32::new(0),
                savepoints_enabled: true,
                log_sql: false,
            }),
        }
    }

    #[tokio::test]
    async fn session_shares_the_transaction_and_records_the_parent() {
        let root = Carrier::root(fake_shared());
        assert!(root.is_root());
        assert!(root.in_transaction().await);

        let session = root.session();
        assert!(!session.is_root());
        assert!(session.in_transaction().await);

        let grandchild = session.session();
        assert!(!grandchild.is_root());
    }

    #[tokio::test]
    async fn only_the_root_finalizes() {
        let root = Carrier::root(fake_shared());
        let session = root.session();

        // A non-root commit succeeds without touching the driver.
        session.commit().await.unwrap();
        assert!(root.in_transaction().await);

        // A non-root rollback is a no-op.
        session.rollback().await.unwrap();
        assert!(root.in_transaction().await);

        root.commit().await.unwrap();
        assert!(!root.in_transaction().await);
        assert!(!session.in_transaction().await);
    }

    #[tokio::test]
    async fn commit_without_transaction_is_a_usage_error() {
        let root = Carrier::root(fake_shared());
        root.rollback().await.unwrap();
        assert!(!root.in_transaction().await);
        assert!(matches!(
            root.commit().await,
            Err(TxError::CommitWithoutTransaction)
        ));
    }

    #[tokio::test]
    async fn rollback_after_finalize_is_a_no_op() {
        let root = Carrier::root(fake_shared());
        root.rollback().await.unwrap();
        root.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn savepoint_names_are_sequential() {
        let tx = fake_shared();
        assert_eq!(tx.next_savepoint_name(), "sp_1");
        assert_eq!(tx.next_savepoint_name(), "sp_2");
        assert_eq!(tx.next_savepoint_name(), "sp_3");
    }

    #[tokio::test]
    async fn context_without_carrier_is_not_in_transaction() {
        let ctx = TxContext::background();
        assert!(!ctx.in_transaction().await);
        assert!(ctx.carrier().is_none());

        let carrier = Carrier::root(fake_shared());
        let child = ctx.with_carrier(carrier);
        assert!(child.in_transaction().await);
        assert!(!child.pure().in_transaction().await);
    }
}
