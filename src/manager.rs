//! Transaction manager
//!
//! The public entrypoint callers use to run business functions under a
//! propagation mode. Thin wrapper over the propagation engine; also a
//! [`DbFactory`], so a manager can be handed anywhere a factory is
//! expected.

use std::future::Future;
use std::sync::Arc;

use crate::context::{Db, TxContext};
use crate::error::TxResult;
use crate::factory::DbFactory;
use crate::pool::ManagedDb;
use crate::propagation::Propagation;

/// Runs business functions with transaction propagation.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use sqltx::{simple_db_factory, Propagation, SqlValue, TransactionManager, TxContext};
/// # async fn demo() -> sqltx::TxResult<()> {
/// let factory = simple_db_factory("localhost", 5432, "appdb", "app", "secret").await?;
/// let tm = TransactionManager::new(Arc::new(factory));
/// let ctx = TxContext::background();
/// tm.transaction(&ctx, |ctx, db| {
///     let tm = tm.clone();
///     async move {
///         db.execute(
///             "INSERT INTO user (username) VALUES ($1)",
///             &[SqlValue::from("u1")],
///         )
///         .await?;
///         // Joins the transaction opened above.
///         tm.transaction_with(
///             &ctx,
///             |_ctx, db| async move {
///                 db.execute(
///                     "INSERT INTO user (username) VALUES ($1)",
///                     &[SqlValue::from("u2")],
///                 )
///                 .await?;
///                 Ok(())
///             },
///             Propagation::Required,
///         )
///         .await
///     }
/// })
/// .await
/// # }
/// ```
#[derive(Clone)]
pub struct TransactionManager {
    factory: Arc<dyn DbFactory>,
}

impl TransactionManager {
    pub fn new(factory: Arc<dyn DbFactory>) -> Self {
        Self { factory }
    }

    /// Run `biz_fn` with the default [`Propagation::Required`] mode.
    pub async fn transaction<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        self.run(ctx, biz_fn, Propagation::default()).await
    }

    /// Run `biz_fn` under the given propagation mode.
    pub async fn transaction_with<F, Fut>(
        &self,
        ctx: &TxContext,
        biz_fn: F,
        propagation: Propagation,
    ) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        self.run(ctx, biz_fn, propagation).await
    }

    /// Handle honoring the ambient transaction: when `ctx` carries one, the
    /// returned handle targets it; otherwise a fresh context-bound pool
    /// view. This is how non-framework code acquires a handle that
    /// automatically participates in the caller's transaction.
    pub fn db(&self, ctx: &TxContext) -> Db {
        if let Some(carrier) = ctx.carrier() {
            return Db::from_tx(carrier.shared().clone(), ctx);
        }
        self.factory.db(ctx)
    }

    /// The raw cached handle the engine begins transactions on.
    pub fn origin_db(&self) -> Arc<ManagedDb> {
        self.factory.origin_db()
    }

    /// Context-bound pool view, bypassing any ambient transaction.
    pub(crate) fn pure_db(&self, ctx: &TxContext) -> Db {
        self.factory.db(ctx)
    }
}

impl DbFactory for TransactionManager {
    fn db(&self, ctx: &TxContext) -> Db {
        TransactionManager::db(self, ctx)
    }

    fn origin_db(&self) -> Arc<ManagedDb> {
        TransactionManager::origin_db(self)
    }
}
