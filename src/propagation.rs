//! Transaction propagation engine
//!
//! Implements the Spring-style propagation state machine. Each mode decides,
//! from the ambient carrier on the caller context, whether the business
//! function joins the live transaction, runs in a fresh one, runs
//! non-transactionally, runs under a savepoint, or is refused outright.
//!
//! Frames that own a physical transaction are panic-safe: on any exit path
//! with a returned error or an unwinding panic, the owned transaction (or
//! savepoint) is rolled back before the error or panic continues outward.
//! Join frames intercept nothing; the owning frame above them observes the
//! failure and finalizes.

use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};

use futures::FutureExt;

use crate::context::{Carrier, Db, SharedTx, TxContext};
use crate::error::{TxError, TxResult};
use crate::manager::TransactionManager;

/// How a propagation frame participates in the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Propagation {
    /// Join the current transaction if one exists, otherwise start one.
    #[default]
    Required,
    /// Join the current transaction if one exists, otherwise run
    /// non-transactionally.
    Supports,
    /// Join the current transaction; fail if there is none.
    Mandatory,
    /// Always start a fresh transaction, logically suspending any current
    /// one. The new transaction commits or rolls back independently.
    RequiresNew,
    /// Run non-transactionally, logically suspending any current
    /// transaction.
    NotSupported,
    /// Inside a transaction, run under a savepoint that is rolled back to
    /// on failure; otherwise behave like `Required`.
    Nested,
    /// Run non-transactionally; fail if a transaction exists.
    Never,
}

/// The ambient carrier, when the context holds one that is still live.
async fn live_carrier(ctx: &TxContext) -> Option<Carrier> {
    if let Some(carrier) = ctx.carrier() {
        if carrier.in_transaction().await {
            return Some(carrier.clone());
        }
    }
    None
}

/// Roll back an aborted frame's transaction. Failures must not mask the
/// error already propagating, so they are only logged.
async fn abort(carrier: &Carrier) {
    if let Err(err) = carrier.rollback().await {
        tracing::error!(error = %err, "rollback failed for aborted frame");
    }
}

impl TransactionManager {
    pub(crate) async fn run<F, Fut>(
        &self,
        ctx: &TxContext,
        biz_fn: F,
        propagation: Propagation,
    ) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        match propagation {
            Propagation::Required => self.with_required(ctx, biz_fn).await,
            Propagation::Supports => self.with_supports(ctx, biz_fn).await,
            Propagation::Mandatory => self.with_mandatory(ctx, biz_fn).await,
            Propagation::RequiresNew => self.with_requires_new(ctx, biz_fn).await,
            Propagation::NotSupported => self.with_not_supported(ctx, biz_fn).await,
            Propagation::Nested => self.with_nested(ctx, biz_fn).await,
            Propagation::Never => self.with_never(ctx, biz_fn).await,
        }
    }

    /// Run `biz_fn` joined to `ambient` through a session carrier.
    ///
    /// Errors and panics are deliberately not intercepted here: the frame
    /// that owns the transaction observes them and rolls the whole
    /// transaction back.
    async fn join<F, Fut>(&self, ctx: &TxContext, ambient: Carrier, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        let session = ambient.session();
        let db = Db::from_tx(session.shared().clone(), ctx);
        biz_fn(ctx.with_carrier(session), db).await
    }

    /// Open a fresh root transaction and run `biz_fn` inside it.
    ///
    /// On a returned error or an unwinding panic the transaction is rolled
    /// back and the failure continues outward; on success the commit result
    /// is surfaced. A commit failure does not re-trigger rollback, the
    /// driver has already finalized.
    async fn run_new_root<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        let origin = self.origin_db();
        let tx = SharedTx::begin(&origin).await?;
        let carrier = Carrier::root(tx.clone());
        let child = ctx.with_carrier(carrier.clone());
        let db = Db::from_tx(tx, ctx);
        match AssertUnwindSafe(biz_fn(child, db)).catch_unwind().await {
            Err(payload) => {
                abort(&carrier).await;
                resume_unwind(payload)
            }
            Ok(Err(err)) => {
                abort(&carrier).await;
                Err(err)
            }
            Ok(Ok(())) => carrier.commit().await,
        }
    }

    async fn with_required<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        if let Some(ambient) = live_carrier(ctx).await {
            return self.join(ctx, ambient, biz_fn).await;
        }
        self.run_new_root(ctx, biz_fn).await
    }

    async fn with_supports<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        if let Some(ambient) = live_carrier(ctx).await {
            return self.join(ctx, ambient, biz_fn).await;
        }
        let db = self.pure_db(ctx);
        biz_fn(ctx.clone(), db).await
    }

    async fn with_mandatory<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        match live_carrier(ctx).await {
            Some(ambient) => self.join(ctx, ambient, biz_fn).await,
            None => Err(TxError::MandatoryWithoutTransaction),
        }
    }

    /// The outer transaction is suspended only logically: it keeps its
    /// connection while the new frame begins on a fresh one from the same
    /// pool. Deep nesting of independent transactions therefore needs
    /// `max_open_conns` at least as large as the nesting depth.
    async fn with_requires_new<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        let pure = ctx.pure();
        self.run_new_root(&pure, biz_fn).await
    }

    async fn with_not_supported<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        let pure = ctx.pure();
        let db = self.pure_db(&pure);
        biz_fn(pure, db).await
    }

    async fn with_nested<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        let Some(ambient) = live_carrier(ctx).await else {
            return self.with_required(ctx, biz_fn).await;
        };
        if !ambient.shared().savepoints_enabled() {
            // Driver disallows nested savepoints: degrade to joining the
            // ambient transaction.
            return self.join(ctx, ambient, biz_fn).await;
        }
        let shared = ambient.shared().clone();
        let name = shared.next_savepoint_name();
        shared.savepoint(&name).await?;
        let session = ambient.session();
        let db = Db::from_tx(session.shared().clone(), ctx);
        match AssertUnwindSafe(biz_fn(ctx.with_carrier(session), db))
            .catch_unwind()
            .await
        {
            Err(payload) => {
                rollback_to_savepoint(&shared, &name).await;
                resume_unwind(payload)
            }
            Ok(Err(err)) => {
                rollback_to_savepoint(&shared, &name).await;
                Err(err)
            }
            // On success the savepoint is left in place; the outer commit
            // absorbs it.
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn with_never<F, Fut>(&self, ctx: &TxContext, biz_fn: F) -> TxResult<()>
    where
        F: FnOnce(TxContext, Db) -> Fut + Send,
        Fut: Future<Output = TxResult<()>> + Send,
    {
        if live_carrier(ctx).await.is_some() {
            return Err(TxError::NeverInTransaction);
        }
        let db = self.pure_db(ctx);
        biz_fn(ctx.clone(), db).await
    }
}

async fn rollback_to_savepoint(shared: &SharedTx, name: &str) {
    if let Err(err) = shared.rollback_to(name).await {
        tracing::error!(savepoint = name, error = %err, "rollback to savepoint failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_propagation_is_required() {
        assert_eq!(Propagation::default(), Propagation::Required);
    }
}
