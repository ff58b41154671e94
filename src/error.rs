//! Error types for the transaction propagation engine
//!
//! Groups the failure modes a caller can observe: configuration problems,
//! errors surfaced from the driver, propagation rule violations, and
//! business errors returned by user code.

use crate::pool::PoolError;

/// Result type alias for engine operations
pub type TxResult<T> = Result<T, TxError>;

/// Error type for all engine operations.
///
/// Business functions report their own failures through the [`TxError::Biz`]
/// variant; any `anyhow::Error` converts into it, so application code can
/// write `Err(anyhow!("insufficient funds").into())`. The engine treats any
/// error returned from a business function as the rollback trigger for the
/// frame that owns the transaction, and never swallows it.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// Missing or invalid connection configuration. Fatal at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Error surfaced unchanged from the underlying driver.
    #[error("driver error: {0}")]
    Driver(String),

    /// Connection pool failure (creation, begin, closed pool).
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// `Mandatory` propagation was requested outside a transaction.
    #[error("mandatory propagation must run inside a transaction")]
    MandatoryWithoutTransaction,

    /// `Never` propagation was requested inside a transaction.
    #[error("never propagation must not run inside a transaction")]
    NeverInTransaction,

    /// Commit was attempted on a carrier that is not in a transaction.
    #[error("not in a transaction, cannot commit")]
    CommitWithoutTransaction,

    /// Error returned by a business function.
    #[error(transparent)]
    Biz(#[from] anyhow::Error),
}

impl From<sqlx::Error> for TxError {
    fn from(err: sqlx::Error) -> Self {
        TxError::Driver(err.to_string())
    }
}
