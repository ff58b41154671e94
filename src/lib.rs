//! # sqltx: transaction propagation for SQL databases
//!
//! A transaction propagation engine in the Spring style: business functions
//! declare how they participate in the ambient database transaction
//! (required, supports, mandatory, requires-new, not-supported, nested,
//! never) and the engine issues the right combination of BEGIN / COMMIT /
//! ROLLBACK / SAVEPOINT commands against the driver, however deeply calls
//! nest and however failures propagate. Returned errors and unwinding
//! panics both roll back the owning frame before continuing outward.
//!
//! The crate is organized as:
//! - `backends/`: the driver contract and the sqlx PostgreSQL/MySQL
//!   implementations
//! - `cache` / `pool`: process-wide handle cache and the managed pool
//!   wrapper it stores
//! - `factory`: creators and factories producing context-bound handles
//! - `context`: the carrier threaded through nested calls
//! - `propagation`: the state machine
//! - `manager`: the public entrypoint

pub mod backends;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod manager;
pub mod pool;
pub mod propagation;

pub use backends::{
    Dialect, DriverBackend, DriverPool, DriverRow, DriverTransaction, PoolStats, SqlValue,
};
pub use config::{ConnConfig, DEFAULT_GROUP};
pub use context::{Carrier, Db, TxContext};
pub use error::{TxError, TxResult};
pub use factory::{
    cached_db_factory, config_db, config_db_factory, simple_db, simple_db_factory,
    CacheableDbCreator, CachedDbFactory, DbFactory,
};
pub use manager::TransactionManager;
pub use pool::{DbStats, ManagedDb, PoolError};
pub use propagation::Propagation;
