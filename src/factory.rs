//! Database factories
//!
//! A [`DbFactory`] is the engine's sole source of database handles: a
//! context-bound [`Db`] view for non-transactional work, and the raw
//! [`ManagedDb`] used for BEGIN. Factories are built from creators and
//! cached process-wide by `(source, key)`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::backend_for;
use crate::cache;
use crate::config::ConnConfig;
use crate::context::{Db, TxContext};
use crate::error::TxResult;
use crate::pool::ManagedDb;

/// Produces database handles bound to a caller context.
pub trait DbFactory: Send + Sync {
    /// A context-bound view of the handle, for non-transactional reads and
    /// autocommit DML.
    fn db(&self, ctx: &TxContext) -> Db;

    /// The raw handle, used for BEGIN.
    fn origin_db(&self) -> Arc<ManagedDb>;
}

/// A cacheable creator of database handles.
///
/// `cache_source` separates kinds of creators; `cache_key` identifies the
/// endpoint, conventionally `host#port#database`.
#[async_trait]
pub trait CacheableDbCreator: Send + Sync {
    async fn create_db(&self) -> TxResult<ManagedDb>;

    fn cache_key(&self) -> String;

    fn cache_source(&self) -> &'static str;
}

/// Creator backed by a full [`ConnConfig`].
pub struct ConfigDbCreator {
    config: ConnConfig,
}

impl ConfigDbCreator {
    /// Defaults are applied eagerly, so a missing database name fails here.
    pub fn new(config: ConnConfig) -> TxResult<Self> {
        Ok(Self {
            config: config.patched()?,
        })
    }
}

#[async_trait]
impl CacheableDbCreator for ConfigDbCreator {
    async fn create_db(&self) -> TxResult<ManagedDb> {
        create_managed_db(&self.config).await
    }

    fn cache_key(&self) -> String {
        self.config.cache_key()
    }

    fn cache_source(&self) -> &'static str {
        "config_db"
    }
}

/// Creator backed by host/port/database/user/password.
#[derive(Debug)]
pub struct SimpleDbCreator {
    config: ConnConfig,
}

impl SimpleDbCreator {
    pub fn new(
        host: &str,
        port: u16,
        database: &str,
        user: &str,
        password: &str,
    ) -> TxResult<Self> {
        let config = ConnConfig {
            host: host.to_string(),
            port,
            database: database.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            ..Default::default()
        };
        Ok(Self {
            config: config.patched()?,
        })
    }
}

#[async_trait]
impl CacheableDbCreator for SimpleDbCreator {
    async fn create_db(&self) -> TxResult<ManagedDb> {
        create_managed_db(&self.config).await
    }

    fn cache_key(&self) -> String {
        self.config.cache_key()
    }

    fn cache_source(&self) -> &'static str {
        "simple_db"
    }
}

async fn create_managed_db(config: &ConnConfig) -> TxResult<ManagedDb> {
    let backend = backend_for(config.parsed_dialect()?)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        dialect = %config.dialect,
        "creating database pool"
    );
    let pool = backend.create_pool(config).await?;
    Ok(ManagedDb::new(pool, config.clone()))
}

/// Factory over a handle owned by the process-wide cache.
pub struct CachedDbFactory {
    db: Arc<ManagedDb>,
}

impl DbFactory for CachedDbFactory {
    fn db(&self, ctx: &TxContext) -> Db {
        Db::from_pool(self.db.clone(), ctx)
    }

    fn origin_db(&self) -> Arc<ManagedDb> {
        self.db.clone()
    }
}

/// Build a factory from any creator, routing creation through the
/// process-wide cache.
pub async fn cached_db_factory<C: CacheableDbCreator>(creator: C) -> TxResult<CachedDbFactory> {
    let source = creator.cache_source();
    let key = creator.cache_key();
    let db = cache::global()
        .get_or_create(source, &key, || creator.create_db())
        .await?;
    Ok(CachedDbFactory { db })
}

/// Build a factory from simple connection parameters.
pub async fn simple_db_factory(
    host: &str,
    port: u16,
    database: &str,
    user: &str,
    password: &str,
) -> TxResult<CachedDbFactory> {
    cached_db_factory(SimpleDbCreator::new(host, port, database, user, password)?).await
}

/// Build a factory from a [`ConnConfig`].
pub async fn config_db_factory(config: ConnConfig) -> TxResult<CachedDbFactory> {
    cached_db_factory(ConfigDbCreator::new(config)?).await
}

/// Get a context-bound handle from simple connection parameters.
pub async fn simple_db(
    host: &str,
    port: u16,
    database: &str,
    user: &str,
    password: &str,
    ctx: &TxContext,
) -> TxResult<Db> {
    let factory = simple_db_factory(host, port, database, user, password).await?;
    Ok(factory.db(ctx))
}

/// Get a context-bound handle from a [`ConnConfig`].
pub async fn config_db(config: ConnConfig, ctx: &TxContext) -> TxResult<Db> {
    let factory = config_db_factory(config).await?;
    Ok(factory.db(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TxError;

    #[test]
    fn simple_creator_keys_by_endpoint() {
        let creator = SimpleDbCreator::new("localhost", 3306, "appdb", "root", "secret").unwrap();
        assert_eq!(creator.cache_key(), "localhost#3306#appdb");
        assert_eq!(creator.cache_source(), "simple_db");
    }

    #[test]
    fn config_creator_patches_defaults() {
        let creator = ConfigDbCreator::new(ConnConfig {
            host: "db.internal".into(),
            database: "appdb".into(),
            dialect: "postgres".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(creator.cache_key(), "db.internal#5432#appdb");
        assert_eq!(creator.cache_source(), "config_db");
    }

    #[test]
    fn missing_database_fails_at_construction() {
        let err = SimpleDbCreator::new("localhost", 0, "", "root", "secret").unwrap_err();
        assert!(matches!(err, TxError::Configuration(_)));
    }
}
