//! Process-wide connection cache
//!
//! Maps `(source, key)` to a [`ManagedDb`]. Creation is serialized so that
//! at most one creation per key ever runs; a failed creation inserts
//! nothing and a later call retries. Entries live until process teardown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::error::TxResult;
use crate::pool::ManagedDb;

static GLOBAL: Lazy<DbCache> = Lazy::new(DbCache::new);

/// The process-wide cache used by the factory constructors.
pub fn global() -> &'static DbCache {
    &GLOBAL
}

/// Cache of database handles keyed by `(source, key)`.
pub struct DbCache {
    entries: Mutex<HashMap<(String, String), Arc<ManagedDb>>>,
}

impl DbCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `(source, key)`, or run `create` and
    /// insert its result.
    ///
    /// The cache lock is held across creation, so concurrent callers for the
    /// same key (or any key) wait for the in-flight creation instead of
    /// racing their own.
    pub async fn get_or_create<F, Fut>(
        &self,
        source: &str,
        key: &str,
        create: F,
    ) -> TxResult<Arc<ManagedDb>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TxResult<ManagedDb>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(db) = entries.get(&(source.to_string(), key.to_string())) {
            return Ok(db.clone());
        }
        let db = Arc::new(create().await?);
        entries.insert((source.to_string(), key.to_string()), db.clone());
        tracing::debug!(source, key, "cached new database handle");
        Ok(db)
    }

    /// Number of cached handles.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for DbCache {
    fn default() -> Self {
        Self::new()
    }
}
