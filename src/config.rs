//! Connection configuration
//!
//! User-supplied connection parameters with defaulting. An empty database
//! name is a hard configuration error; every other missing field is patched
//! from [`ConnConfig::default`].

use serde::{Deserialize, Serialize};

use crate::backends::Dialect;
use crate::error::{TxError, TxResult};

/// Default configuration group tag.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Connection parameters for a database endpoint.
///
/// Zero-valued numeric fields and empty string fields are treated as unset
/// and receive defaults when the config is [`patched`](ConnConfig::patched).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
    pub conn_max_lifetime_sec: u64,
    pub db_log: bool,
    pub dialect: String,
}

impl ConnConfig {
    /// Returns a copy with defaults applied to every unset field.
    ///
    /// The default port follows the dialect: 3306 for MySQL, 5432 otherwise.
    /// An empty `database` is rejected here rather than at connect time so
    /// that misconfiguration fails at construction.
    pub fn patched(&self) -> TxResult<ConnConfig> {
        let mut config = self.clone();
        if config.database.is_empty() {
            return Err(TxError::Configuration("database must be set".into()));
        }
        if config.dialect.is_empty() {
            config.dialect = "mysql".into();
        }
        let dialect = config.parsed_dialect()?;
        if config.port == 0 {
            config.port = dialect.default_port();
        }
        if config.max_idle_conns == 0 {
            config.max_idle_conns = 5;
        }
        if config.max_open_conns == 0 {
            config.max_open_conns = 20;
        }
        if config.conn_max_lifetime_sec == 0 {
            config.conn_max_lifetime_sec = 3600;
        }
        Ok(config)
    }

    /// Parses the dialect tag into a [`Dialect`].
    pub fn parsed_dialect(&self) -> TxResult<Dialect> {
        self.dialect
            .parse()
            .map_err(|err: String| TxError::Configuration(err))
    }

    /// Cache key identifying this endpoint, conventionally
    /// `host#port#database`.
    pub fn cache_key(&self) -> String {
        format!("{}#{}#{}", self.host, self.port, self.database)
    }
}
