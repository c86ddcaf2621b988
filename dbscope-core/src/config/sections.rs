//! Typed sections for the data layer's collaborators.
//!
//! Keys mirror the environment variables the services are deployed with:
//! `PG_HOST` maps to `pg.host`, `RD_MAX_IDLE_TIMEOUT_SEC` to
//! `rd.max.idle.timeout.sec`, and so on.

use std::time::Duration;

use super::typed::{ConfigProperties, PropertyMeta};
use super::{ConfigError, DbscopeConfig};

/// Connection settings for the Postgres store.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
}

impl PostgresConfig {
    /// libpq key/value connection string.
    pub fn dsn(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            self.host, self.port, self.db, self.user, self.password, self.ssl_mode
        )
    }

    /// `postgres://` URL, with credentials percent-encoded.
    pub fn url(&self) -> Result<String, ConfigError> {
        let invalid = |what: &str| ConfigError::Load(format!("cannot build postgres url: invalid {what}"));

        let mut url = url::Url::parse("postgres://localhost").map_err(|_| invalid("base"))?;
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        url.set_host(Some(&host)).map_err(|_| invalid("host"))?;
        url.set_port(Some(self.port)).map_err(|_| invalid("port"))?;
        url.set_username(&self.user).map_err(|_| invalid("user"))?;
        url.set_password(Some(&self.password)).map_err(|_| invalid("password"))?;
        url.set_path(&self.db);
        url.query_pairs_mut().append_pair("sslmode", &self.ssl_mode);
        Ok(url.into())
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl ConfigProperties for PostgresConfig {
    fn prefix() -> &'static str {
        "pg"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        vec![
            PropertyMeta::required("pg.host", "String", "postgres host"),
            PropertyMeta::required("pg.port", "u16", "postgres port"),
            PropertyMeta::required("pg.db", "String", "postgres database name"),
            PropertyMeta::required("pg.user", "String", "postgres user"),
            PropertyMeta::required("pg.password", "String", "postgres password"),
            PropertyMeta::required("pg.ssl.mode", "String", "postgres ssl mode"),
        ]
    }

    fn from_config(config: &DbscopeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            host: config.get("pg.host")?,
            port: config.get("pg.port")?,
            db: config.get("pg.db")?,
            user: config.get("pg.user")?,
            password: config.get("pg.password")?,
            ssl_mode: config.get("pg.ssl.mode")?,
        })
    }
}

/// Connection pool sizing for the database facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: None,
        }
    }
}

impl ConfigProperties for PoolConfig {
    fn prefix() -> &'static str {
        "pg.pool"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        vec![
            PropertyMeta::optional("pg.pool.max.connections", "u32", "pool size (default 10)"),
            PropertyMeta::optional(
                "pg.pool.acquire.timeout.sec",
                "seconds",
                "upper bound on waiting for a pooled connection (default 30)",
            ),
            PropertyMeta::optional("pg.pool.idle.timeout.sec", "seconds", "idle connection lifetime"),
        ]
    }

    fn from_config(config: &DbscopeConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_connections: config
                .get_opt("pg.pool.max.connections")?
                .unwrap_or(defaults.max_connections),
            acquire_timeout: config
                .get_opt("pg.pool.acquire.timeout.sec")?
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: config.get_opt("pg.pool.idle.timeout.sec")?,
        })
    }
}

/// Settings for the key-value cache collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub connection_timeout: Duration,
    pub max_idle: usize,
    pub idle_timeout: Duration,
}

impl CacheConfig {
    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

impl ConfigProperties for CacheConfig {
    fn prefix() -> &'static str {
        "rd"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        vec![
            PropertyMeta::required("rd.host", "String", "cache host"),
            PropertyMeta::required("rd.port", "u16", "cache port"),
            PropertyMeta::required("rd.connection.timeout.sec", "seconds", "dial timeout"),
            PropertyMeta::required("rd.max.idle", "usize", "idle connections kept"),
            PropertyMeta::required("rd.max.idle.timeout.sec", "seconds", "idle connection lifetime"),
        ]
    }

    fn from_config(config: &DbscopeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            host: config.get("rd.host")?,
            port: config.get("rd.port")?,
            connection_timeout: config.get("rd.connection.timeout.sec")?,
            max_idle: config.get("rd.max.idle")?,
            idle_timeout: config.get("rd.max.idle.timeout.sec")?,
        })
    }
}
