//! Postgres connection pools
//!
//! The service holds two pools: the write store (`DB_OUT_CONNECTION`) and,
//! in resolve-mode, the read-only reference store (`DB_IN_CONNECTION`).
//! Both share the pool sizing variables.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

use crate::config::{parse_var, redact_url, ConfigError};

/// Default maximum database connections in each pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in each pool.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Default time to wait for a pooled connection, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds (10 minutes).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to connect to the {store} store at {url}: {source}")]
    Connect {
        store: &'static str,
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }

    /// Read a pool configuration whose URL lives in `url_var`
    pub fn from_lookup<F>(url_var: &'static str, lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(url_var)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing(url_var))?;

        let mut config = Self::new(url);

        if let Some(max) = parse_var(lookup, "DB_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(min) = parse_var(lookup, "DB_MIN_CONNECTIONS")? {
            config.min_connections = min;
        }
        if let Some(timeout) = parse_var(lookup, "DB_CONNECT_TIMEOUT")? {
            config.connect_timeout_secs = timeout;
        }
        if let Some(idle) = parse_var::<u64, _>(lookup, "DB_IDLE_TIMEOUT")? {
            config.idle_timeout_secs = (idle > 0).then_some(idle);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Inconsistent(
                "DB_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::Inconsistent(format!(
                "DB_MIN_CONNECTIONS ({}) cannot be greater than DB_MAX_CONNECTIONS ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }
}

/// Build a pool and verify the store is reachable
///
/// `store` names the pool in logs and errors ("write" or "reference").
pub async fn create_pool(store: &'static str, config: &DbConfig) -> DbResult<PgPool> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options
        .connect(&config.url)
        .await
        .map_err(|source| DbError::Connect {
            store,
            url: redact_url(&config.url),
            source,
        })?;

    tracing::info!(
        store,
        url = %redact_url(&config.url),
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}
