//! Configuration management
//!
//! Everything is read from the environment (a `.env` file is honoured).
//! See [`Config::load`] for the full list of variables.

use std::path::PathBuf;
use std::str::FromStr;

use mapper_common::types::MapperMode;
use thiserror::Error;

use crate::db::DbConfig;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Queue consumed when `QUEUE_NAME` is not set.
pub const DEFAULT_QUEUE_NAME: &str = "mappings";

/// Prefetch window used with manual acknowledgment.
pub const DEFAULT_PREFETCH: u16 = 1;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Inconsistent(String),
}

/// When deliveries are acknowledged to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The broker forgets a delivery as soon as it is sent; a crash
    /// mid-batch loses that batch.
    Auto,
    /// Deliveries are acknowledged once their batch is settled; a crash
    /// mid-batch leads to redelivery.
    #[default]
    Manual,
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(AckMode::Auto),
            "manual" | "explicit" => Ok(AckMode::Manual),
            other => Err(format!("expected 'auto' or 'manual', got '{}'", other)),
        }
    }
}

impl std::fmt::Display for AckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckMode::Auto => write!(f, "auto"),
            AckMode::Manual => write!(f, "manual"),
        }
    }
}

/// What the consumer does after a fatal batch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop consuming and exit with an error
    #[default]
    Halt,
    /// Log, reject the delivery and keep consuming
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "halt" | "exit" => Ok(FailurePolicy::Halt),
            "continue" | "skip" => Ok(FailurePolicy::Continue),
            other => Err(format!("expected 'halt' or 'continue', got '{}'", other)),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Halt => write!(f, "halt"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// `amqp://` or `amqps://` URI
    pub url: String,
    pub queue: String,
    /// Verify the broker's TLS certificate (amqps only)
    pub verify_cert: bool,
    /// Extra PEM bundle trusted in addition to the built-in roots
    pub ca_cert: Option<PathBuf>,
    pub ack_mode: AckMode,
    pub prefetch: u16,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mode: MapperMode,
    /// Write store (`DB_OUT_CONNECTION`)
    pub write_db: DbConfig,
    /// Reference store (`DB_IN_CONNECTION`), resolve-mode only
    pub reference_db: Option<DbConfig>,
    pub broker: BrokerConfig,
    pub failure_policy: FailurePolicy,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `MAPPER_MODE` (`resolve`, `direct`) | `resolve` |
    /// | `DB_OUT_CONNECTION` | required |
    /// | `DB_IN_CONNECTION` | required in resolve-mode |
    /// | `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` | 5, 1 |
    /// | `DB_CONNECT_TIMEOUT`, `DB_IDLE_TIMEOUT` | 30, 600 |
    /// | `MQ_CONNECTION` | required |
    /// | `QUEUE_NAME` | `mappings` |
    /// | `VERIFY_CERT` | `true` |
    /// | `MQ_CA_CERT` | unset |
    /// | `MQ_ACK_MODE` (`auto`, `manual`) | `manual` |
    /// | `MQ_PREFETCH` | 1 |
    /// | `FAILURE_POLICY` (`halt`, `continue`) | `halt` |
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match non_empty(&lookup, "MAPPER_MODE") {
            Some(value) => value.parse().map_err(|e: mapper_common::MapperError| {
                ConfigError::Invalid {
                    var: "MAPPER_MODE",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => MapperMode::default(),
        };

        let write_db = DbConfig::from_lookup("DB_OUT_CONNECTION", &lookup)?;
        let reference_db = if mode.requires_resolution() {
            Some(DbConfig::from_lookup("DB_IN_CONNECTION", &lookup)?)
        } else {
            None
        };

        let broker = BrokerConfig {
            url: non_empty(&lookup, "MQ_CONNECTION").ok_or(ConfigError::Missing("MQ_CONNECTION"))?,
            queue: non_empty(&lookup, "QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            verify_cert: parse_bool(&lookup, "VERIFY_CERT")?.unwrap_or(true),
            ca_cert: non_empty(&lookup, "MQ_CA_CERT").map(PathBuf::from),
            ack_mode: parse_var(&lookup, "MQ_ACK_MODE")?.unwrap_or_default(),
            prefetch: parse_var(&lookup, "MQ_PREFETCH")?.unwrap_or(DEFAULT_PREFETCH),
        };

        let config = Config {
            mode,
            write_db,
            reference_db,
            broker,
            failure_policy: parse_var(&lookup, "FAILURE_POLICY")?.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode.requires_resolution() && self.reference_db.is_none() {
            return Err(ConfigError::Missing("DB_IN_CONNECTION"));
        }

        let scheme = self.broker.url.split("://").next().unwrap_or_default();
        if !matches!(scheme, "amqp" | "amqps") {
            return Err(ConfigError::Invalid {
                var: "MQ_CONNECTION",
                value: redact_url(&self.broker.url),
                reason: "expected an amqp:// or amqps:// URI".to_string(),
            });
        }

        if self.broker.queue.trim().is_empty() {
            return Err(ConfigError::Inconsistent("QUEUE_NAME cannot be empty".to_string()));
        }

        if self.broker.ack_mode == AckMode::Manual && self.broker.prefetch == 0 {
            return Err(ConfigError::Inconsistent(
                "MQ_PREFETCH must be greater than 0 with manual acknowledgment".to_string(),
            ));
        }

        if !self.broker.verify_cert {
            tracing::warn!(
                "VERIFY_CERT=false: broker TLS certificates will NOT be verified, \
                 connections are open to interception"
            );
        }

        if self.broker.ack_mode == AckMode::Auto {
            tracing::warn!(
                "MQ_ACK_MODE=auto: a batch in flight when the process stops will not be redelivered"
            );
        }

        Ok(())
    }
}

/// Mask the password of a connection string for logging
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                // Only fails for URLs that cannot carry credentials
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        },
        Err(_) => "<unparsable connection string>".to_string(),
    }
}

fn non_empty<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var).filter(|v| !v.trim().is_empty())
}

/// Parse an optional variable, rejecting values that do not parse
pub(crate) fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool<F>(lookup: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, var)
        .map(|value| match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value: value.clone(),
                reason: "expected true or false".to_string(),
            }),
        })
        .transpose()
}
