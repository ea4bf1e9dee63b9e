//! `Config::load` against the real process environment
//!
//! Tests mutate process-wide variables and are therefore serialised.

use mapper_common::types::MapperMode;
use mapper_service::config::{AckMode, Config, ConfigError, FailurePolicy, DEFAULT_QUEUE_NAME};
use serial_test::serial;

const VARS: &[&str] = &[
    "MAPPER_MODE",
    "DB_OUT_CONNECTION",
    "DB_IN_CONNECTION",
    "DB_MAX_CONNECTIONS",
    "DB_MIN_CONNECTIONS",
    "DB_CONNECT_TIMEOUT",
    "DB_IDLE_TIMEOUT",
    "MQ_CONNECTION",
    "QUEUE_NAME",
    "VERIFY_CERT",
    "MQ_CA_CERT",
    "MQ_ACK_MODE",
    "MQ_PREFETCH",
    "FAILURE_POLICY",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_load_resolve_mode_from_environment() {
    clear_env();
    std::env::set_var("DB_OUT_CONNECTION", "postgresql://lega_out:pw@db/lega");
    std::env::set_var("DB_IN_CONNECTION", "postgresql://lega_in:pw@db/lega");
    std::env::set_var("MQ_CONNECTION", "amqps://mq:5671/lega");

    let config = Config::load().expect("config should load");

    assert_eq!(config.mode, MapperMode::Resolve);
    assert_eq!(config.broker.queue, DEFAULT_QUEUE_NAME);
    assert!(config.broker.verify_cert);
    assert_eq!(config.broker.ack_mode, AckMode::Manual);
    assert_eq!(config.failure_policy, FailurePolicy::Halt);
    assert_eq!(
        config.reference_db.map(|db| db.url),
        Some("postgresql://lega_in:pw@db/lega".to_string())
    );

    clear_env();
}

#[test]
#[serial]
fn test_load_direct_mode_with_overrides() {
    clear_env();
    std::env::set_var("MAPPER_MODE", "direct");
    std::env::set_var("DB_OUT_CONNECTION", "postgresql://lega_out:pw@db/lega");
    std::env::set_var("MQ_CONNECTION", "amqp://mq");
    std::env::set_var("QUEUE_NAME", "stableIDs");
    std::env::set_var("VERIFY_CERT", "false");
    std::env::set_var("FAILURE_POLICY", "continue");

    let config = Config::load().expect("config should load");

    assert_eq!(config.mode, MapperMode::Direct);
    assert!(config.reference_db.is_none());
    assert_eq!(config.broker.queue, "stableIDs");
    assert!(!config.broker.verify_cert);
    assert_eq!(config.failure_policy, FailurePolicy::Continue);

    clear_env();
}

#[test]
#[serial]
fn test_load_fails_without_write_store() {
    clear_env();
    std::env::set_var("MQ_CONNECTION", "amqp://mq");

    assert_eq!(
        Config::load().unwrap_err(),
        ConfigError::Missing("DB_OUT_CONNECTION")
    );

    clear_env();
}
