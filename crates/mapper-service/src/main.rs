//! Mapper Service - Main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use mapper_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tracing::info;

use mapper_service::{
    broker::{AmqpDeliverySource, QueueConsumer},
    config::Config,
    db,
    mapping::{BatchOrchestrator, PgMappingWriter, PgReferenceResolver},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("mapper-service")
        .filter_directives("mapper_service=debug,amqprs=warn,sqlx=warn")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting mapper service");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        mode = %config.mode,
        queue = %config.broker.queue,
        verify_cert = config.broker.verify_cert,
        "Configuration loaded"
    );

    let write_pool = db::create_pool("write", &config.write_db).await?;
    let reference_pool = match &config.reference_db {
        Some(reference_db) => Some(db::create_pool("reference", reference_db).await?),
        None => None,
    };

    let writer = PgMappingWriter::new(write_pool.clone());
    let orchestrator = Arc::new(match &reference_pool {
        Some(pool) => {
            BatchOrchestrator::resolving(Arc::new(PgReferenceResolver::new(pool.clone())), writer)
        },
        None => BatchOrchestrator::direct(writer),
    });

    let source = AmqpDeliverySource::connect(&config.broker)
        .await
        .context("Failed to subscribe to the broker")?;

    let outcome = QueueConsumer::new(
        source,
        orchestrator,
        config.broker.ack_mode,
        config.failure_policy,
    )
    .run(shutdown_signal())
    .await;

    write_pool.close().await;
    if let Some(pool) = reference_pool {
        pool.close().await;
    }

    let stats = outcome?;
    info!(
        batches = stats.batches_committed,
        rows = stats.rows_committed,
        "Mapper service shut down gracefully"
    );

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current batch");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current batch");
        },
    }
}
