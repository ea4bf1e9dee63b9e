//! Mapper Service Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Consumes file-to-dataset mapping messages from a broker queue and records
//! them in the `filedataset` table of the write store.
//!
//! # Overview
//!
//! - **Broker**: AMQP subscription, TLS setup and the consumption loop
//! - **Mapping**: decoding, stable id resolution and transactional writes
//! - **Database**: Postgres pools for the write and reference stores
//! - **Configuration**: environment-based configuration management
//!
//! # Architecture
//!
//! ```text
//! QueueConsumer -> BatchOrchestrator -> decode -> (ReferenceResolver) -> MappingWriter
//! ```
//!
//! Each delivery is one batch. A batch is committed in a single transaction
//! or not at all, and at most one batch is in flight at any time.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mapper_service::{
//!     broker::{AmqpDeliverySource, QueueConsumer},
//!     config::Config,
//!     db,
//!     mapping::{BatchOrchestrator, PgMappingWriter},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool("write", &config.write_db).await?;
//!     let orchestrator = Arc::new(BatchOrchestrator::direct(PgMappingWriter::new(pool)));
//!     let source = AmqpDeliverySource::connect(&config.broker).await?;
//!     QueueConsumer::new(source, orchestrator, config.broker.ack_mode, config.failure_policy)
//!         .run(std::future::pending())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod mapping;

// Re-export commonly used types
pub use error::{BatchError, ConsumerError, ErrorClass};
