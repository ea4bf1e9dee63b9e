//! Common test utilities for mapper integration tests
//!
//! Postgres tests run against a throwaway container with the archive
//! schema from `fixtures/schema.sql` applied.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     let file_id = pg.insert_file("EGAF001").await.expect("seed failed");
//!     assert!(file_id > 0);
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../fixtures/schema.sql");

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the archive schema applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to apply schema")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Register an archived file and return its id
    pub async fn insert_file(&self, stable_id: &str) -> Result<i64> {
        let id: i32 = sqlx::query_scalar("INSERT INTO local_ega.files (stable_id) VALUES ($1) RETURNING id")
            .bind(stable_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert file")?;
        Ok(i64::from(id))
    }

    /// Committed mappings as `(file_id, dataset_stable_id)`, in insert order
    pub async fn mappings(&self) -> Result<Vec<(i64, String)>> {
        let rows: Vec<(i32, String)> = sqlx::query_as(
            "SELECT file_id, dataset_stable_id FROM local_ega_ebi.filedataset ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read filedataset")?;

        Ok(rows.into_iter().map(|(id, ds)| (i64::from(id), ds)).collect())
    }
}

/// Initialize tracing for tests
///
/// Call this at the start of tests to see log output. Only the first call
/// takes effect.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,mapper_service=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
