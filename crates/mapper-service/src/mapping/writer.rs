//! Transactional writes to the `filedataset` relation

use async_trait::async_trait;
use mapper_common::types::ResolvedMapping;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::WriteError;

/// Stages mapping rows inside a transaction and publishes them as a unit
///
/// Rows inserted into a transaction are invisible to other transactions
/// until `commit` returns; `rollback` discards them. A transaction that is
/// dropped without either is rolled back.
#[async_trait]
pub trait MappingWriter: Send + Sync {
    type Transaction: Send;

    async fn begin(&self) -> Result<Self::Transaction, WriteError>;

    async fn insert(
        &self,
        tx: &mut Self::Transaction,
        mapping: &ResolvedMapping,
    ) -> Result<(), WriteError>;

    async fn commit(&self, tx: Self::Transaction) -> Result<(), WriteError>;

    async fn rollback(&self, tx: Self::Transaction) -> Result<(), WriteError>;
}

const INSERT_FILEDATASET: &str =
    "INSERT INTO local_ega_ebi.filedataset (file_id, dataset_stable_id) VALUES ($1, $2)";

/// Writer backed by the write-store pool
#[derive(Debug, Clone)]
pub struct PgMappingWriter {
    pool: PgPool,
}

impl PgMappingWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingWriter for PgMappingWriter {
    type Transaction = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Transaction, WriteError> {
        self.pool.begin().await.map_err(WriteError::Begin)
    }

    async fn insert(
        &self,
        tx: &mut Self::Transaction,
        mapping: &ResolvedMapping,
    ) -> Result<(), WriteError> {
        sqlx::query(INSERT_FILEDATASET)
            .bind(mapping.file_id)
            .bind(&mapping.dataset_id)
            .execute(&mut **tx)
            .await
            .map_err(|source| WriteError::Insert {
                mapping: mapping.clone(),
                source,
            })?;

        Ok(())
    }

    async fn commit(&self, tx: Self::Transaction) -> Result<(), WriteError> {
        // On failure the dropped transaction is rolled back by the driver
        tx.commit().await.map_err(WriteError::Commit)
    }

    async fn rollback(&self, tx: Self::Transaction) -> Result<(), WriteError> {
        tx.rollback().await.map_err(WriteError::Rollback)
    }
}
