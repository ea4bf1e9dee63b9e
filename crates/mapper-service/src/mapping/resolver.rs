//! Stable id to file id resolution against the reference store

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::ResolutionError;

/// Looks up the internal file id for a stable id
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Resolve `stable_id` to exactly one file id
    async fn resolve(&self, stable_id: &str) -> Result<i64, ResolutionError>;
}

/// Selects at most two rows so that duplicates are detected without
/// scanning every match.
const SELECT_FILE_ID_BY_STABLE_ID: &str =
    "SELECT id::bigint FROM local_ega.files WHERE stable_id = $1 LIMIT 2";

/// Read-only resolver backed by the `local_ega.files` table
#[derive(Debug, Clone)]
pub struct PgReferenceResolver {
    pool: PgPool,
}

impl PgReferenceResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceResolver for PgReferenceResolver {
    async fn resolve(&self, stable_id: &str) -> Result<i64, ResolutionError> {
        if stable_id.is_empty() {
            return Err(ResolutionError::EmptyStableId);
        }

        let ids: Vec<i64> = sqlx::query_scalar(SELECT_FILE_ID_BY_STABLE_ID)
            .bind(stable_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| ResolutionError::Store {
                stable_id: stable_id.to_string(),
                source,
            })?;

        single_match(stable_id, &ids)
    }
}

/// Reduce the matching ids to the single id a stable id must map to
pub(crate) fn single_match(stable_id: &str, ids: &[i64]) -> Result<i64, ResolutionError> {
    match ids {
        [id] => Ok(*id),
        [] => Err(ResolutionError::NotFound(stable_id.to_string())),
        _ => Err(ResolutionError::Ambiguous(stable_id.to_string())),
    }
}
