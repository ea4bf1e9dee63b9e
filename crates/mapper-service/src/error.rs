//! Error types for the mapping pipeline
//!
//! Every failure of a batch is returned as a [`BatchError`]. Its
//! [`ErrorClass`] tells the consumer whether the failure is confined to the
//! batch (a malformed payload) or whether it signals a problem with the
//! stores that the configured failure policy has to act on.

use mapper_common::types::ResolvedMapping;
use thiserror::Error;

/// How far the effects of a batch failure reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The batch is dropped and consumption continues
    Recoverable,
    /// The batch was rolled back and the failure policy decides what happens next
    Fatal,
}

/// The payload could not be turned into a batch of mapping records
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to parse incoming message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid mapping record at index {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

impl DecodeError {
    pub fn invalid_record(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            index,
            reason: reason.into(),
        }
    }
}

/// A stable id could not be mapped to exactly one file id
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Stable id must not be empty")]
    EmptyStableId,

    #[error("No file found for stable id '{0}'")]
    NotFound(String),

    #[error("Stable id '{0}' matches more than one file")]
    Ambiguous(String),

    #[error("Failed to select file id by stable id '{stable_id}': {source}")]
    Store {
        stable_id: String,
        #[source]
        source: sqlx::Error,
    },
}

/// A write-store operation failed
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("Failed to insert mapping {mapping}: {source}")]
    Insert {
        mapping: ResolvedMapping,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("Failed to roll back transaction: {0}")]
    Rollback(#[source] sqlx::Error),
}

/// Why a single batch was not committed
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl BatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BatchError::Decode(_) => ErrorClass::Recoverable,
            BatchError::Resolution(_) | BatchError::Write(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

/// Errors that stop the consumption loop
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Fatal error while processing delivery {delivery_tag}: {source}")]
    Fatal {
        delivery_tag: u64,
        #[source]
        source: BatchError,
    },

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Invalid broker URI: {0}")]
    InvalidUri(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] crate::broker::tls::TlsError),
}

impl ConsumerError {
    pub fn broker(err: impl std::fmt::Display) -> Self {
        Self::Broker(err.to_string())
    }
}
