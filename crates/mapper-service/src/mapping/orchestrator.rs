//! Batch orchestration: decode, resolve, write
//!
//! The orchestrator owns everything that lives longer than a single
//! delivery: the resolver (resolve-mode only), the writer and the gate that
//! keeps at most one batch in flight.
//!
//! Ordering is decode-then-begin. The payload is decoded before any
//! transaction is opened, so a malformed payload never touches the write
//! store. Resolution runs inside the open transaction, one record at a time,
//! and any resolution or write failure rolls the transaction back before
//! the error is returned.
//!
//! ```text
//! Idle -> Decoding -> (Resolving) -> Writing -> Committed | RolledBack -> Idle
//! ```

use std::sync::Arc;

use mapper_common::types::{MapperMode, MappingRecord, ResolvedMapping};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use super::decoder::{self, parse_file_id};
use super::resolver::ReferenceResolver;
use super::writer::MappingWriter;
use crate::error::{BatchError, DecodeError};

/// How records become [`ResolvedMapping`]s
#[derive(Clone)]
pub enum ResolveStrategy {
    /// Look every stable id up in the reference store
    Lookup(Arc<dyn ReferenceResolver>),
    /// Records already carry the file id
    Direct,
}

impl ResolveStrategy {
    pub fn mode(&self) -> MapperMode {
        match self {
            ResolveStrategy::Lookup(_) => MapperMode::Resolve,
            ResolveStrategy::Direct => MapperMode::Direct,
        }
    }
}

impl std::fmt::Debug for ResolveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResolveStrategy::{}", self.mode())
    }
}

/// Where a batch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Decoding,
    Resolving,
    Writing,
    Committed,
    RolledBack,
}

/// Result of a committed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows made visible by the commit
    pub rows: usize,
    pub state: BatchState,
}

/// Runs one delivery at a time through decode, resolve and write
pub struct BatchOrchestrator<W: MappingWriter> {
    strategy: ResolveStrategy,
    writer: W,
    gate: Mutex<()>,
}

impl<W: MappingWriter> BatchOrchestrator<W> {
    pub fn new(strategy: ResolveStrategy, writer: W) -> Self {
        Self {
            strategy,
            writer,
            gate: Mutex::new(()),
        }
    }

    /// Orchestrator for resolve-mode deployments
    pub fn resolving(resolver: Arc<dyn ReferenceResolver>, writer: W) -> Self {
        Self::new(ResolveStrategy::Lookup(resolver), writer)
    }

    /// Orchestrator for direct-mode deployments
    pub fn direct(writer: W) -> Self {
        Self::new(ResolveStrategy::Direct, writer)
    }

    pub fn mode(&self) -> MapperMode {
        self.strategy.mode()
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Process one delivered payload
    ///
    /// Waits for the gate first; callers are admitted in the order they
    /// started waiting. The gate is released when this returns, whatever
    /// the outcome.
    pub async fn process(&self, payload: &[u8]) -> Result<BatchReport, BatchError> {
        let _gate = self.gate.lock().await;

        let span = info_span!("batch", mode = %self.mode(), bytes = payload.len());
        self.run_batch(payload).instrument(span).await
    }

    async fn run_batch(&self, payload: &[u8]) -> Result<BatchReport, BatchError> {
        debug!(state = ?BatchState::Decoding, "Decoding batch");
        let records = match decoder::decode(self.mode(), payload) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming message, dropping batch");
                return Err(e.into());
            },
        };

        if records.is_empty() {
            info!("Received empty batch, nothing to store");
            return Ok(BatchReport {
                rows: 0,
                state: BatchState::Idle,
            });
        }

        let mut tx = self.writer.begin().await?;

        match self.stage(&mut tx, &records).await {
            Ok(mappings) => {
                self.writer.commit(tx).await?;
                info!(
                    rows = mappings.len(),
                    state = ?BatchState::Committed,
                    "Mappings stored"
                );
                debug!(mappings = ?mappings, "Committed mappings");
                Ok(BatchReport {
                    rows: mappings.len(),
                    state: BatchState::Committed,
                })
            },
            Err(e) => {
                if let Err(rollback_err) = self.writer.rollback(tx).await {
                    warn!(error = %rollback_err, "Rollback failed, transaction will be discarded");
                }
                warn!(error = %e, state = ?BatchState::RolledBack, "Batch rolled back");
                Err(e)
            },
        }
    }

    /// Resolve and insert every record into the open transaction
    async fn stage(
        &self,
        tx: &mut W::Transaction,
        records: &[MappingRecord],
    ) -> Result<Vec<ResolvedMapping>, BatchError> {
        let mut mappings = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let mapping = self.resolve(index, record).await?;
            self.writer.insert(tx, &mapping).await?;
            mappings.push(mapping);
        }

        debug!(state = ?BatchState::Writing, rows = mappings.len(), "All rows staged");
        Ok(mappings)
    }

    async fn resolve(
        &self,
        index: usize,
        record: &MappingRecord,
    ) -> Result<ResolvedMapping, BatchError> {
        let file_id = match (&self.strategy, record) {
            (ResolveStrategy::Lookup(resolver), MappingRecord::StableId(m)) => {
                debug!(state = ?BatchState::Resolving, stable_id = %m.stable_id, "Resolving stable id");
                resolver.resolve(&m.stable_id).await?
            },
            (ResolveStrategy::Direct, MappingRecord::FileId(m)) => parse_file_id(&m.file_id)
                .map_err(|reason| DecodeError::invalid_record(index, reason))?,
            (_, other) => {
                return Err(DecodeError::invalid_record(
                    index,
                    format!(
                        "record '{}' does not match {} mode",
                        other.file_reference(),
                        self.mode()
                    ),
                )
                .into())
            },
        };

        Ok(ResolvedMapping::new(file_id, record.dataset_id()))
    }
}
