//! In-memory resolver and writer for exercising the pipeline without
//! Postgres.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use mapper_service::mapping::{testing::{MemoryResolver, MemoryStore}, BatchOrchestrator};
//!
//! # tokio_test::block_on(async {
//! let resolver = MemoryResolver::new().with_file("EGAF001", 42);
//! let store = MemoryStore::new();
//! let orchestrator = BatchOrchestrator::resolving(Arc::new(resolver), store.clone());
//!
//! orchestrator
//!     .process(br#"[{"stableId":"EGAF001","datasetId":"EGAD001"}]"#)
//!     .await
//!     .unwrap();
//! assert_eq!(store.committed().len(), 1);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use mapper_common::types::ResolvedMapping;

use super::resolver::{single_match, ReferenceResolver};
use super::writer::MappingWriter;
use crate::error::{ResolutionError, WriteError};

/// Resolver answering from a fixed stable id table
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    files: Arc<HashMap<String, Vec<i64>>>,
    calls: Arc<AtomicUsize>,
    unavailable: bool,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file; registering a stable id twice makes it ambiguous
    pub fn with_file(mut self, stable_id: &str, file_id: i64) -> Self {
        Arc::make_mut(&mut self.files)
            .entry(stable_id.to_string())
            .or_default()
            .push(file_id);
        self
    }

    /// Make every lookup fail as if the reference store were down
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Number of lookups performed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceResolver for MemoryResolver {
    async fn resolve(&self, stable_id: &str) -> Result<i64, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if stable_id.is_empty() {
            return Err(ResolutionError::EmptyStableId);
        }
        if self.unavailable {
            return Err(ResolutionError::Store {
                stable_id: stable_id.to_string(),
                source: sqlx::Error::PoolTimedOut,
            });
        }

        let ids = self.files.get(stable_id).map(Vec::as_slice).unwrap_or(&[]);
        single_match(stable_id, ids)
    }
}

/// Observable operations on a [`MemoryStore`], in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Begin(u64),
    Insert(u64, ResolvedMapping),
    Commit(u64),
    Rollback(u64),
}

impl StoreEvent {
    pub fn transaction(&self) -> u64 {
        match self {
            StoreEvent::Begin(tx)
            | StoreEvent::Insert(tx, _)
            | StoreEvent::Commit(tx)
            | StoreEvent::Rollback(tx) => *tx,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    committed: Vec<ResolvedMapping>,
    commits: Vec<Vec<ResolvedMapping>>,
    events: Vec<StoreEvent>,
    next_tx: u64,
    open: usize,
    max_open: usize,
}

/// Writer keeping committed rows in memory with transactional visibility
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    fail_insert_for: Option<i64>,
    fail_commit: bool,
}

/// Rows staged by one [`MemoryStore`] transaction
#[derive(Debug)]
pub struct MemoryTransaction {
    id: u64,
    staged: Vec<ResolvedMapping>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any insert of the given file id
    pub fn failing_insert_for(mut self, file_id: i64) -> Self {
        self.fail_insert_for = Some(file_id);
        self
    }

    /// Fail every commit
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Rows visible outside any transaction
    pub fn committed(&self) -> Vec<ResolvedMapping> {
        self.lock().committed.clone()
    }

    /// Rows of each successful commit, one entry per transaction
    pub fn commits(&self) -> Vec<Vec<ResolvedMapping>> {
        self.lock().commits.clone()
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.lock().events.clone()
    }

    /// Highest number of transactions that were open at the same time
    pub fn max_concurrent_transactions(&self) -> usize {
        self.lock().max_open
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self, event: StoreEvent) {
        let mut state = self.lock();
        state.open = state.open.saturating_sub(1);
        state.events.push(event);
    }
}

#[async_trait]
impl MappingWriter for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, WriteError> {
        let mut state = self.lock();
        state.next_tx += 1;
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        let id = state.next_tx;
        state.events.push(StoreEvent::Begin(id));

        Ok(MemoryTransaction {
            id,
            staged: Vec::new(),
        })
    }

    async fn insert(
        &self,
        tx: &mut Self::Transaction,
        mapping: &ResolvedMapping,
    ) -> Result<(), WriteError> {
        // Give concurrently running batches a chance to interleave
        tokio::task::yield_now().await;

        if self.fail_insert_for == Some(mapping.file_id) {
            return Err(WriteError::Insert {
                mapping: mapping.clone(),
                source: sqlx::Error::Protocol("simulated insert failure".to_string()),
            });
        }

        self.lock()
            .events
            .push(StoreEvent::Insert(tx.id, mapping.clone()));
        tx.staged.push(mapping.clone());
        Ok(())
    }

    async fn commit(&self, tx: Self::Transaction) -> Result<(), WriteError> {
        if self.fail_commit {
            self.close(StoreEvent::Rollback(tx.id));
            return Err(WriteError::Commit(sqlx::Error::Protocol(
                "simulated commit failure".to_string(),
            )));
        }

        {
            let mut state = self.lock();
            state.committed.extend(tx.staged.iter().cloned());
            state.commits.push(tx.staged.clone());
        }
        self.close(StoreEvent::Commit(tx.id));
        Ok(())
    }

    async fn rollback(&self, tx: Self::Transaction) -> Result<(), WriteError> {
        self.close(StoreEvent::Rollback(tx.id));
        Ok(())
    }
}
