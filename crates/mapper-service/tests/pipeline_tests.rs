//! End-to-end pipeline behaviour against in-memory stores
//!
//! Deliveries are fed through a channel-backed source so the consumer loop,
//! the orchestrator and the stores run exactly as they do in production,
//! minus the broker and Postgres.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;

use mapper_common::types::ResolvedMapping;
use mapper_service::broker::{Delivery, DeliverySource, QueueConsumer};
use mapper_service::config::{AckMode, FailurePolicy};
use mapper_service::error::{ConsumerError, ResolutionError};
use mapper_service::mapping::testing::{MemoryResolver, MemoryStore, StoreEvent};
use mapper_service::mapping::BatchOrchestrator;
use mapper_service::BatchError;

// ============================================================================
// Channel-backed delivery source
// ============================================================================

#[derive(Debug, Default)]
struct Settlements {
    acked: Vec<u64>,
    rejected: Vec<u64>,
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Delivery>,
    settlements: Arc<Mutex<Settlements>>,
}

#[async_trait]
impl DeliverySource for ChannelSource {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        Ok(self.rx.recv().await)
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), ConsumerError> {
        self.settlements.lock().unwrap().acked.push(delivery.tag);
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery) -> Result<(), ConsumerError> {
        self.settlements.lock().unwrap().rejected.push(delivery.tag);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        self.rx.close();
        Ok(())
    }
}

struct Broker {
    tx: mpsc::UnboundedSender<Delivery>,
    next_tag: u64,
    settlements: Arc<Mutex<Settlements>>,
}

impl Broker {
    fn new() -> (Self, ChannelSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        let settlements = Arc::new(Mutex::new(Settlements::default()));
        let source = ChannelSource {
            rx,
            settlements: settlements.clone(),
        };
        (
            Self {
                tx,
                next_tag: 0,
                settlements,
            },
            source,
        )
    }

    fn publish(&mut self, payload: &[u8]) {
        self.next_tag += 1;
        self.tx
            .send(Delivery {
                tag: self.next_tag,
                payload: payload.to_vec(),
                redelivered: false,
            })
            .unwrap();
    }

    fn acked(&self) -> Vec<u64> {
        self.settlements.lock().unwrap().acked.clone()
    }

    fn rejected(&self) -> Vec<u64> {
        self.settlements.lock().unwrap().rejected.clone()
    }
}

fn consumer(
    source: ChannelSource,
    orchestrator: BatchOrchestrator<MemoryStore>,
    policy: FailurePolicy,
) -> QueueConsumer<ChannelSource, MemoryStore> {
    QueueConsumer::new(source, Arc::new(orchestrator), AckMode::Manual, policy)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_resolved_row_is_committed() {
    let store = MemoryStore::new();
    let resolver = MemoryResolver::new().with_file("EGAF001", 42);
    let (mut broker, source) = Broker::new();

    broker.publish(br#"[{"stableId":"EGAF001","datasetId":"EGAD001"}]"#);
    let settlements = broker.settlements.clone();
    // Closing the channel ends the subscription once the delivery is consumed
    drop(broker);

    let orchestrator = BatchOrchestrator::resolving(Arc::new(resolver), store.clone());
    let stats = consumer(source, orchestrator, FailurePolicy::Halt)
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(stats.rows_committed, 1);
    assert_eq!(store.committed(), vec![ResolvedMapping::new(42, "EGAD001")]);
    assert_eq!(settlements.lock().unwrap().acked, vec![1]);
}

#[tokio::test]
async fn test_direct_mode_skips_resolution() {
    let store = MemoryStore::new();
    let resolver = MemoryResolver::new();
    let (mut broker, source) = Broker::new();

    broker.publish(br#"[{"fileId":"42","datasetId":"EGAD001"}]"#);
    let settlements = broker.settlements.clone();
    drop(broker);

    let stats = consumer(source, BatchOrchestrator::direct(store.clone()), FailurePolicy::Halt)
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(stats.batches_committed, 1);
    assert_eq!(store.committed(), vec![ResolvedMapping::new(42, "EGAD001")]);
    assert_eq!(resolver.calls(), 0);
    assert_eq!(settlements.lock().unwrap().acked, vec![1]);
}

#[tokio::test]
async fn test_malformed_delivery_does_not_stop_consumption() {
    let store = MemoryStore::new();
    let resolver = MemoryResolver::new().with_file("EGAF001", 42);
    let (mut broker, source) = Broker::new();

    broker.publish(b"not-json");
    broker.publish(br#"[{"stableId":"EGAF001","datasetId":"EGAD001"}]"#);

    let orchestrator = BatchOrchestrator::resolving(Arc::new(resolver), store.clone());
    let running = tokio::spawn(consumer(source, orchestrator, FailurePolicy::Halt).run(std::future::pending()));

    // Wait until both deliveries are settled, then end the subscription
    while broker.acked().len() < 2 {
        tokio::task::yield_now().await;
    }
    let acked = broker.acked();
    drop(broker);

    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.batches_discarded, 1);
    assert_eq!(stats.batches_committed, 1);
    assert_eq!(acked, vec![1, 2]);
    assert_eq!(store.committed(), vec![ResolvedMapping::new(42, "EGAD001")]);
}

#[tokio::test]
async fn test_unknown_stable_id_halts_consumer() {
    let store = MemoryStore::new();
    let resolver = MemoryResolver::new();
    let (mut broker, source) = Broker::new();

    broker.publish(br#"[{"stableId":"UNKNOWN","datasetId":"X"}]"#);
    broker.publish(br#"[{"stableId":"UNKNOWN","datasetId":"Y"}]"#);

    let orchestrator = BatchOrchestrator::resolving(Arc::new(resolver.clone()), store.clone());
    let err = consumer(source, orchestrator, FailurePolicy::Halt)
        .run(std::future::pending())
        .await
        .unwrap_err();

    match err {
        ConsumerError::Fatal {
            delivery_tag,
            source: BatchError::Resolution(ResolutionError::NotFound(id)),
        } => {
            assert_eq!(delivery_tag, 1);
            assert_eq!(id, "UNKNOWN");
        },
        other => panic!("unexpected error: {other}"),
    }

    assert!(store.committed().is_empty());
    assert!(matches!(store.events().last(), Some(StoreEvent::Rollback(_))));
    assert!(broker.acked().is_empty(), "failed delivery must stay unacknowledged");
    assert_eq!(resolver.calls(), 1, "second delivery must not be processed");
}

#[tokio::test]
async fn test_unknown_stable_id_with_continue_policy() {
    let store = MemoryStore::new();
    let resolver = MemoryResolver::new().with_file("EGAF001", 1);
    let (mut broker, source) = Broker::new();

    broker.publish(br#"[{"stableId":"UNKNOWN","datasetId":"X"}]"#);
    broker.publish(br#"[{"stableId":"EGAF001","datasetId":"X"}]"#);

    let orchestrator = BatchOrchestrator::resolving(Arc::new(resolver), store.clone());
    let running = tokio::spawn(consumer(source, orchestrator, FailurePolicy::Continue).run(std::future::pending()));

    while broker.acked().len() + broker.rejected().len() < 2 {
        tokio::task::yield_now().await;
    }
    let (acked, rejected) = (broker.acked(), broker.rejected());
    drop(broker);

    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(rejected, vec![1]);
    assert_eq!(acked, vec![2]);
    assert_eq!(store.committed(), vec![ResolvedMapping::new(1, "X")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_never_share_a_transaction() {
    let store = MemoryStore::new();
    let orchestrator = Arc::new(BatchOrchestrator::direct(store.clone()));

    let batches = [
        br#"[{"fileId":"1","datasetId":"A"},{"fileId":"2","datasetId":"A"},{"fileId":"3","datasetId":"A"}]"#.as_slice(),
        br#"[{"fileId":"4","datasetId":"B"},{"fileId":"5","datasetId":"B"},{"fileId":"6","datasetId":"B"}]"#.as_slice(),
    ];

    let results = join_all(batches.iter().map(|payload| {
        let orchestrator = orchestrator.clone();
        let payload = payload.to_vec();
        tokio::spawn(async move { orchestrator.process(&payload).await })
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().rows, 3);
    }

    assert_eq!(store.committed().len(), 6);
    assert_eq!(store.max_concurrent_transactions(), 1);

    let commits = store.commits();
    assert_eq!(commits.len(), 2);
    for rows in &commits {
        assert_eq!(rows.len(), 3);
        let dataset = &rows[0].dataset_id;
        assert!(rows.iter().all(|r| &r.dataset_id == dataset), "batches were merged: {rows:?}");
    }

    // Every transaction runs begin..commit without another one in between
    let events = store.events();
    for window in events.windows(2) {
        if !matches!(window[0], StoreEvent::Commit(_)) {
            assert_eq!(window[0].transaction(), window[1].transaction(), "interleaved: {events:?}");
        }
    }
}

#[tokio::test]
async fn test_shutdown_finishes_without_new_deliveries() {
    let store = MemoryStore::new();
    let (mut broker, source) = Broker::new();
    broker.publish(br#"[{"fileId":"7","datasetId":"D"}]"#);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = async move {
        let _ = stop_rx.await;
    };

    let running = tokio::spawn(
        consumer(source, BatchOrchestrator::direct(store.clone()), FailurePolicy::Halt).run(shutdown),
    );

    while broker.acked().is_empty() {
        tokio::task::yield_now().await;
    }
    stop_tx.send(()).unwrap();

    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.deliveries, 1);
    assert_eq!(store.committed(), vec![ResolvedMapping::new(7, "D")]);
    drop(broker);
}
