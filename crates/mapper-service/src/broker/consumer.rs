//! Sequential queue consumption
//!
//! [`QueueConsumer`] pulls one delivery at a time from a [`DeliverySource`]
//! and hands it to the [`BatchOrchestrator`]. The next delivery is not
//! requested until the current batch has been settled, so a slow store slows
//! consumption down instead of piling up work in memory.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::{AckMode, FailurePolicy};
use crate::error::{ConsumerError, ErrorClass};
use crate::mapping::{BatchOrchestrator, MappingWriter};

/// One message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker delivery tag, used for acknowledgment
    pub tag: u64,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// A subscription delivering messages in broker order
#[async_trait]
pub trait DeliverySource: Send {
    /// Wait for the next delivery; `None` once the subscription has ended
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, ConsumerError>;

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), ConsumerError>;

    /// Reject a delivery without requeueing it
    async fn reject(&mut self, delivery: &Delivery) -> Result<(), ConsumerError>;

    async fn close(&mut self) -> Result<(), ConsumerError>;
}

/// Counters reported when the consumer stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub deliveries: u64,
    pub batches_committed: u64,
    pub rows_committed: u64,
    pub batches_discarded: u64,
    pub batches_failed: u64,
}

pub struct QueueConsumer<S: DeliverySource, W: MappingWriter> {
    source: S,
    orchestrator: Arc<BatchOrchestrator<W>>,
    ack_mode: AckMode,
    failure_policy: FailurePolicy,
    stats: ConsumerStats,
}

impl<S: DeliverySource, W: MappingWriter> QueueConsumer<S, W> {
    pub fn new(
        source: S,
        orchestrator: Arc<BatchOrchestrator<W>>,
        ack_mode: AckMode,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            source,
            orchestrator,
            ack_mode,
            failure_policy,
            stats: ConsumerStats::default(),
        }
    }

    /// Consume until the subscription ends, `shutdown` resolves, or a fatal
    /// batch failure occurs under [`FailurePolicy::Halt`]
    ///
    /// A batch that has started is always finished before shutdown is
    /// honoured. The source is closed on every exit path.
    pub async fn run<F>(mut self, shutdown: F) -> Result<ConsumerStats, ConsumerError>
    where
        F: Future<Output = ()> + Send,
    {
        info!(
            mode = %self.orchestrator.mode(),
            ack_mode = %self.ack_mode,
            failure_policy = %self.failure_policy,
            "Waiting for messages"
        );

        let result = self.consume(shutdown).await;

        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close broker subscription cleanly");
        }

        match result {
            Ok(()) => {
                info!(stats = ?self.stats, "Consumer stopped");
                Ok(self.stats)
            },
            Err(e) => {
                error!(error = %e, stats = ?self.stats, "Consumer stopped on error");
                Err(e)
            },
        }
    }

    async fn consume<F>(&mut self, shutdown: F) -> Result<(), ConsumerError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, no further deliveries will be taken");
                    return Ok(());
                },
                next = self.source.next_delivery() => next?,
            };

            let Some(delivery) = next else {
                info!("Subscription ended by the broker");
                return Ok(());
            };

            self.handle(delivery).await?;
        }
    }

    async fn handle(&mut self, delivery: Delivery) -> Result<(), ConsumerError> {
        self.stats.deliveries += 1;
        debug!(
            delivery_tag = delivery.tag,
            redelivered = delivery.redelivered,
            bytes = delivery.payload.len(),
            "Received delivery"
        );

        match self.orchestrator.process(&delivery.payload).await {
            Ok(report) => {
                self.stats.batches_committed += 1;
                self.stats.rows_committed += report.rows as u64;
                self.settle(&delivery, true).await
            },
            Err(err) => match (err.class(), self.failure_policy) {
                (ErrorClass::Recoverable, _) => {
                    self.stats.batches_discarded += 1;
                    warn!(delivery_tag = delivery.tag, error = %err, "Dropped malformed batch");
                    self.settle(&delivery, true).await
                },
                (ErrorClass::Fatal, FailurePolicy::Continue) => {
                    self.stats.batches_failed += 1;
                    error!(delivery_tag = delivery.tag, error = %err, "Batch failed, continuing");
                    self.settle(&delivery, false).await
                },
                (ErrorClass::Fatal, FailurePolicy::Halt) => {
                    self.stats.batches_failed += 1;
                    // Left unacknowledged so the broker redelivers it
                    Err(ConsumerError::Fatal {
                        delivery_tag: delivery.tag,
                        source: err,
                    })
                },
            },
        }
    }

    async fn settle(&mut self, delivery: &Delivery, accept: bool) -> Result<(), ConsumerError> {
        match (self.ack_mode, accept) {
            (AckMode::Auto, _) => Ok(()),
            (AckMode::Manual, true) => self.source.ack(delivery).await,
            (AckMode::Manual, false) => self.source.reject(delivery).await,
        }
    }
}
