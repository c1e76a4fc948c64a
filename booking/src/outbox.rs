//! Outbox publisher.
//!
//! Relays committed outbox entries to the event bus in sequence order. Each
//! tick publishes at most one batch and stops at the first failure, leaving
//! the failed entry and everything after it for the next tick. Delivery is
//! therefore at-least-once and per-aggregate order matches commit order.

use crate::metrics;
use booking_core::StoreError;
use booking_core::environment::Clock;
use booking_core::event::OutboxEntry;
use booking_core::event_bus::{EventBus, EventBusError};
use booking_core::store::OutboxStore;
use std::sync::Arc;
use std::time::Duration;

/// Default number of entries read per tick.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Default per-message broker timeout.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one [`OutboxPublisher::publish_pending`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Entries published and marked in this pass
    pub published: usize,
    /// Whether the pass stopped early on a failure
    pub failed: bool,
}

/// Relays unpublished outbox entries to an [`EventBus`].
#[derive(Clone)]
pub struct OutboxPublisher {
    outbox: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    batch_size: u32,
    publish_timeout: Duration,
}

impl OutboxPublisher {
    /// Publisher with the default batch size and timeout.
    #[must_use]
    pub fn new(outbox: Arc<dyn OutboxStore>, bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            outbox,
            bus,
            clock,
            batch_size: DEFAULT_BATCH_SIZE,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Set the batch size (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the per-message broker timeout.
    #[must_use]
    pub const fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Publish the oldest unpublished batch.
    ///
    /// Publish failures and timeouts are logged and end the pass; they are
    /// reported through [`PublishReport::failed`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch cannot be read.
    pub async fn publish_pending(&self) -> Result<PublishReport, StoreError> {
        let batch = self.outbox.next_unpublished(self.batch_size).await?;
        let mut report = PublishReport::default();

        for entry in &batch {
            if let Err(e) = self.publish_one(entry).await {
                metrics::record_outbox_publish_failure();
                tracing::warn!(
                    outbox_id = entry.id,
                    event_type = %entry.event_type,
                    aggregate_id = %entry.aggregate_id,
                    error = %e,
                    "Outbox publish failed, stopping batch"
                );
                report.failed = true;
                break;
            }

            match self.outbox.mark_published(entry.id, self.clock.now()).await {
                Ok(true) => {
                    metrics::record_outbox_published();
                    report.published += 1;
                    tracing::debug!(
                        outbox_id = entry.id,
                        event_type = %entry.event_type,
                        "Outbox entry published"
                    );
                },
                Ok(false) => {
                    tracing::debug!(outbox_id = entry.id, "Outbox entry already marked");
                },
                Err(e) => {
                    // Broker has it; it will be sent again next tick
                    tracing::warn!(outbox_id = entry.id, error = %e, "Failed to mark outbox entry");
                    report.failed = true;
                    break;
                },
            }
        }

        Ok(report)
    }

    /// Entries still waiting to be published.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn backlog(&self) -> Result<u64, StoreError> {
        self.outbox.count_unpublished().await
    }

    async fn publish_one(&self, entry: &OutboxEntry) -> Result<(), EventBusError> {
        let message = entry.to_message();
        match tokio::time::timeout(self.publish_timeout, self.bus.publish(&message)).await {
            Ok(result) => result,
            Err(_) => Err(EventBusError::Timeout {
                topic: message.topic.clone(),
                timeout_ms: u64::try_from(self.publish_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl std::fmt::Debug for OutboxPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxPublisher")
            .field("batch_size", &self.batch_size)
            .field("publish_timeout", &self.publish_timeout)
            .finish_non_exhaustive()
    }
}
