//! Message broker abstraction for outbox delivery.
//!
//! The outbox publisher pushes every committed booking event through an
//! [`EventBus`]; downstream consumers read them back with
//! [`EventBus::subscribe`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ BookingService  │
//! └────────┬────────┘
//!          │  state change + outbox row (one transaction)
//!          ▼
//! ┌─────────────────┐
//! │    Postgres     │◄─── Source of truth
//! └────────┬────────┘
//!          │  OutboxPublisher (timer)
//!          ▼
//! ┌─────────────────┐
//! │    EventBus     │◄─── At-least-once, keyed by aggregate id
//! └────────┬────────┘
//!          ▼
//!   BookingEventsConsumer / other services
//! ```
//!
//! # Key Principles
//!
//! - **Postgres first**: a message only exists on the bus after its outbox row committed
//! - **At-least-once delivery**: a crash between publish and mark-published republishes
//! - **Ordered per key**: messages with the same key (aggregate id) keep their order
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `booking-testing`, with failure injection
//! - `RedpandaEventBus` in `booking-redpanda` (Kafka-compatible)

use crate::event::BusMessage;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Broker did not acknowledge within the caller's deadline
    #[error("Publish to topic '{topic}' timed out after {timeout_ms} ms")]
    Timeout {
        /// The topic that timed out
        topic: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Received record could not be turned into a [`BusMessage`]
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroupError(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Topic could not be provisioned
    #[error("Failed to create topic '{topic}': {reason}")]
    TopicCreationFailed {
        /// The topic being created
        topic: String,
        /// The reason for failure
        reason: String,
    },
}

/// Stream of messages from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<BusMessage, EventBusError>> + Send>>;

/// Trait for message broker implementations.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
/// publisher and consumer can hold an `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish one message, partitioned by `message.key`.
    ///
    /// Returns once the broker acknowledged the write.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects the
    /// message or the connection fails.
    fn publish<'a>(
        &'a self,
        message: &'a BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

    /// Subscribe to one or more topics.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
