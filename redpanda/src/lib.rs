//! Redpanda message broker for the booking outbox.
//!
//! [`RedpandaEventBus`] implements the [`EventBus`] trait from `booking-core`
//! with rdkafka, so it works against Redpanda or any Kafka-compatible cluster.
//!
//! # Record layout
//!
//! | Kafka field          | Source                              |
//! |----------------------|-------------------------------------|
//! | key                  | `BusMessage::key` (aggregate id)    |
//! | payload              | `BusMessage::payload` (JSON, UTF-8) |
//! | header `event_type`  | `BusMessage::event_type`            |
//! | header `aggregate_type` | `BusMessage::aggregate_type`     |
//!
//! Keying by aggregate id puts every event of one reservation on the same
//! partition, which keeps per-reservation order.
//!
//! # Delivery Semantics
//!
//! **At-least-once** on both sides:
//! - The publisher only marks an outbox row published after the broker acked it
//! - Consumers commit offsets only after the message reached the subscriber's
//!   channel, so a crash before commit redelivers
//!
//! # Example
//!
//! ```no_run
//! use booking_redpanda::RedpandaEventBus;
//! use booking_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("booking-events-logger")
//!     .build()?;
//!
//! let mut stream = bus.subscribe(&["booking-events"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("{message}"),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use booking_core::event::BusMessage;
use booking_core::event_bus::{EventBus, EventBusError, EventStream};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Header carrying the event type name.
pub const EVENT_TYPE_HEADER: &str = "event_type";

/// Header carrying the aggregate type.
pub const AGGREGATE_TYPE_HEADER: &str = "aggregate_type";

/// Redpanda event bus implementation.
///
/// Holds one long-lived producer; each [`subscribe`](EventBus::subscribe)
/// call creates its own consumer.
///
/// # Example
///
/// ```no_run
/// use booking_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Create `topic` with the given layout unless it already exists.
    ///
    /// An existing topic is left untouched, whatever its partition count.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::ConnectionFailed`] if the admin client cannot be created
    /// - [`EventBusError::TopicCreationFailed`] if the broker rejects the request
    pub async fn ensure_topic(
        &self,
        topic: &str,
        partitions: i32,
        replication: i32,
    ) -> Result<(), EventBusError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create admin client: {e}"))
            })?;

        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replication));
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));
        let failed = |reason: String| EventBusError::TopicCreationFailed {
            topic: topic.to_string(),
            reason,
        };

        let results = admin
            .create_topics(&[new_topic], &options)
            .await
            .map_err(|e| failed(e.to_string()))?;

        for result in results {
            match result {
                Ok(name) => {
                    tracing::info!(topic = %name, partitions, replication, "Topic created");
                },
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %name, "Topic already exists");
                },
                Err((_, code)) => return Err(failed(code.to_string())),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedpandaEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaEventBus")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .field("consumer_group", &self.consumer_group)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses (e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`, so an acked message survives a leader failover.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer delivery timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group used by subscriptions.
    ///
    /// Without one, the group id is derived from the sorted topic list.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Messages buffered between the Kafka consumer and the subscriber.
    ///
    /// Default: 1000. Zero is raised to one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where new consumer groups start reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"latest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            acks = acks,
            compression = compression,
            timeout_ms = timeout.as_millis(),
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        })
    }
}

/// Rebuild a [`BusMessage`] from a consumed record.
fn to_bus_message(record: &BorrowedMessage<'_>) -> Result<BusMessage, EventBusError> {
    let payload = record
        .payload_view::<str>()
        .ok_or_else(|| EventBusError::DeserializationFailed("Message has no payload".to_string()))?
        .map_err(|e| EventBusError::DeserializationFailed(format!("Payload is not UTF-8: {e}")))?;

    let key = record
        .key_view::<str>()
        .and_then(Result::ok)
        .unwrap_or_default();

    let mut event_type = None;
    let mut aggregate_type = None;
    if let Some(headers) = record.headers() {
        for header in headers.iter() {
            let value = header
                .value
                .and_then(|v| std::str::from_utf8(v).ok())
                .map(str::to_string);
            match header.key {
                EVENT_TYPE_HEADER => event_type = value,
                AGGREGATE_TYPE_HEADER => aggregate_type = value,
                _ => {},
            }
        }
    }

    Ok(BusMessage {
        topic: record.topic().to_string(),
        key: key.to_string(),
        event_type: event_type.ok_or_else(|| {
            EventBusError::DeserializationFailed(format!("Missing {EVENT_TYPE_HEADER} header"))
        })?,
        aggregate_type: aggregate_type.unwrap_or_default(),
        payload: payload.to_string(),
    })
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(
        &'a self,
        message: &'a BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: EVENT_TYPE_HEADER,
                    value: Some(message.event_type.as_bytes()),
                })
                .insert(Header {
                    key: AGGREGATE_TYPE_HEADER,
                    value: Some(message.aggregate_type.as_bytes()),
                });

            let record = FutureRecord::to(&message.topic)
                .key(message.key.as_bytes())
                .payload(message.payload.as_bytes())
                .headers(headers);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %message.topic,
                        key = %message.key,
                        partition = partition,
                        offset = offset,
                        event_type = %message.event_type,
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %message.topic,
                        key = %message.key,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: message.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let consumer_group_id = self.consumer_group.clone().unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("booking-{}", sorted_topics.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(self.buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(record) = stream.next().await {
                    match record {
                        Ok(record) => {
                            let message = to_bus_message(&record);
                            if let Ok(message) = &message {
                                tracing::trace!(
                                    topic = record.topic(),
                                    partition = record.partition(),
                                    offset = record.offset(),
                                    event_type = %message.event_type,
                                    "Received message"
                                );
                            }

                            // Commit only after the subscriber has the message
                            if tx.send(message).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                                tracing::warn!(
                                    topic = record.topic(),
                                    partition = record.partition(),
                                    offset = record.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        },
                        Err(e) => {
                            let err = EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        },
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}
