//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! Marked `#[ignore]` because they need Docker and take tens of seconds to
//! start the broker. Run explicitly:
//!
//! ```bash
//! cargo test -p booking-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use booking_core::event::BusMessage;
use booking_core::event_bus::EventBus;
use booking_redpanda::RedpandaEventBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn message(topic: &str, key: &str, event_type: &str, payload: &str) -> BusMessage {
    BusMessage {
        topic: topic.to_string(),
        key: key.to_string(),
        event_type: event_type.to_string(),
        aggregate_type: "Booking".to_string(),
        payload: payload.to_string(),
    }
}

/// Start Kafka and wait until a warmup publish succeeds.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let warmup = message("warmup-topic", "warmup", "warmup", "{}");
    for attempt in 1..=60 {
        if let Ok(bus) = RedpandaEventBus::new(&brokers) {
            if bus.publish(&warmup).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return (kafka, brokers);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Kafka failed to become ready");
    }
    unreachable!("loop either returns or asserts")
}

/// Publish a warmup message so the topic exists before subscribing.
async fn ensure_topic_exists(bus: &RedpandaEventBus, topic: &str) {
    let warmup = message(topic, "warmup", "warmup", "{}");
    for attempt in 1..=30 {
        if bus.publish(&warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != 30, "Failed to create topic {topic}");
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn key_headers_and_payload_survive_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&bus, "booking-events").await;

    let mut stream = bus
        .subscribe(&["booking-events"])
        .await
        .expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let sent = message(
        "booking-events",
        "6f1c2b1e-0000-4000-8000-000000000001",
        "BookingHeld",
        r#"{"bookingId":"6f1c2b1e-0000-4000-8000-000000000001","status":"HOLD"}"#,
    );
    bus.publish(&sent).await.expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let message = stream
                .next()
                .await
                .expect("stream ended")
                .expect("Failed to receive message");
            if message.event_type != "warmup" {
                return message;
            }
        }
    })
    .await
    .expect("Timeout waiting for message");

    assert_eq!(received, sent);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn same_key_preserves_publish_order() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&bus, "ordered-events").await;

    let mut stream = bus
        .subscribe(&["ordered-events"])
        .await
        .expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let key = "6f1c2b1e-0000-4000-8000-000000000002";
    for event_type in ["BookingHeld", "BookingConfirmed", "BookingCancelled"] {
        bus.publish(&message("ordered-events", key, event_type, "{}"))
            .await
            .expect("Failed to publish");
    }

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while received.len() < 3 {
            if let Some(result) = stream.next().await {
                let message = result.expect("Failed to receive message");
                if message.event_type != "warmup" {
                    received.push(message.event_type);
                }
            }
        }
    })
    .await
    .expect("Timeout waiting for messages");

    assert_eq!(
        received,
        vec!["BookingHeld", "BookingConfirmed", "BookingCancelled"]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unreachable_broker_fails_publish_within_timeout() {
    let bus = RedpandaEventBus::builder()
        .brokers("127.0.0.1:1")
        .timeout(Duration::from_millis(500))
        .build()
        .expect("producer creation does not connect");

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        bus.publish(&message("booking-events", "k", "BookingHeld", "{}")),
    )
    .await
    .expect("publish must give up on its own");

    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn ensure_topic_creates_partitions_once() {
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{BaseProducer, Producer};

    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::new(&brokers).expect("bus");

    bus.ensure_topic("provisioned-events", 6, 1)
        .await
        .expect("create topic");
    bus.ensure_topic("provisioned-events", 6, 1)
        .await
        .expect("existing topic is accepted");

    let metadata_client: BaseProducer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .create()
        .expect("metadata client");
    let metadata = metadata_client
        .client()
        .fetch_metadata(Some("provisioned-events"), Duration::from_secs(10))
        .expect("metadata");
    assert_eq!(metadata.topics().len(), 1);
    assert_eq!(metadata.topics()[0].partitions().len(), 6);
}
