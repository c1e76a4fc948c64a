//! Booking Engine Server
//!
//! This binary:
//! - Connects to `PostgreSQL` and runs migrations
//! - Connects to Redis (idempotency keys, availability cache) and `RedPanda`
//!   (event bus), creating the booking topic if it is missing
//! - Starts the outbox publisher, the hold-expiry sweeper and the booking
//!   events consumer
//! - Runs until Ctrl+C, then stops every background task
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin booking-server
//! ```

use booking::config::Config;
use booking::metrics;
use booking::scheduler::{spawn_hold_sweeper, spawn_outbox_publisher};
use booking::stores::RedisKeyValueStore;
use booking::{
    AvailabilityCache, BookingEventsConsumer, BookingService, BookingSettings, HoldExpirySweeper,
    IdempotencyGuard, OutboxPublisher,
};
use booking_core::environment::{Clock, SystemClock};
use booking_postgres::PostgresBookingStore;
use booking_redpanda::RedpandaEventBus;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,booking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting booking engine server...");

    let config = Config::from_env();
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        topic = %config.booking.topic,
        "Configuration loaded"
    );

    metrics::install_prometheus(&config.metrics.host, config.metrics.port)?;
    metrics::register_metrics();

    // Infrastructure
    let store = Arc::new(
        PostgresBookingStore::connect(&config.postgres.url, &config.postgres.pool_settings())
            .await?,
    );
    store.migrate().await?;
    tracing::info!("✓ PostgreSQL connected and migrated");

    let key_value = Arc::new(RedisKeyValueStore::new(&config.redis.url).await?);
    tracing::info!("✓ Redis connected");

    let producer = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .producer_acks(&config.redpanda.producer_acks)
            .timeout(config.outbox.publish_timeout())
            .build()?,
    );
    producer
        .ensure_topic(
            &config.booking.topic,
            config.booking.topic_partitions,
            config.booking.topic_replication,
        )
        .await?;
    let consumer_bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .build()?,
    );
    tracing::info!("✓ RedPanda connected");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Components
    let guard = IdempotencyGuard::new(key_value.clone())
        .with_in_progress_ttl(config.booking.in_progress_ttl())
        .with_completed_ttl(config.booking.idempotency_ttl());
    let availability_cache = AvailabilityCache::new(key_value)
        .with_entry_ttl(config.booking.availability_cache_ttl());
    let service = BookingService::new(store.clone(), guard, Arc::clone(&clock))
        .with_settings(BookingSettings {
            topic: config.booking.topic.clone(),
            hold_duration: config.booking.hold_duration(),
        })
        .with_availability_cache(availability_cache);
    let publisher = OutboxPublisher::new(store, producer, Arc::clone(&clock))
        .with_batch_size(config.outbox.batch_size)
        .with_publish_timeout(config.outbox.publish_timeout());
    let sweeper = HoldExpirySweeper::new(service, clock);

    // Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let publisher_task =
        spawn_outbox_publisher(publisher, config.outbox.poll_interval(), shutdown_rx.clone());
    let sweeper_task =
        spawn_hold_sweeper(sweeper, config.outbox.hold_expiry_scan(), shutdown_rx.clone());

    let mut consumer = BookingEventsConsumer::new(consumer_bus, config.booking.topic.clone());
    let consumer_task = tokio::spawn(async move {
        if let Err(e) = consumer.run(shutdown_rx).await {
            tracing::error!(error = %e, "Booking events consumer failed");
        }
    });

    tracing::info!("Booking engine is running. Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down gracefully...");
    shutdown_tx.send(true).ok();
    for (name, task) in [
        ("outbox-publisher", publisher_task),
        ("hold-expiry-sweeper", sweeper_task),
        ("events-consumer", consumer_task),
    ] {
        if let Err(e) = task.await {
            tracing::warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
