//! # Booking
//!
//! Booking consistency engine for date-range reservations of a single
//! resource (an apartment): holds, confirmations and cancellations that never
//! overlap, even under heavy concurrency.
//!
//! - [`service::BookingService`]: the reservation state machine
//! - [`idempotency::IdempotencyGuard`]: replay-safe hold creation
//! - [`outbox::OutboxPublisher`]: relays committed events to the broker
//! - [`sweeper::HoldExpirySweeper`]: expires lapsed holds in bulk
//! - [`consumer::BookingEventsConsumer`]: downstream consumer of those events
//! - [`scheduler`]: periodic drivers for the publisher and sweeper
//! - [`availability_cache::AvailabilityCache`]: short-lived cache of search pages
//!
//! Storage and transport live in `booking-postgres` and `booking-redpanda`;
//! `booking-testing` provides in-memory stand-ins for all of them.
//!
//! ## Example
//!
//! ```
//! use booking::idempotency::IdempotencyGuard;
//! use booking::service::BookingService;
//! use booking_core::environment::SystemClock;
//! use booking_testing::{InMemoryBookingStore, InMemoryKeyValueStore};
//! use std::sync::Arc;
//!
//! let service = BookingService::new(
//!     Arc::new(InMemoryBookingStore::new()),
//!     IdempotencyGuard::new(Arc::new(InMemoryKeyValueStore::new())),
//!     Arc::new(SystemClock),
//! );
//! assert_eq!(service.settings().topic, "booking-events");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod availability_cache;
pub mod config;
pub mod consumer;
pub mod idempotency;
pub mod metrics;
pub mod outbox;
pub mod scheduler;
pub mod service;
pub mod stores;
pub mod sweeper;

pub use availability_cache::AvailabilityCache;
pub use config::Config;
pub use consumer::BookingEventsConsumer;
pub use idempotency::{IdempotencyGuard, IdempotencyOutcome};
pub use outbox::{OutboxPublisher, PublishReport};
pub use service::{BookingService, BookingSettings};
pub use sweeper::HoldExpirySweeper;
