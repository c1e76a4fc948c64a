//! # Booking Core
//!
//! Domain types, error taxonomy and infrastructure traits for the booking
//! consistency engine.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - **Types**: reservations, resources, date ranges and the calling principal
//! - **Errors**: the user-facing [`error::BookingError`] taxonomy and the
//!   storage-level [`error::StoreError`] it is translated from
//! - **Events**: the outbox entry model and the JSON payloads published for
//!   every reservation state change
//! - **Traits**: [`store::BookingStore`], [`store::OutboxStore`],
//!   [`store::KeyValueStore`], [`event_bus::EventBus`] and
//!   [`environment::Clock`], implemented by the `booking-postgres`,
//!   `booking-redpanda`, `booking` (Redis) and `booking-testing` crates
//!
//! ## Architecture
//!
//! ```text
//!  caller ──► BookingService ──► BookingStore (reservation + outbox, one tx)
//!                  │
//!                  └──────────► KeyValueStore (idempotency keys)
//!
//!  OutboxPublisher ──► OutboxStore ──► EventBus   (timer driven)
//!  HoldExpirySweeper ──► BookingStore              (timer driven)
//! ```
//!
//! ## Key Principles
//!
//! - **Storage enforces overlap safety**: no in-process locks, the store's
//!   exclusion constraint is the only gate
//! - **Outbox first**: state changes and their events commit together
//! - **At-least-once delivery**: events may be published more than once,
//!   always in commit order per aggregate

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod event_bus;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use error::{BookingError, StoreError};
pub use types::{Principal, Reservation, ReservationId, ReservationStatus, ResourceId, Role, StayRange, UserId};

/// Environment module - injected dependencies
///
/// All time-dependent logic reads the clock through the [`Clock`](environment::Clock)
/// trait so tests can pin or advance time deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use booking_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
