//! # Booking Testing
//!
//! Testing utilities for the booking consistency engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryBookingStore`]: reservations, resources and outbox in one
//!   mutex, simulating the PostgreSQL exclusion constraint
//! - [`InMemoryKeyValueStore`]: conditional-set with TTL, driven by a clock
//! - [`InMemoryEventBus`]: records published messages, with failure and
//!   latency injection
//!
//! ## Example
//!
//! ```ignore
//! use booking_testing::{InMemoryBookingStore, InMemoryKeyValueStore, ManualClock};
//!
//! #[tokio::test]
//! async fn hold_then_expire() {
//!     let clock = Arc::new(ManualClock::new(test_time()));
//!     let store = Arc::new(InMemoryBookingStore::new());
//!     let kv = Arc::new(InMemoryKeyValueStore::with_clock(clock.clone()));
//!     // build a BookingService over the in-memory stores...
//! }
//! ```

use booking_core::environment::Clock;
use chrono::{DateTime, Utc};

mod booking_store;
mod event_bus;
mod key_value_store;

pub use booking_store::InMemoryBookingStore;
pub use event_bus::InMemoryEventBus;
pub use key_value_store::InMemoryKeyValueStore;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use booking_testing::mocks::FixedClock;
    /// use booking_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same instant, so a test can keep one handle and hand
    /// another to the service under test.
    ///
    /// ```
    /// use booking_testing::mocks::{ManualClock, test_time};
    /// use booking_core::environment::Clock;
    ///
    /// let clock = ManualClock::new(test_time());
    /// clock.advance(chrono::Duration::minutes(16));
    /// assert_eq!(clock.now(), test_time() + chrono::Duration::minutes(16));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to an absolute instant
        #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Default instant for tests (2026-01-15 12:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which never happens.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-15T12:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Create a default fixed clock for tests at [`test_time`]
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock, test_time};
