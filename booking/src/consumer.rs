//! Downstream consumer of booking events.
//!
//! Delivery from the outbox is at-least-once, so the consumer keeps the last
//! status it applied per reservation and drops any event that would not move
//! that status forward. Redeliveries and stale events are logged and counted
//! but otherwise ignored.
//!
//! Memory is bounded:
//! - Active reservations (`HOLD`, `CONFIRMED`) are kept up to a capacity;
//!   past it the oldest is forgotten.
//! - Reservations that reached `CANCELLED` or `EXPIRED` leave the active set
//!   and are remembered in a smaller ring so late redeliveries are still
//!   recognised.
//! - A `BookingHoldsExpired` summary carries no ids. It moves every known
//!   hold whose `expires_at` is before the sweep time to `EXPIRED`, and a
//!   redelivered summary (same count and time) is skipped. A summary that
//!   overtakes the `BookingHeld` of a hold it expired, which can happen across
//!   partitions, leaves that hold shown as `HOLD`.

use booking_core::event::{BookingEvent, BusMessage, HoldsExpiredPayload};
use booking_core::event_bus::{EventBus, EventBusError};
use booking_core::{DateTime, ReservationId, ReservationStatus, Utc};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;

/// Default number of active reservations tracked.
pub const DEFAULT_ACTIVE_CAPACITY: usize = 100_000;

/// Default number of finished reservations remembered for deduplication.
pub const DEFAULT_FINISHED_CAPACITY: usize = 10_000;

/// Sweep summaries remembered for deduplication.
const SWEEP_MEMORY: usize = 64;

/// Counters reported when the consumer stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Events that changed the view
    pub applied: u64,
    /// Redelivered or stale events
    pub skipped: u64,
    /// Messages that could not be decoded
    pub invalid: u64,
}

/// Map that forgets its oldest key once it holds more than `capacity`.
#[derive(Debug)]
struct BoundedMap<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Copy + Eq + Hash, V> BoundedMap<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key, value).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        // Keys removed out of order leave stale slots behind
        if self.order.len() > self.capacity.saturating_mul(2) {
            let entries = &self.entries;
            self.order.retain(|k| entries.contains_key(k));
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn drain_where(&mut self, mut predicate: impl FnMut(&V) -> bool) -> Vec<K> {
        let keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, v)| predicate(v))
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }
}

#[derive(Clone, Copy, Debug)]
struct ActiveReservation {
    status: ReservationStatus,
    expires_at: Option<DateTime<Utc>>,
}

/// Subscribes to the booking topic and tracks reservation status.
pub struct BookingEventsConsumer {
    bus: Arc<dyn EventBus>,
    topic: String,
    active: BoundedMap<ReservationId, ActiveReservation>,
    finished: BoundedMap<ReservationId, ReservationStatus>,
    sweeps: VecDeque<(u64, DateTime<Utc>)>,
    stats: ConsumerStats,
}

impl BookingEventsConsumer {
    /// Consumer for `topic` on `bus` with the default capacities.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            active: BoundedMap::new(DEFAULT_ACTIVE_CAPACITY),
            finished: BoundedMap::new(DEFAULT_FINISHED_CAPACITY),
            sweeps: VecDeque::new(),
            stats: ConsumerStats::default(),
        }
    }

    /// Set how many active and finished reservations are remembered.
    #[must_use]
    pub fn with_capacity(mut self, active: usize, finished: usize) -> Self {
        self.active = BoundedMap::new(active);
        self.finished = BoundedMap::new(finished);
        self
    }

    /// Last status applied for `id`, if it is still remembered.
    #[must_use]
    pub fn status_of(&self, id: ReservationId) -> Option<ReservationStatus> {
        self.active
            .get(&id)
            .map(|r| r.status)
            .or_else(|| self.finished.get(&id).copied())
    }

    /// Number of reservations currently remembered.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.active.len() + self.finished.len()
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Apply one event. Returns `false` if it was a redelivery or stale.
    pub fn apply(&mut self, event: &BookingEvent) -> bool {
        let (id, status, expires_at) = match event {
            BookingEvent::Held(p) => (p.booking_id, p.status, p.expires_at),
            BookingEvent::Confirmed(p) => (p.booking_id, p.status, None),
            BookingEvent::Cancelled(p) | BookingEvent::Expired(p) => (p.booking_id, p.status, None),
            BookingEvent::HoldsExpired(p) => return self.apply_sweep(p),
        };

        let fresh = self
            .status_of(id)
            .is_none_or(|current| current.can_transition_to(status));

        if fresh {
            if status.is_active() {
                self.active.insert(id, ActiveReservation { status, expires_at });
            } else {
                self.active.remove(&id);
                self.finished.insert(id, status);
            }
            self.stats.applied += 1;
            tracing::info!(reservation_id = %id, %status, event_type = event.event_type(), "Booking event applied");
        } else {
            self.stats.skipped += 1;
            tracing::debug!(reservation_id = %id, %status, "Skipping redelivered or stale event");
        }
        fresh
    }

    fn apply_sweep(&mut self, sweep: &HoldsExpiredPayload) -> bool {
        let key = (sweep.count, sweep.at);
        if self.sweeps.contains(&key) {
            self.stats.skipped += 1;
            tracing::debug!(count = sweep.count, at = %sweep.at, "Skipping redelivered sweep summary");
            return false;
        }
        if self.sweeps.len() >= SWEEP_MEMORY {
            self.sweeps.pop_front();
        }
        self.sweeps.push_back(key);

        let expired = self.active.drain_where(|r| {
            r.status == ReservationStatus::Hold && r.expires_at.is_some_and(|at| at < sweep.at)
        });
        for id in &expired {
            self.finished.insert(*id, ReservationStatus::Expired);
        }

        self.stats.applied += 1;
        tracing::info!(
            count = sweep.count,
            at = %sweep.at,
            known = expired.len(),
            "Holds expired by sweep"
        );
        true
    }

    fn handle(&mut self, message: &BusMessage) {
        match message.decode() {
            Ok(event) => {
                self.apply(&event);
            },
            Err(e) => {
                self.stats.invalid += 1;
                tracing::warn!(message = %message, error = %e, "Failed to decode booking event");
            },
        }
    }

    /// Consume until `shutdown` becomes `true` or the stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the subscription cannot be created.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumerStats, EventBusError> {
        let bus = Arc::clone(&self.bus);
        let mut stream = bus.subscribe(&[self.topic.as_str()]).await?;
        tracing::info!(topic = %self.topic, "Booking events consumer started");

        while !*shutdown.borrow() {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(message)) => self.handle(&message),
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Error receiving booking event");
                    },
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            applied = self.stats.applied,
            skipped = self.stats.skipped,
            invalid = self.stats.invalid,
            "Booking events consumer stopped"
        );
        Ok(self.stats)
    }
}

impl std::fmt::Debug for BookingEventsConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingEventsConsumer")
            .field("topic", &self.topic)
            .field("stats", &self.stats)
            .field("tracked", &self.tracked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use booking_core::event::{DEFAULT_TOPIC, NewOutboxEntry, OutboxEntry};
    use booking_core::{NaiveDate, Reservation, ResourceId, StayRange, UserId};
    use booking_testing::{InMemoryEventBus, test_time};
    use std::time::Duration;

    fn hold() -> Reservation {
        let stay = StayRange::new(
            NaiveDate::from_ymd_opt(2026, 2, 1).expect("date"),
            NaiveDate::from_ymd_opt(2026, 2, 5).expect("date"),
        )
        .expect("stay");
        Reservation::new_hold(
            ResourceId::new(),
            UserId::new(),
            stay,
            test_time(),
            test_time() + chrono::Duration::minutes(15),
        )
    }

    fn message(event: &BookingEvent) -> BusMessage {
        let entry = NewOutboxEntry::for_event(DEFAULT_TOPIC, event).expect("entry");
        OutboxEntry {
            id: 1,
            topic: entry.topic,
            aggregate_type: entry.aggregate_type,
            aggregate_id: entry.aggregate_id,
            event_type: entry.event_type,
            payload: entry.payload,
            created_at: test_time(),
            published_at: None,
        }
        .to_message()
    }

    #[test]
    fn redelivered_events_are_skipped() {
        let mut consumer = BookingEventsConsumer::new(Arc::new(InMemoryEventBus::new()), DEFAULT_TOPIC);
        let hold = hold();

        assert!(consumer.apply(&BookingEvent::held(&hold)));
        assert!(consumer.apply(&BookingEvent::confirmed(hold.id, "pay-1")));
        assert!(!consumer.apply(&BookingEvent::confirmed(hold.id, "pay-1")));
        // Stale: a HOLD cannot follow CONFIRMED
        assert!(!consumer.apply(&BookingEvent::held(&hold)));

        assert_eq!(consumer.status_of(hold.id), Some(ReservationStatus::Confirmed));
        assert_eq!(consumer.stats().applied, 2);
        assert_eq!(consumer.stats().skipped, 2);
    }

    #[test]
    fn finished_reservations_are_bounded() {
        let mut consumer = BookingEventsConsumer::new(Arc::new(InMemoryEventBus::new()), DEFAULT_TOPIC)
            .with_capacity(1_000, 100);

        let mut last = None;
        for _ in 0..10_000 {
            let hold = hold();
            assert!(consumer.apply(&BookingEvent::held(&hold)));
            assert!(consumer.apply(&BookingEvent::cancelled(hold.id)));
            last = Some(hold);
        }
        assert!(consumer.tracked() <= 100);

        // The most recent ones are still deduplicated
        let last = last.expect("last hold");
        assert!(!consumer.apply(&BookingEvent::cancelled(last.id)));
        assert!(!consumer.apply(&BookingEvent::held(&last)));
        assert_eq!(consumer.status_of(last.id), Some(ReservationStatus::Cancelled));
    }

    #[test]
    fn active_reservations_are_bounded() {
        let mut consumer = BookingEventsConsumer::new(Arc::new(InMemoryEventBus::new()), DEFAULT_TOPIC)
            .with_capacity(50, 10);

        let holds: Vec<Reservation> = (0..200).map(|_| hold()).collect();
        for hold in &holds {
            consumer.apply(&BookingEvent::held(hold));
        }

        assert_eq!(consumer.tracked(), 50);
        assert_eq!(consumer.status_of(holds[0].id), None);
        assert_eq!(consumer.status_of(holds[199].id), Some(ReservationStatus::Hold));
    }

    #[test]
    fn sweep_summary_expires_lapsed_holds_once() {
        let mut consumer = BookingEventsConsumer::new(Arc::new(InMemoryEventBus::new()), DEFAULT_TOPIC);
        let lapsed = hold();
        let mut later = hold();
        later.expires_at = Some(test_time() + chrono::Duration::hours(2));
        let confirmed = hold();
        for reservation in [&lapsed, &later, &confirmed] {
            consumer.apply(&BookingEvent::held(reservation));
        }
        consumer.apply(&BookingEvent::confirmed(confirmed.id, "pay-1"));

        let sweep = BookingEvent::holds_expired(1, test_time() + chrono::Duration::minutes(20));
        assert!(consumer.apply(&sweep));
        assert!(!consumer.apply(&sweep));

        assert_eq!(consumer.status_of(lapsed.id), Some(ReservationStatus::Expired));
        assert_eq!(consumer.status_of(later.id), Some(ReservationStatus::Hold));
        assert_eq!(consumer.status_of(confirmed.id), Some(ReservationStatus::Confirmed));
        // A late confirm for the swept hold is stale
        assert!(!consumer.apply(&BookingEvent::confirmed(lapsed.id, "pay-2")));

        assert_eq!(consumer.stats().applied, 5);
        assert_eq!(consumer.stats().skipped, 2);

        // A different sweep at another time is applied
        let next = BookingEvent::holds_expired(1, test_time() + chrono::Duration::hours(3));
        assert!(consumer.apply(&next));
        assert_eq!(consumer.status_of(later.id), Some(ReservationStatus::Expired));
    }

    #[tokio::test]
    async fn consumes_until_shutdown() {
        let bus = InMemoryEventBus::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut consumer = BookingEventsConsumer::new(Arc::new(bus.clone()), DEFAULT_TOPIC);
        let task = tokio::spawn(async move {
            let stats = consumer.run(shutdown_rx).await.expect("run");
            (consumer, stats)
        });
        // Let the consumer subscribe before publishing
        tokio::time::sleep(Duration::from_millis(50)).await;

        let hold = hold();
        for event in [
            BookingEvent::held(&hold),
            BookingEvent::held(&hold),
            BookingEvent::cancelled(hold.id),
        ] {
            bus.publish(&message(&event)).await.expect("publish");
        }
        let mut garbage = message(&BookingEvent::cancelled(hold.id));
        garbage.payload = "not json".to_string();
        bus.publish(&garbage).await.expect("publish");

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).expect("shutdown");
        let (consumer, stats) = task.await.expect("consumer task");

        assert_eq!(
            stats,
            ConsumerStats {
                applied: 2,
                skipped: 1,
                invalid: 1
            }
        );
        assert_eq!(consumer.status_of(hold.id), Some(ReservationStatus::Cancelled));
    }
}
