//! In-memory booking store.
//!
//! Resources, reservations and the outbox share one mutex. Every write
//! performs its checks and its mutation inside a single lock acquisition,
//! which gives the same guarantee as the PostgreSQL exclusion constraint:
//! two overlapping active reservations can never both be inserted.

#![allow(clippy::unwrap_used)] // Test infrastructure: mutex poisoning is a test failure
#![allow(clippy::missing_panics_doc)]

use booking_core::event::{BookingEvent, NewOutboxEntry, OutboxEntry};
use booking_core::store::{BookingStore, OutboxStore, StatusChange, StoreFuture};
use booking_core::types::{AvailabilityQuery, Page, Resource};
use booking_core::{
    DateTime, Reservation, ReservationId, ReservationStatus, ResourceId, StayRange, StoreError,
    Utc,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    resources: HashMap<ResourceId, Resource>,
    reservations: HashMap<ReservationId, Reservation>,
    outbox: Vec<OutboxEntry>,
    next_outbox_id: i64,
}

impl State {
    fn overlaps_active(&self, resource: ResourceId, stay: &StayRange) -> bool {
        self.reservations.values().any(|r| {
            r.resource_id == resource && r.status.is_active() && r.stay.overlaps(stay)
        })
    }

    fn append_outbox(&mut self, entry: NewOutboxEntry, at: DateTime<Utc>) {
        self.next_outbox_id += 1;
        self.outbox.push(OutboxEntry {
            id: self.next_outbox_id,
            topic: entry.topic,
            aggregate_type: entry.aggregate_type,
            aggregate_id: entry.aggregate_id,
            event_type: entry.event_type,
            payload: entry.payload,
            created_at: at,
            published_at: None,
        });
    }
}

/// In-memory [`BookingStore`] and [`OutboxStore`].
///
/// Clones share state.
///
/// # Example
///
/// ```
/// use booking_testing::InMemoryBookingStore;
///
/// let store = InMemoryBookingStore::new();
/// assert!(store.outbox_entries().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBookingStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryBookingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every outbox entry, in sequence order
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.state.lock().unwrap().outbox.clone()
    }

    /// Snapshot of every reservation
    #[must_use]
    pub fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().unwrap().reservations.values().cloned().collect()
    }

    /// Reservation by id, bypassing the async trait
    #[must_use]
    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.state.lock().unwrap().reservations.get(&id).cloned()
    }

    /// Insert a resource directly (test setup)
    pub fn seed_resource(&self, resource: Resource) {
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(resource.id, resource);
    }
}

impl BookingStore for InMemoryBookingStore {
    fn create_resource<'a>(&'a self, resource: &'a Resource) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.seed_resource(resource.clone());
            Ok(())
        })
    }

    fn find_resource(&self, id: ResourceId) -> StoreFuture<'_, Option<Resource>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().resources.get(&id).cloned()) })
    }

    fn search_available<'a>(
        &'a self,
        query: &'a AvailabilityQuery,
    ) -> StoreFuture<'a, Page<Resource>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let mut matching: Vec<&Resource> = state
                .resources
                .values()
                .filter(|r| {
                    query
                        .city
                        .as_deref()
                        .is_none_or(|city| r.city.eq_ignore_ascii_case(city.trim()))
                })
                .filter(|r| query.min_capacity.is_none_or(|min| r.capacity >= min))
                .filter(|r| !state.overlaps_active(r.id, &query.stay))
                .collect();
            matching.sort_by_key(|r| (r.created_at, r.id));

            let size = query.effective_size();
            let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
            let items = matching
                .iter()
                .skip(offset)
                .take(size as usize)
                .map(|r| (*r).clone())
                .collect();

            Ok(Page {
                items,
                page: query.page,
                size,
                total: matching.len() as u64,
            })
        })
    }

    fn exists_overlap(&self, resource: ResourceId, stay: StayRange) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.state.lock().unwrap().overlaps_active(resource, &stay)) })
    }

    fn find_reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move { Ok(self.reservation(id)) })
    }

    fn insert_hold<'a>(
        &'a self,
        hold: &'a Reservation,
        outbox: NewOutboxEntry,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if !state.resources.contains_key(&hold.resource_id) {
                return Err(StoreError::ResourceMissing(hold.resource_id.to_string()));
            }
            if state.overlaps_active(hold.resource_id, &hold.stay) {
                return Err(StoreError::Overlap(format!(
                    "resource {} already booked for {}",
                    hold.resource_id, hold.stay
                )));
            }
            state.reservations.insert(hold.id, hold.clone());
            state.append_outbox(outbox, hold.created_at);
            Ok(())
        })
    }

    fn transition(&self, change: StatusChange) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let Some(current) = state.reservations.get(&change.id) else {
                return Ok(None);
            };
            if !change.expected.contains(&current.status) {
                return Ok(None);
            }
            let updated = current.with_status(change.to, change.at);
            state.reservations.insert(updated.id, updated.clone());
            state.append_outbox(change.outbox, change.at);
            Ok(Some(updated))
        })
    }

    fn expire_holds<'a>(&'a self, now: DateTime<Utc>, topic: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let mut count = 0_u64;
            for reservation in state.reservations.values_mut() {
                if reservation.is_hold_expired(now) {
                    *reservation = reservation.with_status(ReservationStatus::Expired, now);
                    count += 1;
                }
            }
            if count > 0 {
                let entry =
                    NewOutboxEntry::for_event(topic, &BookingEvent::holds_expired(count, now))?;
                state.append_outbox(entry, now);
            }
            Ok(count)
        })
    }
}

impl OutboxStore for InMemoryBookingStore {
    fn next_unpublished(&self, limit: u32) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .outbox
                .iter()
                .filter(|e| e.published_at.is_none())
                .take(limit as usize)
                .cloned()
                .collect())
        })
    }

    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            match state
                .outbox
                .iter_mut()
                .find(|e| e.id == id && e.published_at.is_none())
            {
                Some(entry) => {
                    entry.published_at = Some(at);
                    Ok(true)
                },
                None => Ok(false),
            }
        })
    }

    fn count_unpublished(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .outbox
                .iter()
                .filter(|e| e.published_at.is_none())
                .count() as u64)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::test_time;
    use booking_core::event::DEFAULT_TOPIC;
    use booking_core::{NaiveDate, UserId};

    fn stay(from: u32, to: u32) -> StayRange {
        StayRange::new(
            NaiveDate::from_ymd_opt(2026, 2, from).expect("date"),
            NaiveDate::from_ymd_opt(2026, 2, to).expect("date"),
        )
        .expect("valid stay")
    }

    fn resource(store: &InMemoryBookingStore) -> ResourceId {
        let resource = Resource {
            id: ResourceId::new(),
            name: "Loft".to_string(),
            city: "Gdansk".to_string(),
            capacity: 2,
            created_at: test_time(),
        };
        let id = resource.id;
        store.seed_resource(resource);
        id
    }

    fn hold(resource: ResourceId, stay: StayRange) -> (Reservation, NewOutboxEntry) {
        let now = test_time();
        let hold = Reservation::new_hold(
            resource,
            UserId::new(),
            stay,
            now,
            now + chrono::Duration::minutes(15),
        );
        let entry = NewOutboxEntry::for_event(DEFAULT_TOPIC, &BookingEvent::held(&hold))
            .expect("payload");
        (hold, entry)
    }

    #[tokio::test]
    async fn overlapping_active_hold_is_rejected() {
        let store = InMemoryBookingStore::new();
        let resource = resource(&store);

        let (first, entry) = hold(resource, stay(1, 5));
        store.insert_hold(&first, entry).await.expect("first hold");

        let (second, entry) = hold(resource, stay(4, 6));
        let result = store.insert_hold(&second, entry).await;
        assert!(matches!(result, Err(StoreError::Overlap(_))));

        let (adjacent, entry) = hold(resource, stay(5, 8));
        store.insert_hold(&adjacent, entry).await.expect("back-to-back hold");

        assert_eq!(store.outbox_entries().len(), 2);
    }

    #[tokio::test]
    async fn unknown_resource_is_reported() {
        let store = InMemoryBookingStore::new();
        let (orphan, entry) = hold(ResourceId::new(), stay(1, 5));
        let result = store.insert_hold(&orphan, entry).await;
        assert!(matches!(result, Err(StoreError::ResourceMissing(_))));
        assert!(store.outbox_entries().is_empty());
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryBookingStore::new();
        let resource = resource(&store);
        let (held, entry) = hold(resource, stay(1, 5));
        store.insert_hold(&held, entry).await.expect("hold");

        let change = StatusChange {
            id: held.id,
            expected: vec![ReservationStatus::Hold],
            to: ReservationStatus::Confirmed,
            at: test_time(),
            outbox: NewOutboxEntry::for_event(
                DEFAULT_TOPIC,
                &BookingEvent::confirmed(held.id, "pay"),
            )
            .expect("payload"),
        };

        let first = store.transition(change.clone()).await.expect("transition");
        assert_eq!(first.map(|r| r.status), Some(ReservationStatus::Confirmed));

        let second = store.transition(change).await.expect("transition");
        assert!(second.is_none());
        assert_eq!(store.outbox_entries().len(), 2);
    }

    #[tokio::test]
    async fn expired_hold_frees_the_calendar() {
        let store = InMemoryBookingStore::new();
        let resource = resource(&store);
        let (held, entry) = hold(resource, stay(1, 5));
        store.insert_hold(&held, entry).await.expect("hold");

        let later = test_time() + chrono::Duration::minutes(16);
        assert_eq!(store.expire_holds(later, DEFAULT_TOPIC).await.expect("sweep"), 1);
        assert_eq!(store.expire_holds(later, DEFAULT_TOPIC).await.expect("sweep"), 0);

        assert!(!store.exists_overlap(resource, stay(1, 5)).await.expect("query"));
        let entries = store.outbox_entries();
        assert_eq!(entries.last().map(|e| e.event_type.as_str()), Some("BookingHoldsExpired"));
    }

    #[tokio::test]
    async fn outbox_publish_side() {
        let store = InMemoryBookingStore::new();
        let resource = resource(&store);
        for day in [1, 3, 5] {
            let (held, entry) = hold(resource, stay(day, day + 1));
            store.insert_hold(&held, entry).await.expect("hold");
        }

        let batch = store.next_unpublished(2).await.expect("batch");
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

        assert!(store.mark_published(1, test_time()).await.expect("mark"));
        assert!(!store.mark_published(1, test_time()).await.expect("mark"));
        assert_eq!(store.count_unpublished().await.expect("count"), 2);
    }
}
