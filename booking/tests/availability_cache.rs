//! Availability search through the key-value cache.

#![allow(clippy::expect_used)]

use booking::{AvailabilityCache, BookingService, HoldExpirySweeper, IdempotencyGuard};
use booking_core::environment::Clock;
use booking_core::types::{AvailabilityQuery, NewResource, Resource};
use booking_core::{NaiveDate, Principal, ResourceId, StayRange, UserId};
use booking_testing::{InMemoryBookingStore, InMemoryKeyValueStore, ManualClock, test_time};
use std::sync::Arc;

struct Harness {
    service: BookingService,
    store: InMemoryBookingStore,
    cache_store: InMemoryKeyValueStore,
    clock: ManualClock,
    admin: Principal,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new(test_time());
        let store = InMemoryBookingStore::new();
        let idempotency = InMemoryKeyValueStore::with_clock(Arc::new(clock.clone()));
        let cache_store = InMemoryKeyValueStore::with_clock(Arc::new(clock.clone()));
        let service = BookingService::new(
            Arc::new(store.clone()),
            IdempotencyGuard::new(Arc::new(idempotency)),
            Arc::new(clock.clone()),
        )
        .with_availability_cache(AvailabilityCache::new(Arc::new(cache_store.clone())));
        Self {
            service,
            store,
            cache_store,
            clock,
            admin: Principal::admin(UserId::new()),
        }
    }

    async fn resource(&self, name: &str) -> Resource {
        self.service
            .create_resource(
                &self.admin,
                NewResource {
                    name: name.to_string(),
                    city: "Gdansk".to_string(),
                    capacity: 2,
                },
            )
            .await
            .expect("create resource")
    }

    async fn available(&self) -> Vec<ResourceId> {
        let query = AvailabilityQuery::new(StayRange::new(feb(1), feb(5)).expect("stay"));
        self.service
            .search_available(&query)
            .await
            .expect("search")
            .items
            .into_iter()
            .map(|r| r.id)
            .collect()
    }
}

fn feb(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, day).expect("date")
}

#[tokio::test]
async fn repeated_search_is_served_from_cache_until_ttl() {
    let harness = Harness::new();
    let first = harness.resource("Old Town Loft").await;
    assert_eq!(harness.available().await, vec![first.id]);

    // Written behind the service's back, so nothing invalidates
    harness.clock.advance(chrono::Duration::seconds(1));
    let hidden = NewResource {
        name: "Harbour View".to_string(),
        city: "Gdansk".to_string(),
        capacity: 2,
    }
    .into_resource(harness.clock.now());
    harness.store.seed_resource(hidden.clone());
    assert_eq!(harness.available().await, vec![first.id]);

    harness.clock.advance(chrono::Duration::seconds(30));
    assert_eq!(harness.available().await, vec![first.id, hidden.id]);
}

#[tokio::test]
async fn each_booking_write_makes_next_search_miss() {
    let harness = Harness::new();
    let resource = harness.resource("Old Town Loft").await;
    let guest = Principal::user(UserId::new());
    assert_eq!(harness.available().await, vec![resource.id]);

    let hold = harness
        .service
        .create_hold(&guest, resource.id, feb(2), feb(4), None)
        .await
        .expect("hold");
    assert!(harness.available().await.is_empty());

    harness.service.cancel(&guest, hold.id).await.expect("cancel");
    assert_eq!(harness.available().await, vec![resource.id]);

    let hold = harness
        .service
        .create_hold(&guest, resource.id, feb(1), feb(2), None)
        .await
        .expect("hold");
    assert!(harness.available().await.is_empty());
    harness
        .service
        .confirm(&guest, hold.id, "pay-1")
        .await
        .expect("confirm");
    assert!(harness.available().await.is_empty());
    harness.service.cancel(&guest, hold.id).await.expect("cancel");
    assert_eq!(harness.available().await, vec![resource.id]);
}

#[tokio::test]
async fn swept_holds_make_next_search_miss() {
    let harness = Harness::new();
    let resource = harness.resource("Old Town Loft").await;
    harness
        .service
        .create_hold(&Principal::user(UserId::new()), resource.id, feb(1), feb(3), None)
        .await
        .expect("hold");
    assert!(harness.available().await.is_empty());

    // Caches a page that still shows the lapsed hold
    harness.clock.advance(chrono::Duration::minutes(20));
    assert!(harness.available().await.is_empty());
    let sweeper = HoldExpirySweeper::new(harness.service.clone(), Arc::new(harness.clock.clone()));
    assert_eq!(sweeper.run_once().await.expect("sweep"), 1);

    assert_eq!(harness.available().await, vec![resource.id]);
}

#[tokio::test]
async fn cache_outage_falls_back_to_store() {
    let harness = Harness::new();
    let resource = harness.resource("Old Town Loft").await;
    harness.cache_store.set_unavailable(true);

    assert_eq!(harness.available().await, vec![resource.id]);
    harness
        .service
        .create_hold(&Principal::user(UserId::new()), resource.id, feb(1), feb(3), None)
        .await
        .expect("hold commits without the cache");
    assert!(harness.available().await.is_empty());

    harness.cache_store.set_unavailable(false);
    assert!(harness.available().await.is_empty());
}
