//! Property tests: whatever holds are attempted, accepted ones never overlap.

#![allow(clippy::expect_used)]

use booking::{BookingService, IdempotencyGuard};
use booking_core::types::NewResource;
use booking_core::{BookingError, NaiveDate, Principal, Reservation, UserId};
use booking_testing::{InMemoryBookingStore, InMemoryKeyValueStore, test_clock};
use proptest::prelude::*;
use std::sync::Arc;

fn day(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).expect("date") + chrono::Days::new(u64::from(offset))
}

fn attempt_all(requests: &[(u32, u32, bool)]) -> (Vec<Reservation>, usize) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let store = InMemoryBookingStore::new();
        let service = BookingService::new(
            Arc::new(store.clone()),
            IdempotencyGuard::new(Arc::new(InMemoryKeyValueStore::new())),
            Arc::new(test_clock()),
        );
        let admin = Principal::admin(UserId::new());
        let resource = service
            .create_resource(
                &admin,
                NewResource {
                    name: "Dune Cabin".to_string(),
                    city: "Leba".to_string(),
                    capacity: 4,
                },
            )
            .await
            .expect("resource")
            .id;

        let mut conflicts = 0;
        let mut accepted: Vec<Reservation> = Vec::new();
        for &(start, nights, cancel) in requests {
            let guest = Principal::user(UserId::new());
            match service
                .create_hold(&guest, resource, day(start), day(start + nights), None)
                .await
            {
                Ok(hold) if cancel => {
                    service.cancel(&guest, hold.id).await.expect("cancel");
                },
                Ok(hold) => accepted.push(hold),
                Err(BookingError::Conflict(_)) => conflicts += 1,
                Err(other) => return Err(other),
            }
        }
        Ok::<_, BookingError>((accepted, conflicts))
    })
    .expect("no unexpected errors")
}

proptest! {
    #[test]
    fn accepted_holds_never_overlap(
        requests in prop::collection::vec((0u32..60, 1u32..10, any::<bool>()), 1..40)
    ) {
        let (accepted, conflicts) = attempt_all(&requests);

        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                prop_assert!(!a.stay.overlaps(&b.stay), "{} overlaps {}", a.stay, b.stay);
            }
        }
        let cancelled = requests.iter().filter(|r| r.2).count();
        prop_assert!(accepted.len() + conflicts <= requests.len());
        prop_assert!(accepted.len() + conflicts + cancelled >= requests.len());
    }

    #[test]
    fn free_range_is_always_accepted(start in 0u32..60, nights in 1u32..10) {
        let (accepted, conflicts) = attempt_all(&[(start, nights, false)]);
        prop_assert_eq!(accepted.len(), 1);
        prop_assert_eq!(conflicts, 0);
    }
}
