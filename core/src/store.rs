//! Storage traits.
//!
//! - [`BookingStore`]: resources, reservations and the outbox write side.
//!   Implementations must enforce the overlap invariant themselves (an
//!   exclusion constraint in PostgreSQL, a single critical section in memory)
//!   and must write every outbox entry atomically with its state change.
//! - [`OutboxStore`]: the publish side of the outbox.
//! - [`KeyValueStore`]: atomic conditional-set with TTL, backing the
//!   idempotency guard.
//!
//! All traits return boxed futures so services can hold `Arc<dyn Trait>`.

use crate::error::StoreError;
use crate::event::{NewOutboxEntry, OutboxEntry};
use crate::types::{
    AvailabilityQuery, Page, Reservation, ReservationId, ReservationStatus, Resource, ResourceId,
    StayRange,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by every storage operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A compare-and-set status change plus the outbox entry recording it.
#[derive(Clone, Debug)]
pub struct StatusChange {
    /// Reservation to update
    pub id: ReservationId,
    /// The update applies only while the current status is one of these
    pub expected: Vec<ReservationStatus>,
    /// New status; `expires_at` is cleared unless this is `HOLD`
    pub to: ReservationStatus,
    /// `updated_at` for the row
    pub at: DateTime<Utc>,
    /// Outbox entry committed together with the update
    pub outbox: NewOutboxEntry,
}

/// Relational store for resources, reservations and outbox writes.
pub trait BookingStore: Send + Sync {
    /// Insert a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn create_resource<'a>(&'a self, resource: &'a Resource) -> StoreFuture<'a, ()>;

    /// Load a resource by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn find_resource(&self, id: ResourceId) -> StoreFuture<'_, Option<Resource>>;

    /// Resources matching the query with no active reservation overlapping
    /// the requested stay, ordered by creation time then id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn search_available<'a>(&'a self, query: &'a AvailabilityQuery)
    -> StoreFuture<'a, Page<Resource>>;

    /// Whether an active (`HOLD`/`CONFIRMED`) reservation on `resource`
    /// overlaps `stay`. Advisory only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn exists_overlap(&self, resource: ResourceId, stay: StayRange) -> StoreFuture<'_, bool>;

    /// Load a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn find_reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>>;

    /// Insert a new hold and its outbox entry atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Overlap`] if an active reservation overlaps the hold
    /// - [`StoreError::ResourceMissing`] if the resource does not exist
    /// - [`StoreError::Database`] on any other failure
    fn insert_hold<'a>(
        &'a self,
        hold: &'a Reservation,
        outbox: NewOutboxEntry,
    ) -> StoreFuture<'a, ()>;

    /// Apply a compare-and-set status change and insert its outbox entry in
    /// the same transaction.
    ///
    /// Returns the updated reservation, or `None` if the reservation does
    /// not exist or its status is not in `change.expected` (nothing written).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn transition(&self, change: StatusChange) -> StoreFuture<'_, Option<Reservation>>;

    /// Move every `HOLD` with `expires_at < now` to `EXPIRED` in one
    /// statement. When at least one row changed, a single
    /// `BookingHoldsExpired` outbox entry on `topic` is written in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn expire_holds<'a>(&'a self, now: DateTime<Utc>, topic: &'a str) -> StoreFuture<'a, u64>;
}

/// Publish side of the transactional outbox.
pub trait OutboxStore: Send + Sync {
    /// Oldest unpublished entries, ordered by sequence id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn next_unpublished(&self, limit: u32) -> StoreFuture<'_, Vec<OutboxEntry>>;

    /// Set `published_at` on an entry that is still unpublished.
    ///
    /// Returns `false` if the entry was already published (or is unknown).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> StoreFuture<'_, bool>;

    /// Number of entries not yet published.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on storage failure.
    fn count_unpublished(&self) -> StoreFuture<'_, u64>;
}

/// Key-value store with atomic conditional writes and expiry.
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value` with `ttl` only if the key is absent.
    ///
    /// Returns `true` if this call created the key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyValue`] on store failure.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool>;

    /// Current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyValue`] on store failure.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Unconditionally set `key` to `value` with `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyValue`] on store failure.
    fn set<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Delete `key` only while it still holds `expected`.
    ///
    /// Returns `true` if the key was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyValue`] on store failure.
    fn delete_if_equals<'a>(&'a self, key: &'a str, expected: &'a str) -> StoreFuture<'a, bool>;
}
