//! Booking state machine.
//!
//! [`BookingService`] owns every reservation transition:
//!
//! ```text
//!            confirm              cancel
//!   HOLD ──────────────► CONFIRMED ──────► CANCELLED
//!    │  \
//!    │   \ cancel
//!    │    └────────────────────────────► CANCELLED
//!    │
//!    └── expiry (lazy on confirm, or sweeper) ──► EXPIRED
//! ```
//!
//! The service takes no locks of its own. Overlapping holds are rejected by
//! the store's exclusion constraint and transitions are compare-and-set on
//! the current status, so the loser of any race observes the winner's state.
//! Every committed change writes its outbox entry in the same transaction.
//!
//! With an [`AvailabilityCache`] attached, searches are served from it and
//! every committed write invalidates it afterwards.

use crate::availability_cache::AvailabilityCache;
use crate::idempotency::{IdempotencyGuard, IdempotencyOutcome};
use crate::metrics;
use booking_core::environment::Clock;
use booking_core::event::{BookingEvent, DEFAULT_TOPIC, NewOutboxEntry};
use booking_core::store::{BookingStore, StatusChange};
use booking_core::types::{AvailabilityQuery, NewResource, Page, Resource};
use booking_core::{
    BookingError, DateTime, NaiveDate, Principal, Reservation, ReservationId, ReservationStatus,
    ResourceId, StayRange, StoreError, Utc,
};
use std::sync::Arc;

/// Tunables for [`BookingService`].
#[derive(Clone, Debug)]
pub struct BookingSettings {
    /// Topic written into every outbox entry
    pub topic: String,
    /// How long a hold blocks the calendar before it expires
    pub hold_duration: chrono::Duration,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            hold_duration: chrono::Duration::minutes(15),
        }
    }
}

/// Reservation state machine over a [`BookingStore`].
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    guard: IdempotencyGuard,
    clock: Arc<dyn Clock>,
    settings: BookingSettings,
    availability_cache: Option<AvailabilityCache>,
}

impl BookingService {
    /// Create a service with default settings.
    #[must_use]
    pub fn new(
        store: Arc<dyn BookingStore>,
        guard: IdempotencyGuard,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            guard,
            clock,
            settings: BookingSettings::default(),
            availability_cache: None,
        }
    }

    /// Serve availability searches through `cache`.
    #[must_use]
    pub fn with_availability_cache(mut self, cache: AvailabilityCache) -> Self {
        self.availability_cache = Some(cache);
        self
    }

    /// Replace the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: BookingSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &BookingSettings {
        &self.settings
    }

    /// Add a resource to the catalogue. Admin only.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] if the caller is not an admin
    /// - [`BookingError::BadRequest`] if a field is blank, too long or out of range
    /// - [`BookingError::Internal`] on storage failure
    pub async fn create_resource(
        &self,
        principal: &Principal,
        new_resource: NewResource,
    ) -> Result<Resource, BookingError> {
        if !principal.is_admin() {
            return Err(BookingError::Forbidden("admin role required".to_string()));
        }
        new_resource.validate()?;

        let resource = new_resource.into_resource(self.clock.now());
        self.store.create_resource(&resource).await?;
        self.invalidate_availability().await;
        Ok(resource)
    }

    /// Load a resource.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the resource does not exist
    /// - [`BookingError::Internal`] on storage failure
    pub async fn get_resource(&self, id: ResourceId) -> Result<Resource, BookingError> {
        self.store
            .find_resource(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("resource {id} not found")))
    }

    /// Resources with no active reservation overlapping the requested stay.
    ///
    /// Served from the availability cache when one is attached; a cache
    /// failure falls back to the store.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] on storage failure.
    pub async fn search_available(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<Page<Resource>, BookingError> {
        let Some(cache) = &self.availability_cache else {
            return Ok(self.store.search_available(query).await?);
        };

        let key = match cache.get(query).await {
            Ok((_, Some(page))) => return Ok(page),
            Ok((key, None)) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "Availability cache read failed");
                None
            },
        };

        let page = self.store.search_available(query).await?;
        if let Some(key) = key {
            if let Err(e) = cache.put(&key, &page).await {
                tracing::warn!(error = %e, "Availability cache write failed");
            }
        }
        Ok(page)
    }

    /// Whether `[from, to)` is free on `resource`.
    ///
    /// Advisory only; a later [`create_hold`](Self::create_hold) may still
    /// lose to a concurrent booking.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BadRequest`] if `from >= to`
    /// - [`BookingError::NotFound`] if the resource does not exist
    /// - [`BookingError::Internal`] on storage failure
    pub async fn is_available(
        &self,
        resource: ResourceId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool, BookingError> {
        let stay = StayRange::new(from, to)?;
        self.get_resource(resource).await?;
        Ok(!self.store.exists_overlap(resource, stay).await?)
    }

    /// Place a hold on `[from, to)`.
    ///
    /// With an idempotency key, a retry of a completed request returns the
    /// original reservation, and a retry while the original is still running
    /// is rejected.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BadRequest`] if `from >= to`
    /// - [`BookingError::NotFound`] if the resource does not exist, or the key
    ///   points at a reservation that no longer exists
    /// - [`BookingError::Conflict`] if the dates are taken or the key is in use
    /// - [`BookingError::Internal`] on storage failure
    pub async fn create_hold(
        &self,
        principal: &Principal,
        resource: ResourceId,
        from: NaiveDate,
        to: NaiveDate,
        idempotency_key: Option<&str>,
    ) -> Result<Reservation, BookingError> {
        let stay = StayRange::new(from, to)?;
        self.get_resource(resource).await?;

        let Some(key) = idempotency_key.map(str::trim).filter(|k| !k.is_empty()) else {
            return self.insert_hold(principal, resource, stay).await;
        };

        match self.guard.acquire(principal.user_id, key).await? {
            IdempotencyOutcome::InProgress => {
                return Err(BookingError::Conflict(
                    "duplicate request in flight".to_string(),
                ));
            },
            IdempotencyOutcome::Completed(id) => {
                tracing::debug!(reservation_id = %id, "Idempotent retry of completed hold");
                return self.store.find_reservation(id).await?.ok_or_else(|| {
                    BookingError::NotFound(format!("reservation {id} not found"))
                });
            },
            IdempotencyOutcome::Fresh => {},
        }

        match self.insert_hold(principal, resource, stay).await {
            Ok(hold) => {
                // The hold is committed; a lost mapping only costs a future retry
                if let Err(e) = self.guard.finalize(principal.user_id, key, hold.id).await {
                    tracing::warn!(
                        reservation_id = %hold.id,
                        error = %e,
                        "Failed to finalize idempotency key"
                    );
                }
                Ok(hold)
            },
            Err(e) => {
                if let Err(release_error) = self.guard.release(principal.user_id, key).await {
                    tracing::warn!(error = %release_error, "Failed to release idempotency key");
                }
                Err(e)
            },
        }
    }

    async fn insert_hold(
        &self,
        principal: &Principal,
        resource: ResourceId,
        stay: StayRange,
    ) -> Result<Reservation, BookingError> {
        let now = self.clock.now();
        let hold = Reservation::new_hold(
            resource,
            principal.user_id,
            stay,
            now,
            now + self.settings.hold_duration,
        );
        let entry = NewOutboxEntry::for_event(&self.settings.topic, &BookingEvent::held(&hold))?;

        match self.store.insert_hold(&hold, entry).await {
            Ok(()) => {
                self.invalidate_availability().await;
                metrics::record_hold_created();
                tracing::info!(
                    reservation_id = %hold.id,
                    resource_id = %resource,
                    user_id = %principal.user_id,
                    stay = %stay,
                    "Hold created"
                );
                Ok(hold)
            },
            Err(StoreError::Overlap(detail)) => {
                metrics::record_hold_conflict();
                tracing::info!(resource_id = %resource, stay = %stay, %detail, "Hold rejected: dates taken");
                Err(StoreError::Overlap(detail).into())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Confirm a hold.
    ///
    /// A hold past its expiry is moved to `EXPIRED` on the spot and the call
    /// fails.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BadRequest`] if `payment_ref` is blank
    /// - [`BookingError::NotFound`] if the reservation does not exist
    /// - [`BookingError::Forbidden`] if the caller is neither owner nor admin
    /// - [`BookingError::Conflict`] if the reservation is not a live hold
    /// - [`BookingError::Internal`] on storage failure
    pub async fn confirm(
        &self,
        principal: &Principal,
        id: ReservationId,
        payment_ref: &str,
    ) -> Result<Reservation, BookingError> {
        let payment_ref = payment_ref.trim();
        if payment_ref.is_empty() {
            return Err(BookingError::BadRequest(
                "payment reference is required".to_string(),
            ));
        }

        let reservation = self.load_authorized(principal, id).await?;
        if reservation.status != ReservationStatus::Hold {
            return Err(BookingError::Conflict(format!(
                "reservation is {}",
                reservation.status
            )));
        }

        let now = self.clock.now();
        if reservation.is_hold_expired(now) {
            let change = self.change(
                id,
                &[ReservationStatus::Hold],
                ReservationStatus::Expired,
                now,
                &BookingEvent::expired(id),
            )?;
            if self.store.transition(change).await?.is_some() {
                self.invalidate_availability().await;
                metrics::record_holds_expired(1);
                tracing::info!(reservation_id = %id, "Hold expired on confirm");
            }
            return Err(BookingError::Conflict("hold already expired".to_string()));
        }

        let change = self.change(
            id,
            &[ReservationStatus::Hold],
            ReservationStatus::Confirmed,
            now,
            &BookingEvent::confirmed(id, payment_ref),
        )?;
        if let Some(confirmed) = self.store.transition(change).await? {
            self.invalidate_availability().await;
            metrics::record_confirmed();
            tracing::info!(reservation_id = %id, "Reservation confirmed");
            return Ok(confirmed);
        }

        // Lost the race to a concurrent transition
        Err(self.lost_race(id).await)
    }

    /// Cancel a hold or a confirmed reservation.
    ///
    /// Cancelling an already cancelled reservation returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the reservation does not exist
    /// - [`BookingError::Forbidden`] if the caller is neither owner nor admin
    /// - [`BookingError::Conflict`] if the reservation has expired
    /// - [`BookingError::Internal`] on storage failure
    pub async fn cancel(
        &self,
        principal: &Principal,
        id: ReservationId,
    ) -> Result<Reservation, BookingError> {
        let reservation = self.load_authorized(principal, id).await?;
        match reservation.status {
            ReservationStatus::Cancelled => return Ok(reservation),
            ReservationStatus::Expired => {
                return Err(BookingError::Conflict("reservation is EXPIRED".to_string()));
            },
            ReservationStatus::Hold | ReservationStatus::Confirmed => {},
        }

        let change = self.change(
            id,
            &ReservationStatus::ACTIVE,
            ReservationStatus::Cancelled,
            self.clock.now(),
            &BookingEvent::cancelled(id),
        )?;
        if let Some(cancelled) = self.store.transition(change).await? {
            self.invalidate_availability().await;
            metrics::record_cancelled();
            tracing::info!(reservation_id = %id, from = %reservation.status, "Reservation cancelled");
            return Ok(cancelled);
        }

        match self.store.find_reservation(id).await? {
            Some(current) if current.status == ReservationStatus::Cancelled => Ok(current),
            Some(current) => Err(BookingError::Conflict(format!(
                "reservation is {}",
                current.status
            ))),
            None => Err(BookingError::NotFound(format!("reservation {id} not found"))),
        }
    }

    /// Load a reservation visible to `principal`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the reservation does not exist
    /// - [`BookingError::Forbidden`] if the caller is neither owner nor admin
    /// - [`BookingError::Internal`] on storage failure
    pub async fn get(
        &self,
        principal: &Principal,
        id: ReservationId,
    ) -> Result<Reservation, BookingError> {
        self.load_authorized(principal, id).await
    }

    /// Expire every hold whose `expires_at` is before `now`.
    ///
    /// Idempotent: a second call with the same `now` returns 0.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] on storage failure.
    pub async fn expire_holds(&self, now: DateTime<Utc>) -> Result<u64, BookingError> {
        let expired = self.store.expire_holds(now, &self.settings.topic).await?;
        if expired > 0 {
            self.invalidate_availability().await;
            metrics::record_holds_expired(expired);
            tracing::info!(count = expired, at = %now, "Expired holds");
        }
        Ok(expired)
    }

    async fn invalidate_availability(&self) {
        if let Some(cache) = &self.availability_cache {
            if let Err(e) = cache.invalidate().await {
                tracing::warn!(error = %e, "Failed to invalidate availability cache");
            }
        }
    }

    async fn load_authorized(
        &self,
        principal: &Principal,
        id: ReservationId,
    ) -> Result<Reservation, BookingError> {
        let reservation = self
            .store
            .find_reservation(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("reservation {id} not found")))?;

        if !principal.can_access(&reservation) {
            return Err(BookingError::Forbidden(
                "reservation belongs to another user".to_string(),
            ));
        }
        Ok(reservation)
    }

    fn change(
        &self,
        id: ReservationId,
        expected: &[ReservationStatus],
        to: ReservationStatus,
        at: DateTime<Utc>,
        event: &BookingEvent,
    ) -> Result<StatusChange, BookingError> {
        Ok(StatusChange {
            id,
            expected: expected.to_vec(),
            to,
            at,
            outbox: NewOutboxEntry::for_event(&self.settings.topic, event)?,
        })
    }

    async fn lost_race(&self, id: ReservationId) -> BookingError {
        match self.store.find_reservation(id).await {
            Ok(Some(current)) => {
                BookingError::Conflict(format!("reservation is {}", current.status))
            },
            Ok(None) => BookingError::NotFound(format!("reservation {id} not found")),
            Err(e) => e.into(),
        }
    }
}

impl std::fmt::Debug for BookingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingService")
            .field("guard", &self.guard)
            .field("settings", &self.settings)
            .field("availability_cache", &self.availability_cache)
            .finish_non_exhaustive()
    }
}
