//! Idempotency guard for hold creation.
//!
//! A retried `create_hold` with the same key must return the reservation the
//! first attempt created instead of attempting a second insert. Keys are
//! scoped by user (`idemp:hold:{user_id}:{key}`) so one user can never
//! observe another user's reservation through a shared key.
//!
//! # Lifecycle
//!
//! ```text
//! absent ──acquire──► IN_PROGRESS ──finalize──► <reservation id>
//!                          │
//!                          └──release──► absent
//! ```
//!
//! - Claiming is a single `SET key IN_PROGRESS NX EX <in_progress_ttl>`, so
//!   exactly one concurrent caller wins
//! - A stuck claim disappears on its own when the short TTL lapses
//! - Finalize and release are both idempotent

use booking_core::store::KeyValueStore;
use booking_core::{BookingError, ReservationId, UserId};
use std::sync::Arc;
use std::time::Duration;

/// Value stored while the first request is still running.
pub const IN_PROGRESS: &str = "IN_PROGRESS";

/// Default lifetime of an in-flight claim.
pub const DEFAULT_IN_PROGRESS_TTL: Duration = Duration::from_secs(30);

/// Default lifetime of a finalized key.
pub const DEFAULT_COMPLETED_TTL: Duration = Duration::from_secs(24 * 3600);

/// Result of [`IdempotencyGuard::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// This caller owns the key and must finalize or release it
    Fresh,
    /// Another request with the same key has not finished yet
    InProgress,
    /// A previous request already created this reservation
    Completed(ReservationId),
}

/// Claims, finalizes and releases idempotency keys in a [`KeyValueStore`].
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn KeyValueStore>,
    in_progress_ttl: Duration,
    completed_ttl: Duration,
}

impl IdempotencyGuard {
    /// Guard with the default TTLs (30 seconds in flight, 24 hours completed).
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            in_progress_ttl: DEFAULT_IN_PROGRESS_TTL,
            completed_ttl: DEFAULT_COMPLETED_TTL,
        }
    }

    /// Override the in-flight claim TTL.
    #[must_use]
    pub const fn with_in_progress_ttl(mut self, ttl: Duration) -> Self {
        self.in_progress_ttl = ttl;
        self
    }

    /// Override the finalized key TTL.
    #[must_use]
    pub const fn with_completed_ttl(mut self, ttl: Duration) -> Self {
        self.completed_ttl = ttl;
        self
    }

    /// Storage key for `(user, key)`.
    #[must_use]
    pub fn storage_key(user: UserId, key: &str) -> String {
        format!("idemp:hold:{user}:{key}")
    }

    /// Try to claim `key` for `user`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Conflict`] if the stored value is not a reservation id
    /// - [`BookingError::Internal`] if the key-value store fails
    pub async fn acquire(&self, user: UserId, key: &str) -> Result<IdempotencyOutcome, BookingError> {
        let storage_key = Self::storage_key(user, key);

        if self
            .store
            .set_if_absent(&storage_key, IN_PROGRESS, self.in_progress_ttl)
            .await?
        {
            return Ok(IdempotencyOutcome::Fresh);
        }

        match self.store.get(&storage_key).await? {
            Some(value) if value == IN_PROGRESS => Ok(IdempotencyOutcome::InProgress),
            Some(value) => value
                .parse::<ReservationId>()
                .map(IdempotencyOutcome::Completed)
                .map_err(|_| {
                    tracing::warn!(key = %storage_key, "Idempotency key holds an unexpected value");
                    BookingError::Conflict("idempotency key holds an unexpected value".to_string())
                }),
            // Released between our SET and GET; the racing request still owns the retry
            None => Ok(IdempotencyOutcome::InProgress),
        }
    }

    /// Record the reservation created under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] if the key-value store fails.
    pub async fn finalize(
        &self,
        user: UserId,
        key: &str,
        reservation: ReservationId,
    ) -> Result<(), BookingError> {
        let storage_key = Self::storage_key(user, key);
        self.store
            .set(&storage_key, &reservation.to_string(), self.completed_ttl)
            .await?;
        Ok(())
    }

    /// Drop an in-flight claim so the caller may retry.
    ///
    /// A finalized key is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] if the key-value store fails.
    pub async fn release(&self, user: UserId, key: &str) -> Result<(), BookingError> {
        let storage_key = Self::storage_key(user, key);
        if self.store.delete_if_equals(&storage_key, IN_PROGRESS).await? {
            tracing::warn!(key = %storage_key, "Released idempotency key");
        }
        Ok(())
    }
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("in_progress_ttl", &self.in_progress_ttl)
            .field("completed_ttl", &self.completed_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use booking_testing::{InMemoryKeyValueStore, ManualClock, test_time};

    fn guard() -> (IdempotencyGuard, InMemoryKeyValueStore, ManualClock) {
        let clock = ManualClock::new(test_time());
        let store = InMemoryKeyValueStore::with_clock(Arc::new(clock.clone()));
        (IdempotencyGuard::new(Arc::new(store.clone())), store, clock)
    }

    #[tokio::test]
    async fn first_claim_is_fresh_second_is_in_progress() {
        let (guard, store, _) = guard();
        let user = UserId::new();

        assert_eq!(guard.acquire(user, "k").await.expect("acquire"), IdempotencyOutcome::Fresh);
        assert_eq!(
            guard.acquire(user, "k").await.expect("acquire"),
            IdempotencyOutcome::InProgress
        );
        assert_eq!(
            store.peek(&IdempotencyGuard::storage_key(user, "k")).as_deref(),
            Some(IN_PROGRESS)
        );
    }

    #[tokio::test]
    async fn finalized_key_returns_reservation() {
        let (guard, store, _) = guard();
        let user = UserId::new();
        let id = ReservationId::new();

        guard.acquire(user, "k").await.expect("acquire");
        guard.finalize(user, "k", id).await.expect("finalize");
        guard.finalize(user, "k", id).await.expect("finalize is idempotent");

        assert_eq!(
            guard.acquire(user, "k").await.expect("acquire"),
            IdempotencyOutcome::Completed(id)
        );
        let ttl = store
            .ttl(&IdempotencyGuard::storage_key(user, "k"))
            .expect("ttl");
        assert_eq!(ttl, chrono::Duration::hours(24));
    }

    #[tokio::test]
    async fn keys_are_scoped_per_user() {
        let (guard, _, _) = guard();
        let alice = UserId::new();
        let bob = UserId::new();

        guard.acquire(alice, "shared").await.expect("acquire");
        guard.finalize(alice, "shared", ReservationId::new()).await.expect("finalize");

        assert_eq!(
            guard.acquire(bob, "shared").await.expect("acquire"),
            IdempotencyOutcome::Fresh
        );
    }

    #[tokio::test]
    async fn release_only_drops_in_progress_claims() {
        let (guard, store, _) = guard();
        let user = UserId::new();
        let key = IdempotencyGuard::storage_key(user, "k");

        guard.acquire(user, "k").await.expect("acquire");
        guard.release(user, "k").await.expect("release");
        guard.release(user, "k").await.expect("release is idempotent");
        assert_eq!(store.peek(&key), None);

        let id = ReservationId::new();
        guard.acquire(user, "k").await.expect("acquire");
        guard.finalize(user, "k", id).await.expect("finalize");
        guard.release(user, "k").await.expect("release");
        assert_eq!(store.peek(&key), Some(id.to_string()));
    }

    #[tokio::test]
    async fn stuck_claim_expires() {
        let (guard, _, clock) = guard();
        let user = UserId::new();

        guard.acquire(user, "k").await.expect("acquire");
        clock.advance(chrono::Duration::seconds(31));

        assert_eq!(guard.acquire(user, "k").await.expect("acquire"), IdempotencyOutcome::Fresh);
    }

    #[tokio::test]
    async fn garbage_value_is_conflict() {
        let (guard, store, _) = guard();
        let user = UserId::new();
        store
            .set(
                &IdempotencyGuard::storage_key(user, "k"),
                "not-a-uuid",
                Duration::from_secs(60),
            )
            .await
            .expect("seed");

        let result = guard.acquire(user, "k").await;
        assert!(matches!(result, Err(BookingError::Conflict(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn store_outage_is_internal() {
        let (guard, store, _) = guard();
        store.set_unavailable(true);

        let result = guard.acquire(UserId::new(), "k").await;
        assert!(matches!(result, Err(BookingError::Internal(_))), "got {result:?}");
    }
}
