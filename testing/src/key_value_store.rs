//! In-memory key-value store with clock-driven expiry.

#![allow(clippy::unwrap_used)] // Test infrastructure: mutex poisoning is a test failure

use booking_core::environment::{Clock, SystemClock};
use booking_core::store::{KeyValueStore, StoreFuture};
use booking_core::{DateTime, StoreError, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory [`KeyValueStore`].
///
/// Expiry is evaluated against the injected [`Clock`], so TTL behaviour can
/// be tested with a `ManualClock`. [`set_unavailable`](Self::set_unavailable)
/// makes every operation fail with [`StoreError::KeyValue`].
#[derive(Clone)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryKeyValueStore {
    /// Create a store that expires keys against the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that expires keys against `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Live value of `key`, bypassing the async trait
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    /// Remaining time-to-live of `key`
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<chrono::Duration> {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::KeyValue("key-value store unavailable".to_string()));
        }
        Ok(())
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyValueStore")
            .field("keys", &self.entries.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let expires_at = self.expiry(ttl);
            let mut entries = self.entries.lock().unwrap();
            if entries.get(key).is_some_and(|e| e.expires_at > now) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(true)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.peek(key))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let expires_at = self.expiry(ttl);
            self.entries.lock().unwrap().insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(())
        })
    }

    fn delete_if_equals<'a>(&'a self, key: &'a str, expected: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut entries = self.entries.lock().unwrap();
            let matches = entries
                .get(key)
                .is_some_and(|e| e.expires_at > now && e.value == expected);
            if matches {
                entries.remove(key);
            }
            Ok(matches)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::{ManualClock, test_time};

    #[tokio::test]
    async fn set_if_absent_respects_ttl() {
        let clock = ManualClock::new(test_time());
        let store = InMemoryKeyValueStore::with_clock(Arc::new(clock.clone()));
        let ttl = Duration::from_secs(30);

        assert!(store.set_if_absent("k", "a", ttl).await.expect("set"));
        assert!(!store.set_if_absent("k", "b", ttl).await.expect("set"));

        clock.advance(chrono::Duration::seconds(31));
        assert!(store.set_if_absent("k", "c", ttl).await.expect("set"));
        assert_eq!(store.get("k").await.expect("get").as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn delete_if_equals_only_removes_matching_value() {
        let store = InMemoryKeyValueStore::new();
        let ttl = Duration::from_secs(60);
        store.set("k", "done", ttl).await.expect("set");

        assert!(!store.delete_if_equals("k", "IN_PROGRESS").await.expect("delete"));
        assert_eq!(store.peek("k").as_deref(), Some("done"));
        assert!(store.delete_if_equals("k", "done").await.expect("delete"));
        assert_eq!(store.peek("k"), None);
    }

    #[tokio::test]
    async fn outage_surfaces_as_key_value_error() {
        let store = InMemoryKeyValueStore::new();
        store.set_unavailable(true);
        let result = store.get("k").await;
        assert!(matches!(result, Err(StoreError::KeyValue(_))));
    }
}
