//! Read-side cache for availability searches.
//!
//! Search pages are stored as JSON in the [`KeyValueStore`] for a short TTL.
//! Every key embeds the current cache generation, kept under
//! [`GENERATION_KEY`]. Invalidation writes a fresh generation, which orphans
//! all earlier entries at once; they age out through their own TTL.
//!
//! A search that started before a write may store its page under the old
//! generation, where no later lookup will find it.
//!
//! The cache is best effort. Key-value failures are logged and the caller
//! falls back to the store.

use crate::metrics;
use booking_core::StoreError;
use booking_core::store::KeyValueStore;
use booking_core::types::{AvailabilityQuery, Page, Resource};
use std::sync::Arc;
use std::time::Duration;

/// Key holding the current cache generation.
pub const GENERATION_KEY: &str = "avail:search:generation";

/// Default lifetime of a cached page.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(30);

/// Lifetime of the generation key. Long compared with any entry TTL.
const GENERATION_TTL: Duration = Duration::from_secs(24 * 3600);

/// Generation used while no generation key exists.
const INITIAL_GENERATION: &str = "0";

/// Availability search cache over a [`KeyValueStore`].
#[derive(Clone)]
pub struct AvailabilityCache {
    store: Arc<dyn KeyValueStore>,
    entry_ttl: Duration,
}

impl AvailabilityCache {
    /// Cache with the default entry TTL.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            entry_ttl: DEFAULT_ENTRY_TTL,
        }
    }

    /// Set the lifetime of cached pages.
    #[must_use]
    pub const fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Cache key for `query` within `generation`.
    ///
    /// The city is lowercased and the page size clamped, so queries the
    /// store treats as equal share one entry.
    #[must_use]
    pub fn entry_key(generation: &str, query: &AvailabilityQuery) -> String {
        let city = query
            .city
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        let min_capacity = query
            .min_capacity
            .map(|c| c.to_string())
            .unwrap_or_default();
        format!(
            "avail:search:{generation}:{city}|{min_capacity}|{}|{}|{}|{}",
            query.stay.start(),
            query.stay.end(),
            query.page,
            query.effective_size()
        )
    }

    /// Cached page for `query`, if present.
    ///
    /// Returns the key the page was looked up under, so a miss can be filled
    /// with [`put`](Self::put) without re-reading the generation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the key-value store fails or the cached
    /// value is not a valid page.
    pub async fn get(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<(String, Option<Page<Resource>>), StoreError> {
        let generation = self
            .store
            .get(GENERATION_KEY)
            .await?
            .unwrap_or_else(|| INITIAL_GENERATION.to_string());
        let key = Self::entry_key(&generation, query);

        let Some(raw) = self.store.get(&key).await? else {
            metrics::record_availability_cache_miss();
            return Ok((key, None));
        };
        let page = serde_json::from_str(&raw)?;
        metrics::record_availability_cache_hit();
        Ok((key, Some(page)))
    }

    /// Store `page` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the page cannot be serialized or written.
    pub async fn put(&self, key: &str, page: &Page<Resource>) -> Result<(), StoreError> {
        let raw = serde_json::to_string(page)?;
        self.store.set(key, &raw, self.entry_ttl).await
    }

    /// Drop every cached page by moving to a new generation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the generation cannot be written.
    pub async fn invalidate(&self) -> Result<(), StoreError> {
        let generation = uuid::Uuid::new_v4().simple().to_string();
        self.store
            .set(GENERATION_KEY, &generation, GENERATION_TTL)
            .await?;
        tracing::debug!(%generation, "Availability cache invalidated");
        Ok(())
    }
}

impl std::fmt::Debug for AvailabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityCache")
            .field("entry_ttl", &self.entry_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use booking_core::types::NewResource;
    use booking_core::{NaiveDate, StayRange};
    use booking_testing::{InMemoryKeyValueStore, test_clock, test_time};

    fn query(city: Option<&str>) -> AvailabilityQuery {
        let stay = StayRange::new(
            NaiveDate::from_ymd_opt(2026, 2, 1).expect("date"),
            NaiveDate::from_ymd_opt(2026, 2, 5).expect("date"),
        )
        .expect("stay");
        let mut query = AvailabilityQuery::new(stay);
        query.city = city.map(str::to_string);
        query
    }

    fn page() -> Page<Resource> {
        let resource = NewResource {
            name: "Old Town Loft".to_string(),
            city: "Gdansk".to_string(),
            capacity: 2,
        }
        .into_resource(test_time());
        Page {
            items: vec![resource],
            page: 0,
            size: 20,
            total: 1,
        }
    }

    #[test]
    fn equivalent_queries_share_a_key() {
        let mut oversized = query(Some("GDANSK"));
        oversized.size = 10_000;
        let mut clamped = query(Some("gdansk"));
        clamped.size = AvailabilityQuery::MAX_PAGE_SIZE;

        assert_eq!(
            AvailabilityCache::entry_key("g1", &oversized),
            AvailabilityCache::entry_key("g1", &clamped)
        );
        assert_ne!(
            AvailabilityCache::entry_key("g1", &clamped),
            AvailabilityCache::entry_key("g2", &clamped)
        );
        assert_ne!(
            AvailabilityCache::entry_key("g1", &query(None)),
            AvailabilityCache::entry_key("g1", &query(Some("gdansk")))
        );
    }

    #[tokio::test]
    async fn put_then_get_hits_until_invalidated() {
        let kv = InMemoryKeyValueStore::with_clock(Arc::new(test_clock()));
        let cache = AvailabilityCache::new(Arc::new(kv.clone()));
        let query = query(Some("Gdansk"));

        let (key, cached) = cache.get(&query).await.expect("get");
        assert_eq!(cached, None);
        cache.put(&key, &page()).await.expect("put");
        assert_eq!(kv.ttl(&key), Some(chrono::Duration::seconds(30)));

        let (_, cached) = cache.get(&query).await.expect("get");
        assert_eq!(cached, Some(page()));

        cache.invalidate().await.expect("invalidate");
        let (fresh_key, cached) = cache.get(&query).await.expect("get");
        assert_eq!(cached, None);
        assert_ne!(fresh_key, key);
    }

    #[tokio::test]
    async fn corrupt_entry_is_an_error() {
        let kv = InMemoryKeyValueStore::new();
        let cache = AvailabilityCache::new(Arc::new(kv.clone()));
        let query = query(None);
        let key = AvailabilityCache::entry_key(INITIAL_GENERATION, &query);
        kv.set(&key, "not json", Duration::from_secs(30))
            .await
            .expect("set");

        assert!(matches!(
            cache.get(&query).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
