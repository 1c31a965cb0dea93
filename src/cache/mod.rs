//! Read-through cache for complaint reads
//!
//! Values are JSON bytes stored in the shared [`CounterStore`] with a short
//! TTL. The backing strategy (Redis, in-process, or disabled) is chosen at
//! startup; callers only see [`CacheLayer`].
//!
//! Store outages never fail a request: reads become misses and writes are
//! skipped.

pub mod keys;

pub use keys::{CacheKey, CacheKeys};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::counter::CounterStore;
use crate::types::Result;

/// Observable cache outcome, sent as the `X-Cache` response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub invalidated: u64,
}

impl CacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Cache front for list and detail queries
pub struct CacheLayer {
    store: Option<Arc<dyn CounterStore>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    invalidated: AtomicU64,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CounterStore>, default_ttl: Duration) -> Self {
        Self {
            store: Some(store),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bypasses: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            store: None,
            default_ttl: Duration::from_secs(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bypasses: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Raw lookup; store errors count as a miss
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let Some(store) = &self.store else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match store.get(key).await {
            Ok(Some(bytes)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Cache hit");
                Some(bytes)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Cache miss");
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.bypasses.fetch_add(1, Ordering::Relaxed);
                warn!(key = key, error = %e, "Cache read failed, bypassing");
                None
            }
        }
    }

    /// Store a value; failures are logged and ignored
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        let Some(store) = &self.store else {
            return;
        };
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = store.set(key, value, ttl).await {
            self.bypasses.fetch_add(1, Ordering::Relaxed);
            warn!(key = key, error = %e, "Cache write failed, skipping");
        }
    }

    /// Delete every key matching `pattern`, returning how many were removed
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        match store.delete_matching(pattern).await {
            Ok(count) => {
                if count > 0 {
                    debug!(pattern = pattern, count = count, "Invalidated cache entries");
                }
                self.invalidated.fetch_add(count as u64, Ordering::Relaxed);
                count
            }
            Err(e) => {
                // Entries left behind expire with their TTL
                warn!(pattern = pattern, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Invalidate several patterns in order
    pub async fn invalidate_all(&self, patterns: &[String]) -> usize {
        let mut total = 0;
        for pattern in patterns {
            total += self.invalidate(pattern).await;
        }
        total
    }

    /// Return the cached value for `key`, or run `loader`, cache its result
    /// and return it.
    ///
    /// Loader errors propagate and are never cached. A cached value that no
    /// longer deserializes is treated as a miss.
    pub async fn read_through<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<(T, CacheStatus)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let storage_key = key.to_storage_key();

        if let Some(bytes) = self.get(&storage_key).await {
            match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => return Ok((value, CacheStatus::Hit)),
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "Discarding undecodable cache entry");
                }
            }
        }

        let value = loader().await?;
        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                self.set(&storage_key, &bytes, ttl.unwrap_or(self.default_ttl))
                    .await
            }
            Err(e) => warn!(key = %storage_key, error = %e, "Cache encode failed"),
        }
        Ok((value, CacheStatus::Miss))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            backend: self
                .store
                .as_ref()
                .map(|s| s.backend().to_string())
                .unwrap_or_else(|| "disabled".to_string()),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::testing::DownStore;
    use crate::counter::MemoryCounterStore;
    use crate::types::GrievanceError;
    use std::sync::atomic::AtomicUsize;

    fn layer() -> CacheLayer {
        CacheLayer::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_cache_get_set() {
        let cache = layer();
        cache.set("k", b"v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
        assert_eq!(cache.get("missing").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.backend, "memory");
    }

    #[tokio::test]
    async fn test_read_through_miss_then_hit() {
        let cache = layer();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let key = CacheKey::citizen_list("user-123", None);

        let load = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GrievanceError>(vec!["COMP-1".to_string()])
        };

        let (first, status) = cache.read_through(&key, None, load).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);

        let (second, status) = cache.read_through(&key, None, load).await.unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let cache = layer();
        let ttl = Duration::from_secs(10);
        for page in 1..=3 {
            let key = CacheKey::staff_list(None, page, 10).to_storage_key();
            cache.set(&key, b"[]", ttl).await;
        }
        cache
            .set(&CacheKey::citizen_list("u1", None).to_storage_key(), b"[]", ttl)
            .await;

        assert_eq!(cache.invalidate(&CacheKeys::staff_pattern()).await, 3);
        assert_eq!(cache.stats().invalidated, 3);
        assert!(cache
            .get(&CacheKey::citizen_list("u1", None).to_storage_key())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_loader_error_not_cached() {
        let cache = layer();
        let key = CacheKey::complaint("COMP-X");

        let result: Result<(String, CacheStatus)> = cache
            .read_through(&key, None, || async {
                Err(GrievanceError::NotFound("COMP-X".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get(&key.to_storage_key()).await.is_none());
    }

    #[tokio::test]
    async fn test_bypass_when_store_down() {
        let cache = CacheLayer::new(Arc::new(DownStore), Duration::from_secs(30));
        let key = CacheKey::staff_list(None, 1, 10);

        for _ in 0..2 {
            let (value, status) = cache
                .read_through(&key, None, || async { Ok::<_, GrievanceError>(42u32) })
                .await
                .unwrap();
            assert_eq!(value, 42);
            assert_eq!(status, CacheStatus::Miss);
        }
        assert_eq!(cache.invalidate("complaints:*").await, 0);
        assert!(cache.stats().bypasses >= 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let cache = CacheLayer::disabled();
        let key = CacheKey::complaint("COMP-1");
        for _ in 0..2 {
            let (_, status) = cache
                .read_through(&key, None, || async { Ok::<_, GrievanceError>(1u8) })
                .await
                .unwrap();
            assert_eq!(status, CacheStatus::Miss);
        }
        assert_eq!(cache.stats().backend, "disabled");
    }
}
