//! In-process LRU metadata cache.
//!
//! Used when no Redis URL is configured and in tests. Entries expire lazily
//! on read; [`MemoryMetadataCache::sweep_expired`] can be run periodically to
//! reclaim memory held by entries nobody reads.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{CacheKey, CacheResult, MetadataCache};

struct CachedPayload {
    payload: serde_json::Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedPayload {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

/// Counters for the memory cache.
#[derive(Default)]
pub struct MemoryCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Entries dropped because their ttl passed
    pub expired: AtomicU64,
    /// Entries dropped by `invalidate`
    pub invalidated: AtomicU64,
}

impl MemoryCacheStats {
    /// Hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Bounded in-memory metadata cache.
pub struct MemoryMetadataCache {
    cache: Arc<RwLock<LruCache<String, CachedPayload>>>,
    stats: Arc<MemoryCacheStats>,
}

impl MemoryMetadataCache {
    /// Create a cache holding at most `max_entries` payloads.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            stats: Arc::new(MemoryCacheStats::default()),
        }
    }

    pub fn stats(&self) -> &MemoryCacheStats {
        &self.stats
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Drop every expired entry. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut cache = self.cache.write().await;
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            cache.pop(key);
        }

        if !expired.is_empty() {
            self.stats
                .expired
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(removed = expired.len(), "Swept expired metadata entries");
        }
        expired.len()
    }
}

impl Default for MemoryMetadataCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MetadataCache for MemoryMetadataCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<serde_json::Value>> {
        let key = key.to_string();
        let mut cache = self.cache.write().await;

        let expired = match cache.get(&key) {
            Some(entry) if !entry.is_expired() => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.payload.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            cache.pop(&key);
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put(
        &self,
        key: &CacheKey,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.cache.write().await.put(
            key.to_string(),
            CachedPayload {
                payload,
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<u64> {
        let mut cache = self.cache.write().await;
        let doomed: Vec<String> = cache
            .iter()
            .filter(|(k, _)| key.covers(k))
            .map(|(k, _)| k.clone())
            .collect();

        for k in &doomed {
            cache.pop(k);
        }

        let removed = doomed.len() as u64;
        self.stats.invalidated.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn initialize(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn cleanup(&self) -> CacheResult<()> {
        self.cache.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get() {
        let cache = MemoryMetadataCache::new(16);
        let key = CacheKey::country("laos");
        cache
            .put(&key, json!({"country": "laos"}), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), Some(json!({"country": "laos"})));
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert!(cache.get(&CacheKey::country("bhutan")).await.unwrap().is_none());
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_lru_capacity() {
        let cache = MemoryMetadataCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.put(&CacheKey::country("a"), json!(1), ttl).await.unwrap();
        cache.put(&CacheKey::country("b"), json!(2), ttl).await.unwrap();
        cache.put(&CacheKey::country("c"), json!(3), ttl).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&CacheKey::country("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let cache = MemoryMetadataCache::new(16);
        cache
            .put(&CacheKey::country("a"), json!(1), Duration::from_millis(1))
            .await
            .unwrap();
        cache
            .put(&CacheKey::country("b"), json!(2), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.sweep_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let cache = MemoryMetadataCache::new(0);
        cache
            .put(&CacheKey::country("a"), json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
