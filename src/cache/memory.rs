use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::Cache;
use crate::config::CacheSettings;
use crate::models::{LeaderboardError, Result};

/// Cache entry with an optional TTL
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Process-scoped in-memory cache.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry<String>>>>,
    ttl: Option<Duration>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(None, 10_000)
    }
}

impl MemoryCache {
    pub fn new(ttl: Option<Duration>, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.ttl(), settings.max_entries)
    }

    fn purge_expired(cache: &mut HashMap<String, CacheEntry<String>>) {
        let before = cache.len();
        cache.retain(|_, entry| !entry.is_expired());
        if cache.len() < before {
            debug!("Purged {} expired cache entries", before - cache.len());
        }
    }

    /// Expired entries go first; live ones are dropped oldest first.
    fn make_room(cache: &mut HashMap<String, CacheEntry<String>>, max_entries: usize) {
        if cache.len() < max_entries {
            return;
        }

        Self::purge_expired(cache);

        while cache.len() >= max_entries {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    debug!("Cache full, dropping oldest key: {}", key);
                    cache.remove(&key);
                }
                None => break,
            }
        }
    }
}

fn poisoned<E>(_: E) -> LeaderboardError {
    LeaderboardError::CacheUnavailable("cache lock poisoned".to_string())
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let cache = self.entries.read().map_err(poisoned)?;

        match cache.get(key).filter(|entry| !entry.is_expired()) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache HIT for key: {}", key);
                Ok(Some(entry.value.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache MISS for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let mut cache = self.entries.write().map_err(poisoned)?;
        if !cache.contains_key(key) {
            Self::make_room(&mut cache, self.max_entries);
        }
        cache.insert(key.to_string(), CacheEntry::new(value, self.ttl));
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let mut cache = self.entries.write().map_err(poisoned)?;
        if cache.remove(key).is_some() {
            debug!("Evicted cache key: {}", key);
        }
        Ok(())
    }

    async fn evict_all_with_prefix(&self, prefix: &str) -> Result<()> {
        let mut cache = self.entries.write().map_err(poisoned)?;
        let before = cache.len();
        cache.retain(|key, _| !key.starts_with(prefix));
        debug!("Evicted {} cache keys with prefix {}", before - cache.len(), prefix);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        let entries = self.entries.read().map(|c| c.len()).unwrap_or(0);

        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// Cache used when caching is switched off: every read misses.
#[derive(Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: String) -> Result<()> {
        Ok(())
    }

    async fn evict(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn evict_all_with_prefix(&self, _prefix: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_entry_expiration() {
        let entry = CacheEntry::new("test_value".to_string(), Some(Duration::from_millis(10)));
        assert!(!entry.is_expired());

        std::thread::sleep(Duration::from_millis(15));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new(1u32, None);
        assert!(!entry.is_expired());
    }

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = MemoryCache::default();

        cache.put("rank:1", "{}".to_string()).await.unwrap();
        assert_eq!(cache.get("rank:1").await.unwrap().as_deref(), Some("{}"));
        assert!(cache.get("rank:2").await.unwrap().is_none());

        cache.evict("rank:1").await.unwrap();
        assert!(cache.get("rank:1").await.unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_prefix_eviction_leaves_other_keys() {
        let cache = MemoryCache::default();
        cache.put("top:10", "a".to_string()).await.unwrap();
        cache.put("top:3", "b".to_string()).await.unwrap();
        cache.put("rank:7", "c".to_string()).await.unwrap();

        cache.evict_all_with_prefix("top:").await.unwrap();

        assert!(cache.get("top:10").await.unwrap().is_none());
        assert!(cache.get("top:3").await.unwrap().is_none());
        assert!(cache.get("rank:7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_miss() {
        let cache = MemoryCache::new(Some(Duration::from_millis(5)), 10);
        cache.put("top:1", "x".to_string()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache.get("top:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_cache_purges_expired_before_live_entries() {
        let cache = MemoryCache::new(Some(Duration::from_millis(5)), 2);
        cache.put("top:1", "x".to_string()).await.unwrap();
        cache.put("top:2", "y".to_string()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.put("rank:1", "z".to_string()).await.unwrap();

        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get("rank:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest_entry() {
        let cache = MemoryCache::new(None, 2);
        cache.put("a", "1".to_string()).await.unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b", "2".to_string()).await.unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.put("c", "3".to_string()).await.unwrap();

        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_empties_cache() {
        let cache = MemoryCache::default();
        cache.put("top:5", "x".to_string()).await.unwrap();

        cache.clear().await.unwrap();

        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_noop_cache_always_misses() {
        let cache = NoopCache;
        cache.put("top:1", "x".to_string()).await.unwrap();
        assert!(cache.get("top:1").await.unwrap().is_none());
    }
}
