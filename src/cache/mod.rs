pub mod memory;

use async_trait::async_trait;

use crate::models::Result;

pub use memory::{MemoryCache, NoopCache, CacheEntry, CacheStats};

/// Key/value cache consumed by the query and aggregation services.
///
/// Values are opaque strings (the services store JSON). Implementations report
/// transport problems as `LeaderboardError::CacheUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: String) -> Result<()>;

    async fn evict(&self, key: &str) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`.
    async fn evict_all_with_prefix(&self, prefix: &str) -> Result<()>;

    /// Snapshot of usage counters, if the implementation tracks them.
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    /// Drop everything. Called when the owning process shuts down.
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// Cache key builder for consistent key generation
pub struct CacheKey;

impl CacheKey {
    pub const TOP_PREFIX: &'static str = "top:";
    pub const RANK_PREFIX: &'static str = "rank:";

    pub fn top(limit: usize) -> String {
        format!("{}{}", Self::TOP_PREFIX, limit)
    }

    pub fn rank(user_id: i64) -> String {
        format!("{}{}", Self::RANK_PREFIX, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_generation() {
        assert_eq!(CacheKey::top(10), "top:10");
        assert_eq!(CacheKey::rank(42), "rank:42");
        assert!(CacheKey::top(3).starts_with(CacheKey::TOP_PREFIX));
    }
}
