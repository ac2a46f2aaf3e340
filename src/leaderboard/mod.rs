pub mod aggregation;
pub mod query;

use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::{
    cache::{Cache, CacheStats, MemoryCache, NoopCache},
    config::Settings,
    models::{PlayerStanding, Result, TotalMismatch, User},
    store::LeaderboardStore,
};

pub use aggregation::AggregationService;
pub use query::QueryService;

/// Mutual exclusion over the leaderboard aggregate.
///
/// Submissions take the write half for their whole read-modify-write-evict
/// sequence. Cache-miss reads take the read half so they cannot repopulate the
/// cache with data a concurrent submission is about to replace.
#[derive(Debug, Clone, Default)]
pub struct LeaderboardLock(Arc<RwLock<()>>);

impl LeaderboardLock {
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().await
    }
}

/// Entry point wiring the store, the cache and both services together.
pub struct Leaderboard {
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn Cache>,
    aggregation: AggregationService,
    query: QueryService,
    lock: LeaderboardLock,
    default_top_limit: usize,
}

impl Leaderboard {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        cache: Arc<dyn Cache>,
        settings: &Settings,
    ) -> Self {
        let lock = LeaderboardLock::default();
        let aggregation = AggregationService::new(
            store.clone(),
            cache.clone(),
            lock.clone(),
            settings.leaderboard.default_game_mode.clone(),
        );
        let query = QueryService::new(
            store.clone(),
            cache.clone(),
            lock.clone(),
            settings.leaderboard.max_top_limit,
        );

        Self {
            store,
            cache,
            aggregation,
            query,
            lock,
            default_top_limit: settings.leaderboard.default_top_limit,
        }
    }

    /// Build with the cache implementation selected by `settings.cache`.
    pub fn with_configured_cache(store: Arc<dyn LeaderboardStore>, settings: &Settings) -> Self {
        let cache: Arc<dyn Cache> = if settings.cache.enabled {
            Arc::new(MemoryCache::from_settings(&settings.cache))
        } else {
            info!("Caching disabled");
            Arc::new(NoopCache)
        };
        Self::new(store, cache, settings)
    }

    /// Registration writes to the store, so it queues behind submissions.
    pub async fn register_user(&self, username: &str) -> Result<User> {
        let _guard = self.lock.write().await;
        info!("Registering user {}", username);
        self.store.create_user(username).await
    }

    pub async fn submit_score(&self, user_id: i64, score: i64) -> Result<PlayerStanding> {
        self.aggregation.submit_score(user_id, score).await
    }

    pub async fn submit_score_in_mode(
        &self,
        user_id: i64,
        score: i64,
        game_mode: &str,
    ) -> Result<PlayerStanding> {
        self.aggregation
            .submit_score_in_mode(user_id, score, game_mode)
            .await
    }

    pub async fn get_top(&self, limit: usize) -> Result<Vec<PlayerStanding>> {
        self.query.get_top(limit).await
    }

    pub async fn get_default_top(&self) -> Result<Vec<PlayerStanding>> {
        self.query.get_top(self.default_top_limit).await
    }

    pub async fn get_rank(&self, user_id: i64) -> Result<PlayerStanding> {
        self.query.get_rank(user_id).await
    }

    pub async fn audit_totals(&self) -> Result<Vec<TotalMismatch>> {
        self.aggregation.audit_totals().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// End of the cache lifecycle.
    pub async fn shutdown(&self) -> Result<()> {
        let stats = self.cache.stats();
        info!(
            "Shutting down leaderboard cache ({} entries, {} hits, {} misses)",
            stats.entries, stats.hits, stats.misses
        );
        self.cache.clear().await
    }
}
