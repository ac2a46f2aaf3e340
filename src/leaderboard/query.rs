use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::LeaderboardLock;
use crate::{
    cache::{Cache, CacheKey},
    models::{LeaderboardError, PlayerStanding, Result},
    store::LeaderboardStore,
};

/// Read path: cache first, committed store state on a miss.
pub struct QueryService {
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn Cache>,
    lock: LeaderboardLock,
    max_top_limit: usize,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        cache: Arc<dyn Cache>,
        lock: LeaderboardLock,
        max_top_limit: usize,
    ) -> Self {
        Self {
            store,
            cache,
            lock,
            max_top_limit,
        }
    }

    /// At most `limit` rows in rank order. `limit` caps rows, not ranks, so a
    /// tie group may be cut; the lower user id wins the remaining slots.
    pub async fn get_top(&self, limit: usize) -> Result<Vec<PlayerStanding>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = if limit > self.max_top_limit {
            debug!("Clamping top limit {} to {}", limit, self.max_top_limit);
            self.max_top_limit
        } else {
            limit
        };
        info!("Fetching top {} players", limit);

        let key = CacheKey::top(limit);
        if let Some(top) = self.cached::<Vec<PlayerStanding>>(&key).await {
            return Ok(top);
        }

        let _guard = self.lock.read().await;
        let top = self.store.list_entries_by_score_desc(limit).await?;
        debug!("Fetched {} leaderboard entries", top.len());

        self.populate(&key, &top).await;
        Ok(top)
    }

    /// Current standing of one user; total 0 and no rank if they never scored.
    pub async fn get_rank(&self, user_id: i64) -> Result<PlayerStanding> {
        info!("Fetching rank for user {}", user_id);

        let key = CacheKey::rank(user_id);
        if let Some(standing) = self.cached::<PlayerStanding>(&key).await {
            return Ok(standing);
        }

        let _guard = self.lock.read().await;
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(LeaderboardError::NotFound(user_id))?;

        let standing = match self.store.get_leaderboard_entry(user_id).await? {
            Some(entry) => {
                info!(
                    "User {} rank={:?}, score={}",
                    user_id, entry.rank, entry.total_score
                );
                PlayerStanding::from_entry(&user, &entry)
            }
            None => {
                info!("User {} is not ranked yet", user_id);
                PlayerStanding::unranked(&user)
            }
        };

        self.populate(&key, &standing).await;
        Ok(standing)
    }

    /// A broken or undecodable cache read is treated as a miss.
    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Discarding undecodable cache value for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {}, falling back to store: {}", key, e);
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not encode cache value for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.cache.put(key, raw).await {
            warn!("Cache populate failed for {}: {}", key, e);
        }
    }
}
