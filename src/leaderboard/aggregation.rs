use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::LeaderboardLock;
use crate::{
    cache::{Cache, CacheKey},
    models::{
        LeaderboardError, NewScoreEvent, PlayerStanding, RankAssignment, Result, TotalMismatch,
    },
    ranking::rank_entries,
    store::LeaderboardStore,
};

/// Owns the write path: record the event, update the total, rerank everyone,
/// evict what went stale.
pub struct AggregationService {
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn Cache>,
    lock: LeaderboardLock,
    default_game_mode: String,
}

impl AggregationService {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        cache: Arc<dyn Cache>,
        lock: LeaderboardLock,
        default_game_mode: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            lock,
            default_game_mode: default_game_mode.into(),
        }
    }

    pub async fn submit_score(&self, user_id: i64, score: i64) -> Result<PlayerStanding> {
        let mode = self.default_game_mode.clone();
        self.submit_score_in_mode(user_id, score, &mode).await
    }

    /// Apply one score delta. The whole sequence runs under the leaderboard
    /// write lock inside one store transaction; any failure, including a failed
    /// cache eviction, leaves the store untouched.
    pub async fn submit_score_in_mode(
        &self,
        user_id: i64,
        score: i64,
        game_mode: &str,
    ) -> Result<PlayerStanding> {
        info!("Submitting score {} for user {} ({})", score, user_id, game_mode);

        let _guard = self.lock.write().await;
        let mut tx = self.store.begin().await?;

        let user = tx
            .find_user(user_id)
            .await?
            .ok_or(LeaderboardError::NotFound(user_id))?;

        tx.append_score_event(&NewScoreEvent::now(user_id, score, game_mode))
            .await?;
        debug!("Recorded score event for user {}", user_id);

        let new_total = match tx.get_leaderboard_entry(user_id).await? {
            Some(entry) => entry
                .total_score
                .checked_add(score)
                .ok_or(LeaderboardError::ScoreOverflow { user_id })?,
            None => score,
        };
        tx.upsert_leaderboard_total(user_id, new_total).await?;
        debug!("Total for user {} is now {}", user_id, new_total);

        let entries = tx.list_all_leaderboard_entries().await?;
        let previous_ranks: HashMap<i64, Option<u32>> =
            entries.iter().map(|e| (e.user_id, e.rank)).collect();
        let ranks = rank_entries(&entries);
        tx.persist_ranks(&ranks).await?;
        debug!("Recomputed ranks for {} entries", ranks.len());

        let entry = tx.get_leaderboard_entry(user_id).await?.ok_or_else(|| {
            error!("No leaderboard entry for user {} after upsert", user_id);
            LeaderboardError::InvariantViolation(format!(
                "leaderboard entry missing for user {} after upsert",
                user_id
            ))
        })?;

        if let Err(e) = self.evict_stale(user_id, &previous_ranks, &ranks).await {
            error!("Aborting submission for user {}: eviction failed: {}", user_id, e);
            return Err(e);
        }

        tx.commit().await?;
        info!(
            "Score submitted for user {}: total={}, rank={:?}",
            user_id, entry.total_score, entry.rank
        );

        Ok(PlayerStanding::from_entry(&user, &entry))
    }

    /// Evict the submitter's rank, the rank of anyone whose position moved and
    /// every cached top-N list.
    async fn evict_stale(
        &self,
        user_id: i64,
        previous_ranks: &HashMap<i64, Option<u32>>,
        ranks: &[RankAssignment],
    ) -> Result<()> {
        self.cache.evict(&CacheKey::rank(user_id)).await?;

        for assignment in ranks {
            if assignment.user_id == user_id {
                continue;
            }
            let before = previous_ranks.get(&assignment.user_id).copied().flatten();
            if before != Some(assignment.rank) {
                self.cache.evict(&CacheKey::rank(assignment.user_id)).await?;
            }
        }

        self.cache.evict_all_with_prefix(CacheKey::TOP_PREFIX).await
    }

    /// Compare every recorded total against the sum of its score events.
    pub async fn audit_totals(&self) -> Result<Vec<TotalMismatch>> {
        let _guard = self.lock.read().await;

        let sums: HashMap<i64, i64> = self
            .store
            .sum_score_events_by_user()
            .await?
            .into_iter()
            .collect();
        let entries = self.store.list_all_leaderboard_entries().await?;

        let mut mismatches: Vec<TotalMismatch> = entries
            .iter()
            .filter_map(|entry| {
                let event_sum = sums.get(&entry.user_id).copied().unwrap_or(0);
                (event_sum != entry.total_score).then(|| TotalMismatch {
                    user_id: entry.user_id,
                    recorded_total: entry.total_score,
                    event_sum,
                })
            })
            .collect();

        // events with no entry at all
        for (&user_id, &event_sum) in &sums {
            if !entries.iter().any(|e| e.user_id == user_id) {
                mismatches.push(TotalMismatch {
                    user_id,
                    recorded_total: 0,
                    event_sum,
                });
            }
        }

        mismatches.sort_by_key(|m| m.user_id);
        if !mismatches.is_empty() {
            error!("Found {} leaderboard totals out of sync", mismatches.len());
        }
        Ok(mismatches)
    }
}
