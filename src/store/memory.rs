use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LeaderboardStore, StoreTransaction};
use crate::models::{
    LeaderboardEntry, LeaderboardError, NewScoreEvent, PlayerStanding, RankAssignment, Result,
    ScoreEvent, User,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    events: Vec<ScoreEvent>,
    entries: BTreeMap<i64, LeaderboardEntry>,
    next_user_id: i64,
    next_event_id: i64,
}

impl MemoryState {
    fn sorted_entries(&self) -> Vec<&LeaderboardEntry> {
        let mut entries: Vec<&LeaderboardEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            b.total_score
                .cmp(&a.total_score)
                .then(a.user_id.cmp(&b.user_id))
        });
        entries
    }
}

/// In-process store. A transaction owns the state lock for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded for a user, oldest first.
    pub async fn score_events(&self, user_id: i64) -> Vec<ScoreEvent> {
        let state = self.state.lock().await;
        state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    async fn create_user(&self, username: &str) -> Result<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == username) {
            return Err(LeaderboardError::DuplicateUsername(username.to_string()));
        }

        state.next_user_id += 1;
        let user = User::new(state.next_user_id, username);
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_leaderboard_entry(&self, user_id: i64) -> Result<Option<LeaderboardEntry>> {
        Ok(self.state.lock().await.entries.get(&user_id).cloned())
    }

    async fn list_entries_by_score_desc(&self, limit: usize) -> Result<Vec<PlayerStanding>> {
        let state = self.state.lock().await;

        state
            .sorted_entries()
            .into_iter()
            .take(limit)
            .map(|entry| -> Result<PlayerStanding> {
                let user = state.users.get(&entry.user_id).ok_or_else(|| {
                    LeaderboardError::InvariantViolation(format!(
                        "leaderboard entry without user {}",
                        entry.user_id
                    ))
                })?;
                Ok(PlayerStanding::from_entry(user, entry))
            })
            .collect()
    }

    async fn list_all_leaderboard_entries(&self) -> Result<Vec<LeaderboardEntry>> {
        Ok(self.state.lock().await.entries.values().cloned().collect())
    }

    async fn sum_score_events_by_user(&self) -> Result<Vec<(i64, i64)>> {
        let state = self.state.lock().await;
        let mut sums: BTreeMap<i64, i64> = BTreeMap::new();
        for event in &state.events {
            *sums.entry(event.user_id).or_insert(0) += event.score;
        }
        Ok(sums.into_iter().collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;

        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            pending_events: Vec::new(),
            staged_entries: BTreeMap::new(),
        }))
    }
}

/// Holds the state lock and stages only its own writes: new events and the
/// entries it touched. Both are applied on commit and discarded on drop.
struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    pending_events: Vec<ScoreEvent>,
    staged_entries: BTreeMap<i64, LeaderboardEntry>,
}

impl MemoryTransaction {
    fn state(&self) -> Result<&MemoryState> {
        self.guard.as_deref().ok_or_else(|| {
            LeaderboardError::InvariantViolation("transaction already committed".to_string())
        })
    }

    fn current_entry(&self, user_id: i64) -> Result<Option<LeaderboardEntry>> {
        if let Some(entry) = self.staged_entries.get(&user_id) {
            return Ok(Some(entry.clone()));
        }
        Ok(self.state()?.entries.get(&user_id).cloned())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_user(&mut self, id: i64) -> Result<Option<User>> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn append_score_event(&mut self, event: &NewScoreEvent) -> Result<()> {
        let id = self.state()?.next_event_id + self.pending_events.len() as i64 + 1;
        self.pending_events.push(ScoreEvent {
            id,
            user_id: event.user_id,
            score: event.score,
            game_mode: event.game_mode.clone(),
            timestamp: event.timestamp,
        });
        Ok(())
    }

    async fn get_leaderboard_entry(&mut self, user_id: i64) -> Result<Option<LeaderboardEntry>> {
        self.current_entry(user_id)
    }

    async fn upsert_leaderboard_total(&mut self, user_id: i64, new_total: i64) -> Result<()> {
        let entry = match self.current_entry(user_id)? {
            Some(entry) => LeaderboardEntry {
                total_score: new_total,
                ..entry
            },
            None => LeaderboardEntry {
                user_id,
                total_score: new_total,
                rank: None,
            },
        };
        self.staged_entries.insert(user_id, entry);
        Ok(())
    }

    async fn list_all_leaderboard_entries(&mut self) -> Result<Vec<LeaderboardEntry>> {
        let mut merged = self.state()?.entries.clone();
        merged.extend(
            self.staged_entries
                .iter()
                .map(|(id, entry)| (*id, entry.clone())),
        );
        Ok(merged.into_values().collect())
    }

    async fn persist_ranks(&mut self, ranks: &[RankAssignment]) -> Result<()> {
        for assignment in ranks {
            if let Some(mut entry) = self.current_entry(assignment.user_id)? {
                entry.rank = Some(assignment.rank);
                self.staged_entries.insert(assignment.user_id, entry);
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut guard = self.guard.take().ok_or_else(|| {
            LeaderboardError::InvariantViolation("transaction already committed".to_string())
        })?;

        guard.next_event_id += self.pending_events.len() as i64;
        guard.events.append(&mut self.pending_events);
        guard.entries.append(&mut self.staged_entries);
        Ok(())
    }
}
