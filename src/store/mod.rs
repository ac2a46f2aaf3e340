pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::models::{
    LeaderboardEntry, NewScoreEvent, PlayerStanding, RankAssignment, Result, User,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Durable record of users, score events and the derived ranked totals.
///
/// Reads here see committed state only. Every mutation of a score submission
/// goes through a [`StoreTransaction`] obtained from [`LeaderboardStore::begin`].
#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    async fn create_user(&self, username: &str) -> Result<User>;

    async fn find_user(&self, id: i64) -> Result<Option<User>>;

    async fn get_leaderboard_entry(&self, user_id: i64) -> Result<Option<LeaderboardEntry>>;

    /// Ranked view ordered by total descending, ties by ascending user id.
    async fn list_entries_by_score_desc(&self, limit: usize) -> Result<Vec<PlayerStanding>>;

    async fn list_all_leaderboard_entries(&self) -> Result<Vec<LeaderboardEntry>>;

    /// `(user_id, sum of score)` for every user with at least one event.
    async fn sum_score_events_by_user(&self) -> Result<Vec<(i64, i64)>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// One atomic unit of work. Dropping it without [`commit`](Self::commit) rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_user(&mut self, id: i64) -> Result<Option<User>>;

    async fn append_score_event(&mut self, event: &NewScoreEvent) -> Result<()>;

    async fn get_leaderboard_entry(&mut self, user_id: i64) -> Result<Option<LeaderboardEntry>>;

    /// Create the entry with `new_total` or overwrite the existing total.
    async fn upsert_leaderboard_total(&mut self, user_id: i64, new_total: i64) -> Result<()>;

    async fn list_all_leaderboard_entries(&mut self) -> Result<Vec<LeaderboardEntry>>;

    async fn persist_ranks(&mut self, ranks: &[RankAssignment]) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;
}
