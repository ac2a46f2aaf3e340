use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::User;

/// One raw score submission. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub id: i64,
    pub user_id: i64,
    pub score: i64,
    pub game_mode: String,
    pub timestamp: DateTime<Utc>,
}

/// A score event that has not been assigned an id by the store yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScoreEvent {
    pub user_id: i64,
    pub score: i64,
    pub game_mode: String,
    pub timestamp: DateTime<Utc>,
}

impl NewScoreEvent {
    pub fn now(user_id: i64, score: i64, game_mode: impl Into<String>) -> Self {
        Self {
            user_id,
            score,
            game_mode: game_mode.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Derived per-user total. `rank` stays `None` until the first rerank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub total_score: i64,
    pub rank: Option<u32>,
}

/// Rank produced by the ranking engine for a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankAssignment {
    pub user_id: i64,
    pub rank: u32,
}

/// What callers get back from submissions and queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStanding {
    pub user_id: i64,
    pub username: String,
    pub total_score: i64,
    pub rank: Option<u32>,
}

impl PlayerStanding {
    pub fn from_entry(user: &User, entry: &LeaderboardEntry) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            total_score: entry.total_score,
            rank: entry.rank,
        }
    }

    /// Standing of a user that has never submitted a score.
    pub fn unranked(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            total_score: 0,
            rank: None,
        }
    }
}

/// A leaderboard total that disagrees with the sum of the user's score events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalMismatch {
    pub user_id: i64,
    pub recorded_total: i64,
    pub event_sum: i64,
}
