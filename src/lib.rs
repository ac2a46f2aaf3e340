pub mod models;
pub mod config;
pub mod ranking;
pub mod store;
pub mod cache;
pub mod leaderboard;

pub use models::{
    User, ScoreEvent, LeaderboardEntry, PlayerStanding, RankAssignment, TotalMismatch,
    LeaderboardError, Result,
};
pub use config::Settings;
pub use leaderboard::Leaderboard;
