use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeaderboardError {
    #[error("User not found: {0}")]
    NotFound(i64),

    #[error("Leaderboard invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Total score overflow for user {user_id}")]
    ScoreOverflow { user_id: i64 },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, LeaderboardError>;
