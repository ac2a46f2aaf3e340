use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::Sqlite;
use tracing::{debug, info, warn};

use super::{LeaderboardStore, StoreTransaction};
use crate::config::DatabaseSettings;
use crate::models::{
    LeaderboardEntry, LeaderboardError, NewScoreEvent, PlayerStanding, RankAssignment, Result,
    User,
};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS users (
        id          INTEGER     PRIMARY KEY AUTOINCREMENT,
        username    TEXT        NOT NULL UNIQUE,
        join_date   TEXT        NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS score_events (
        id          INTEGER     PRIMARY KEY AUTOINCREMENT,
        user_id     INTEGER     NOT NULL REFERENCES users(id),
        score       INTEGER     NOT NULL,
        game_mode   TEXT        NOT NULL,
        timestamp   TEXT        NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS leaderboard (
        user_id     INTEGER     PRIMARY KEY REFERENCES users(id),
        total_score INTEGER     NOT NULL,
        ranking     INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_leaderboard_total
        ON leaderboard (total_score DESC, user_id ASC)",
];

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    join_date: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            join_date: row.join_date,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    user_id: i64,
    total_score: i64,
    ranking: Option<i64>,
}

fn stored_rank(user_id: i64, ranking: Option<i64>) -> Result<Option<u32>> {
    ranking
        .map(|r| {
            u32::try_from(r).map_err(|_| {
                LeaderboardError::InvariantViolation(format!(
                    "stored rank {} for user {} is out of range",
                    r, user_id
                ))
            })
        })
        .transpose()
}

impl TryFrom<EntryRow> for LeaderboardEntry {
    type Error = LeaderboardError;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Self {
            user_id: row.user_id,
            total_score: row.total_score,
            rank: stored_rank(row.user_id, row.ranking)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StandingRow {
    user_id: i64,
    username: String,
    total_score: i64,
    ranking: Option<i64>,
}

impl TryFrom<StandingRow> for PlayerStanding {
    type Error = LeaderboardError;

    fn try_from(row: StandingRow) -> Result<Self> {
        Ok(Self {
            rank: stored_rank(row.user_id, row.ranking)?,
            user_id: row.user_id,
            username: row.username,
            total_score: row.total_score,
        })
    }
}

const SELECT_USER: &str = "SELECT id, username, join_date FROM users WHERE id = ?";
const SELECT_ENTRY: &str = "SELECT user_id, total_score, ranking FROM leaderboard WHERE user_id = ?";
const SELECT_ALL_ENTRIES: &str = "SELECT user_id, total_score, ranking FROM leaderboard";

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&settings.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(settings.busy_timeout_seconds));

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_seconds));

        // every connection to :memory: would otherwise get its own empty database
        pool_options = if settings.url.contains(":memory:") {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            pool_options
                .max_connections(settings.max_connections)
                .min_connections(settings.min_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        info!("Connected to leaderboard database at {}", settings.url);

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Connect to a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let settings = DatabaseSettings {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout_seconds: 30,
            busy_timeout_seconds: 5,
        };
        Self::connect(&settings).await
    }

    async fn initialize_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Leaderboard schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl LeaderboardStore for SqliteStore {
    async fn create_user(&self, username: &str) -> Result<User> {
        let join_date = Utc::now();
        let result = sqlx::query("INSERT INTO users (username, join_date) VALUES (?, ?)")
            .bind(username)
            .bind(join_date)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(User {
                id: done.last_insert_rowid(),
                username: username.to_string(),
                join_date,
            }),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(LeaderboardError::DuplicateUsername(username.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(SELECT_USER)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn get_leaderboard_entry(&self, user_id: i64) -> Result<Option<LeaderboardEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(SELECT_ENTRY)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LeaderboardEntry::try_from).transpose()
    }

    async fn list_entries_by_score_desc(&self, limit: usize) -> Result<Vec<PlayerStanding>> {
        let rows = sqlx::query_as::<_, StandingRow>(
            "SELECT l.user_id, u.username, l.total_score, l.ranking
             FROM leaderboard l
             JOIN users u ON u.id = l.user_id
             ORDER BY l.total_score DESC, l.user_id ASC
             LIMIT ?",
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PlayerStanding::try_from).collect()
    }

    async fn list_all_leaderboard_entries(&self) -> Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(SELECT_ALL_ENTRIES)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LeaderboardEntry::try_from).collect()
    }

    async fn sum_score_events_by_user(&self) -> Result<Vec<(i64, i64)>> {
        let sums = sqlx::query_as::<_, (i64, i64)>(
            "SELECT user_id, SUM(score) FROM score_events GROUP BY user_id ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sums)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        // IMMEDIATE takes the write lock up front so a second writer waits out
        // busy_timeout instead of failing on a shared-to-write upgrade
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Box::new(SqliteTransaction { conn: Some(conn) }))
    }
}

/// A write transaction pinned to one pooled connection. Dropping it before
/// `commit` rolls the transaction back.
struct SqliteTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl SqliteTransaction {
    fn open(&mut self) -> Result<&mut PoolConnection<Sqlite>> {
        self.conn.as_mut().ok_or_else(|| {
            LeaderboardError::InvariantViolation("transaction already committed".to_string())
        })
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        warn!("Rollback failed, discarding connection: {}", e);
                        drop(conn.detach());
                    }
                });
            }
            // closing the connection discards its open transaction
            Err(_) => drop(conn.detach()),
        }
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn find_user(&mut self, id: i64) -> Result<Option<User>> {
        let conn = self.open()?;
        let row = sqlx::query_as::<_, UserRow>(SELECT_USER)
            .bind(id)
            .fetch_optional(&mut **conn)
            .await?;
        Ok(row.map(User::from))
    }

    async fn append_score_event(&mut self, event: &NewScoreEvent) -> Result<()> {
        let conn = self.open()?;
        sqlx::query(
            "INSERT INTO score_events (user_id, score, game_mode, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(event.user_id)
        .bind(event.score)
        .bind(&event.game_mode)
        .bind(event.timestamp)
        .execute(&mut **conn)
        .await?;
        Ok(())
    }

    async fn get_leaderboard_entry(&mut self, user_id: i64) -> Result<Option<LeaderboardEntry>> {
        let conn = self.open()?;
        let row = sqlx::query_as::<_, EntryRow>(SELECT_ENTRY)
            .bind(user_id)
            .fetch_optional(&mut **conn)
            .await?;
        row.map(LeaderboardEntry::try_from).transpose()
    }

    async fn upsert_leaderboard_total(&mut self, user_id: i64, new_total: i64) -> Result<()> {
        let conn = self.open()?;
        sqlx::query(
            "INSERT INTO leaderboard (user_id, total_score) VALUES (?, ?)
             ON CONFLICT (user_id) DO UPDATE SET total_score = excluded.total_score",
        )
        .bind(user_id)
        .bind(new_total)
        .execute(&mut **conn)
        .await?;
        Ok(())
    }

    async fn list_all_leaderboard_entries(&mut self) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.open()?;
        let rows = sqlx::query_as::<_, EntryRow>(SELECT_ALL_ENTRIES)
            .fetch_all(&mut **conn)
            .await?;
        rows.into_iter().map(LeaderboardEntry::try_from).collect()
    }

    async fn persist_ranks(&mut self, ranks: &[RankAssignment]) -> Result<()> {
        let conn = self.open()?;
        for assignment in ranks {
            sqlx::query("UPDATE leaderboard SET ranking = ? WHERE user_id = ?")
                .bind(i64::from(assignment.rank))
                .bind(assignment.user_id)
                .execute(&mut **conn)
                .await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let conn = self.open()?;
        sqlx::query("COMMIT").execute(&mut **conn).await?;
        self.conn = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// File-backed database in the temp dir, removed on drop.
    struct ScratchDb {
        path: PathBuf,
    }

    impl ScratchDb {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "leaderboard-{}-{}.db",
                name,
                std::process::id()
            ));
            let _ = std::fs::remove_file(&path);
            Self { path }
        }

        fn settings(&self) -> DatabaseSettings {
            DatabaseSettings {
                url: format!("sqlite://{}", self.path.display()),
                max_connections: 4,
                min_connections: 1,
                connect_timeout_seconds: 30,
                busy_timeout_seconds: 5,
            }
        }
    }

    impl Drop for ScratchDb {
        fn drop(&mut self) {
            for suffix in ["", "-journal", "-wal", "-shm"] {
                let mut file = self.path.clone().into_os_string();
                file.push(suffix);
                let _ = std::fs::remove_file(file);
            }
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.create_user("alice").await.unwrap();

        let found = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert!(store.find_user(user.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_maps_to_domain_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_user("alice").await.unwrap();

        let err = store.create_user("alice").await.unwrap_err();
        assert!(matches!(err, LeaderboardError::DuplicateUsername(name) if name == "alice"));
    }

    #[tokio::test]
    async fn test_upsert_then_rank_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.create_user("a").await.unwrap();
        let b = store.create_user("b").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_leaderboard_total(a.id, 100).await.unwrap();
        tx.upsert_leaderboard_total(b.id, 100).await.unwrap();
        tx.upsert_leaderboard_total(a.id, 150).await.unwrap();
        tx.persist_ranks(&[
            RankAssignment { user_id: a.id, rank: 1 },
            RankAssignment { user_id: b.id, rank: 2 },
        ])
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let top = store.list_entries_by_score_desc(10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].user_id, a.id);
        assert_eq!(top[0].total_score, 150);
        assert_eq!(top[0].rank, Some(1));
        assert_eq!(top[1].rank, Some(2));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.create_user("alice").await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.append_score_event(&NewScoreEvent::now(user.id, 25, "default"))
                .await
                .unwrap();
            tx.upsert_leaderboard_total(user.id, 25).await.unwrap();
        }

        assert!(store.get_leaderboard_entry(user.id).await.unwrap().is_none());
        assert!(store.sum_score_events_by_user().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_stored_rank_is_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.create_user("alice").await.unwrap();

        sqlx::query("INSERT INTO leaderboard (user_id, total_score, ranking) VALUES (?, ?, ?)")
            .bind(user.id)
            .bind(10_i64)
            .bind(1_i64 << 40)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get_leaderboard_entry(user.id).await.unwrap_err();
        assert!(matches!(err, LeaderboardError::InvariantViolation(_)));

        let err = store.list_entries_by_score_desc(10).await.unwrap_err();
        assert!(matches!(err, LeaderboardError::InvariantViolation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_writer_waits_for_open_transaction() {
        let db = ScratchDb::new("writers");
        let store = SqliteStore::connect(&db.settings()).await.unwrap();
        let alice = store.create_user("alice").await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.find_user(alice.id).await.unwrap();

        let other = store.clone();
        let second = tokio::spawn(async move {
            let mut tx = other.begin().await?;
            tx.find_user(alice.id).await?;
            tx.upsert_leaderboard_total(alice.id, 7).await?;
            tx.commit().await
        });

        // let the second writer reach the database while the first is open
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.upsert_leaderboard_total(alice.id, 3).await.unwrap();
        first.commit().await.unwrap();

        second.await.unwrap().unwrap();
        let entry = store.get_leaderboard_entry(alice.id).await.unwrap().unwrap();
        assert_eq!(entry.total_score, 7);

        store.close().await;
    }
}
