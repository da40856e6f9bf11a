//! Persistence layer.
//!
//! SQLite through sqlx. The store is the single source of truth shared by
//! the sync tier, the reconciler and the dispatcher; every write that can
//! race is a single conflict-safe statement. Timestamps are stored as unix
//! seconds.
//!
//! Queries live next to the table they touch: `games`, `predictions`,
//! `stats`, `notifications` and the read-only account tables in `users`.

mod games;
mod notifications;
mod predictions;
mod stats;
mod users;

pub use predictions::{SettledPick, SettlementCandidate, UpcomingPick};
pub use users::Preferences;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// Schema statements, applied in order by [`Store::migrate`].
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS games (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id   TEXT NOT NULL UNIQUE,
        season        INTEGER NOT NULL,
        week          INTEGER NOT NULL,
        scheduled_at  INTEGER NOT NULL,
        status        TEXT NOT NULL,
        home_team     TEXT NOT NULL,
        away_team     TEXT NOT NULL,
        home_score    INTEGER,
        away_score    INTEGER,
        spread        REAL,
        total         REAL,
        venue         TEXT,
        weather       TEXT,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_games_season_week ON games (season, week)",
    "CREATE INDEX IF NOT EXISTS idx_games_status_time ON games (status, scheduled_at)",
    "CREATE TABLE IF NOT EXISTS predictions (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        game_id         INTEGER NOT NULL REFERENCES games (id),
        user_id         INTEGER,
        prediction_type TEXT NOT NULL,
        predicted_side  TEXT NOT NULL,
        confidence      REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        result          TEXT NOT NULL DEFAULT 'pending',
        actual_side     TEXT,
        margin          REAL,
        created_at      INTEGER NOT NULL,
        settled_at      INTEGER
    )",
    // One model pick per game and type; user picks are unconstrained.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_predictions_model_pick
        ON predictions (game_id, prediction_type) WHERE user_id IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_predictions_result ON predictions (result)",
    "CREATE TABLE IF NOT EXISTS aggregate_stats (
        scope          TEXT NOT NULL,
        scope_id       TEXT NOT NULL,
        total          INTEGER NOT NULL,
        correct        INTEGER NOT NULL,
        rate           REAL NOT NULL,
        avg_confidence REAL NOT NULL,
        updated_at     INTEGER NOT NULL,
        PRIMARY KEY (scope, scope_id)
    )",
    "CREATE TABLE IF NOT EXISTS users (
        id     INTEGER PRIMARY KEY AUTOINCREMENT,
        email  TEXT,
        tier   TEXT NOT NULL DEFAULT 'free',
        active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS notification_preferences (
        user_id                INTEGER PRIMARY KEY REFERENCES users (id),
        email_enabled          INTEGER NOT NULL DEFAULT 1,
        push_enabled           INTEGER NOT NULL DEFAULT 1,
        weekly_digest          INTEGER NOT NULL DEFAULT 1,
        high_confidence_alerts INTEGER NOT NULL DEFAULT 1,
        event_start_alerts     INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS user_favorites (
        user_id INTEGER NOT NULL REFERENCES users (id),
        team    TEXT NOT NULL,
        PRIMARY KEY (user_id, team)
    )",
    "CREATE TABLE IF NOT EXISTS user_devices (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id    INTEGER NOT NULL REFERENCES users (id),
        push_token TEXT NOT NULL UNIQUE,
        active     INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS notification_queue (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        recipient_id  INTEGER NOT NULL,
        channel       TEXT NOT NULL,
        kind          TEXT NOT NULL,
        domain_key    TEXT NOT NULL,
        payload       TEXT NOT NULL,
        status        TEXT NOT NULL DEFAULT 'pending',
        scheduled_for INTEGER NOT NULL,
        created_at    INTEGER NOT NULL,
        sent_at       INTEGER,
        error         TEXT,
        attempts      INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_queue_due ON notification_queue (status, scheduled_for)",
    "CREATE INDEX IF NOT EXISTS idx_queue_dedup ON notification_queue (recipient_id, domain_key)",
];

/// Handle to the SQLite store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://pickline.db`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(url, max_connections, "Store connected");
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that is never recycled,
    /// since every new in-memory connection would see an empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables and indexes. Idempotent; must run before any job fires.
    pub async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(statements = SCHEMA.len(), "Schema migrated");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn to_unix(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| EngineError::Integrity(format!("timestamp out of range: {secs}")))
}

pub(crate) fn from_unix_opt(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(from_unix).transpose()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    let store = Store::open_in_memory().await.unwrap();
    store.migrate().await.unwrap();
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
        store.ping().await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(store.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in [
            "aggregate_stats",
            "games",
            "notification_queue",
            "predictions",
            "user_devices",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let mut path = std::env::temp_dir();
        path.push(format!("pickline_test_{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.to_string_lossy());

        let store = Store::connect(&url, 4).await.unwrap();
        store.migrate().await.unwrap();
        store.ping().await.unwrap();
        store.close().await;

        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unix_conversion() {
        let now = Utc::now();
        let back = from_unix(to_unix(now)).unwrap();
        assert_eq!(back.timestamp(), now.timestamp());
        assert!(from_unix_opt(None).unwrap().is_none());
    }
}
