use chrono::{DateTime, Utc};
use tracing::debug;

use super::{from_unix, to_unix, Store};
use crate::error::{EngineError, Result};
use crate::types::{Game, GameStatus, GameUpdate};

const GAME_COLUMNS: &str = "id, external_id, season, week, scheduled_at, status, home_team, \
     away_team, home_score, away_score, spread, total, venue, weather, updated_at";

/// Insert-or-update keyed on `external_id`. Only mutable fields are touched on
/// conflict, and only when the status transition is allowed; a regression
/// leaves the row unchanged and affects zero rows. Missing upstream values
/// never erase known ones. The WHERE clause mirrors
/// [`GameStatus::can_transition_to`].
const UPSERT_GAME: &str = "
    INSERT INTO games (external_id, season, week, scheduled_at, status, home_team, away_team,
                       home_score, away_score, spread, total, venue, weather, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
    ON CONFLICT (external_id) DO UPDATE SET
        status     = excluded.status,
        home_score = COALESCE(excluded.home_score, games.home_score),
        away_score = COALESCE(excluded.away_score, games.away_score),
        spread     = COALESCE(excluded.spread, games.spread),
        total      = COALESCE(excluded.total, games.total),
        weather    = COALESCE(excluded.weather, games.weather),
        updated_at = excluded.updated_at
    WHERE games.status = excluded.status
       OR (games.status = 'scheduled'   AND excluded.status IN ('in_progress', 'final', 'postponed'))
       OR (games.status = 'in_progress' AND excluded.status IN ('final', 'postponed'))
       OR (games.status = 'postponed'   AND excluded.status IN ('in_progress', 'final'))";

#[derive(sqlx::FromRow)]
struct GameRow {
    id: i64,
    external_id: String,
    season: i32,
    week: i32,
    scheduled_at: i64,
    status: String,
    home_team: String,
    away_team: String,
    home_score: Option<i32>,
    away_score: Option<i32>,
    spread: Option<f64>,
    total: Option<f64>,
    venue: Option<String>,
    weather: Option<String>,
    updated_at: i64,
}

impl TryFrom<GameRow> for Game {
    type Error = EngineError;

    fn try_from(row: GameRow) -> Result<Self> {
        Ok(Game {
            id: row.id,
            external_id: row.external_id,
            season: row.season,
            week: row.week,
            scheduled_at: from_unix(row.scheduled_at)?,
            status: row.status.parse()?,
            home_team: row.home_team,
            away_team: row.away_team,
            home_score: row.home_score,
            away_score: row.away_score,
            spread: row.spread,
            total: row.total,
            venue: row.venue,
            weather: row.weather,
            updated_at: from_unix(row.updated_at)?,
        })
    }
}

fn into_games(rows: Vec<GameRow>) -> Result<Vec<Game>> {
    rows.into_iter().map(Game::try_from).collect()
}

impl Store {
    /// Apply an upstream game record. Returns `Integrity` when the record would
    /// move the stored status backwards; the stored row is left untouched.
    pub async fn upsert_game(&self, update: &GameUpdate, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(UPSERT_GAME)
            .bind(&update.external_id)
            .bind(update.season)
            .bind(update.week)
            .bind(to_unix(update.scheduled_at))
            .bind(update.status.as_str())
            .bind(&update.home_team)
            .bind(&update.away_team)
            .bind(update.home_score)
            .bind(update.away_score)
            .bind(update.spread)
            .bind(update.total)
            .bind(&update.venue)
            .bind(&update.weather)
            .bind(to_unix(now))
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            let current = self
                .game_by_external_id(&update.external_id)
                .await?
                .map(|g| g.status.to_string())
                .unwrap_or_else(|| "missing".to_string());
            return Err(EngineError::Integrity(format!(
                "game {} status regression {current} -> {} rejected",
                update.external_id, update.status
            )));
        }

        debug!(external_id = %update.external_id, status = %update.status, "Game upserted");
        Ok(())
    }

    pub async fn games_for_week(&self, season: i32, week: i32) -> Result<Vec<Game>> {
        let rows: Vec<GameRow> = sqlx::query_as(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE season = ? AND week = ? \
             ORDER BY scheduled_at, id"
        ))
        .bind(season)
        .bind(week)
        .fetch_all(self.pool())
        .await?;
        into_games(rows)
    }

    pub async fn game(&self, id: i64) -> Result<Option<Game>> {
        let row: Option<GameRow> =
            sqlx::query_as(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(Game::try_from).transpose()
    }

    pub async fn game_by_external_id(&self, external_id: &str) -> Result<Option<Game>> {
        let row: Option<GameRow> =
            sqlx::query_as(&format!("SELECT {GAME_COLUMNS} FROM games WHERE external_id = ?"))
                .bind(external_id)
                .fetch_optional(self.pool())
                .await?;
        row.map(Game::try_from).transpose()
    }

    /// Scheduled games starting in `(from, until]`, soonest first.
    pub async fn upcoming_games(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Game>> {
        let rows: Vec<GameRow> = sqlx::query_as(&format!(
            "SELECT {GAME_COLUMNS} FROM games \
             WHERE status = ? AND scheduled_at > ? AND scheduled_at <= ? \
             ORDER BY scheduled_at, id LIMIT ?"
        ))
        .bind(GameStatus::Scheduled.as_str())
        .bind(to_unix(from))
        .bind(to_unix(until))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        into_games(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_store;

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let store = test_store().await;
        let now = Utc::now();
        let mut update = GameUpdate::sample("401", 2025, 5);
        store.upsert_game(&update, now).await.unwrap();

        update.status = GameStatus::Final;
        update.home_score = Some(24);
        update.away_score = Some(20);
        store.upsert_game(&update, now).await.unwrap();

        let games = store.games_for_week(2025, 5).await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].status, GameStatus::Final);
        assert_eq!(games[0].final_score(), Some((24, 20)));
        assert_eq!(games[0].spread, Some(-3.0));
    }

    #[tokio::test]
    async fn test_regression_is_rejected_and_row_unchanged() {
        let store = test_store().await;
        let now = Utc::now();
        let mut update = GameUpdate::sample("402", 2025, 5);
        update.status = GameStatus::Final;
        update.home_score = Some(17);
        update.away_score = Some(24);
        store.upsert_game(&update, now).await.unwrap();

        let mut stale = GameUpdate::sample("402", 2025, 5);
        stale.status = GameStatus::InProgress;
        stale.home_score = Some(10);
        stale.away_score = Some(3);
        let err = store.upsert_game(&stale, now).await.unwrap_err();
        assert!(matches!(err, EngineError::Integrity(_)));

        let game = store.game_by_external_id("402").await.unwrap().unwrap();
        assert_eq!(game.status, GameStatus::Final);
        assert_eq!(game.final_score(), Some((17, 24)));
    }

    #[tokio::test]
    async fn test_sql_transition_rule_matches_status_rule() {
        let store = test_store().await;
        let now = Utc::now();
        for (i, from) in GameStatus::ALL.iter().enumerate() {
            for (j, to) in GameStatus::ALL.iter().enumerate() {
                let id = format!("t-{i}-{j}");
                let mut update = GameUpdate::sample(&id, 2024, 1);
                update.status = *from;
                store.upsert_game(&update, now).await.unwrap();

                update.status = *to;
                let applied = store.upsert_game(&update, now).await.is_ok();
                assert_eq!(applied, from.can_transition_to(*to), "{from} -> {to}");
            }
        }
    }

    #[tokio::test]
    async fn test_missing_values_do_not_erase() {
        let store = test_store().await;
        let now = Utc::now();
        store
            .upsert_game(&GameUpdate::sample("403", 2025, 6), now)
            .await
            .unwrap();

        let mut update = GameUpdate::sample("403", 2025, 6);
        update.spread = None;
        update.total = None;
        store.upsert_game(&update, now).await.unwrap();

        let game = store.game_by_external_id("403").await.unwrap().unwrap();
        assert_eq!(game.spread, Some(-3.0));
        assert_eq!(game.total, Some(47.5));
    }

    #[tokio::test]
    async fn test_upcoming_games_window() {
        let store = test_store().await;
        let now = Utc::now();

        let mut soon = GameUpdate::sample("soon", 2025, 7);
        soon.scheduled_at = now + chrono::Duration::hours(3);
        let mut later = GameUpdate::sample("later", 2025, 7);
        later.scheduled_at = now + chrono::Duration::days(10);
        let mut started = GameUpdate::sample("started", 2025, 7);
        started.scheduled_at = now + chrono::Duration::hours(1);
        started.status = GameStatus::InProgress;

        for g in [&soon, &later, &started] {
            store.upsert_game(g, now).await.unwrap();
        }

        let games = store
            .upcoming_games(now, now + chrono::Duration::days(7), 5)
            .await
            .unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].external_id, "soon");
    }
}
