use chrono::{DateTime, Utc};

use super::{from_unix, from_unix_opt, to_unix, Store};
use crate::error::{EngineError, Result};
use crate::types::{Game, GameStatus, NewPrediction, Pick, Prediction, PredictionResult, PredictionType};

const PREDICTION_COLUMNS: &str = "p.id AS id, p.game_id AS game_id, p.user_id AS user_id, \
     p.prediction_type AS prediction_type, p.predicted_side AS predicted_side, \
     p.confidence AS confidence, p.result AS result, p.actual_side AS actual_side, \
     p.margin AS margin, p.created_at AS created_at, p.settled_at AS settled_at";

#[derive(sqlx::FromRow)]
struct PredictionRow {
    id: i64,
    game_id: i64,
    user_id: Option<i64>,
    prediction_type: String,
    predicted_side: String,
    confidence: f64,
    result: String,
    actual_side: Option<String>,
    margin: Option<f64>,
    created_at: i64,
    settled_at: Option<i64>,
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = EngineError;

    fn try_from(row: PredictionRow) -> Result<Self> {
        Ok(Prediction {
            id: row.id,
            game_id: row.game_id,
            user_id: row.user_id,
            prediction_type: row.prediction_type.parse()?,
            pick: row.predicted_side.parse()?,
            confidence: row.confidence,
            result: row.result.parse()?,
            actual_side: row.actual_side.map(|s| s.parse()).transpose()?,
            margin: row.margin,
            created_at: from_unix(row.created_at)?,
            settled_at: from_unix_opt(row.settled_at)?,
        })
    }
}

/// A pending prediction whose game is final with both scores known.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCandidate {
    pub prediction: Prediction,
    pub home_score: i32,
    pub away_score: i32,
    pub spread: Option<f64>,
    pub total: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    prediction: PredictionRow,
    home_score: i32,
    away_score: i32,
    spread: Option<f64>,
    total: Option<f64>,
}

/// A decisive model settlement, input to the transparency views.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledPick {
    pub prediction_type: PredictionType,
    pub confidence: f64,
    pub correct: bool,
    pub settled_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SettledRow {
    prediction_type: String,
    confidence: f64,
    result: String,
    settled_at: i64,
}

/// A pending model pick on a game that has not started yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UpcomingPick {
    pub prediction: Prediction,
    pub game: Game,
}

impl Store {
    /// Insert a prediction. A second model pick for the same game and type is
    /// ignored and yields `None`.
    pub async fn insert_prediction(
        &self,
        prediction: &NewPrediction,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        if !prediction.prediction_type.accepts(prediction.pick) {
            return Err(EngineError::Integrity(format!(
                "{} is not a valid side for a {} prediction",
                prediction.pick, prediction.prediction_type
            )));
        }

        let result = sqlx::query(
            "INSERT INTO predictions (game_id, user_id, prediction_type, predicted_side, confidence, \
             result, created_at) VALUES (?, ?, ?, ?, ?, 'pending', ?) ON CONFLICT DO NOTHING",
        )
        .bind(prediction.game_id)
        .bind(prediction.user_id)
        .bind(prediction.prediction_type.as_str())
        .bind(prediction.pick.as_str())
        .bind(prediction.confidence.clamp(0.0, 1.0))
        .bind(to_unix(now))
        .execute(self.pool())
        .await?;

        Ok((result.rows_affected() == 1).then(|| result.last_insert_rowid()))
    }

    pub async fn prediction(&self, id: i64) -> Result<Option<Prediction>> {
        let row: Option<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions p WHERE p.id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(Prediction::try_from).transpose()
    }

    pub async fn predictions_for_game(&self, game_id: i64) -> Result<Vec<Prediction>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions p WHERE p.game_id = ? ORDER BY p.id"
        ))
        .bind(game_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Prediction::try_from).collect()
    }

    /// Pending predictions on final games with both scores present.
    pub async fn settlement_candidates(&self) -> Result<Vec<SettlementCandidate>> {
        let rows: Vec<CandidateRow> = sqlx::query_as(&format!(
            "SELECT {PREDICTION_COLUMNS}, g.home_score AS home_score, g.away_score AS away_score, \
             g.spread AS spread, g.total AS total \
             FROM predictions p JOIN games g ON g.id = p.game_id \
             WHERE p.result = 'pending' AND g.status = ? \
               AND g.home_score IS NOT NULL AND g.away_score IS NOT NULL \
             ORDER BY p.id"
        ))
        .bind(GameStatus::Final.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SettlementCandidate {
                    prediction: row.prediction.try_into()?,
                    home_score: row.home_score,
                    away_score: row.away_score,
                    spread: row.spread,
                    total: row.total,
                })
            })
            .collect()
    }

    /// Write-once settlement. Returns `false` when the prediction was no
    /// longer pending, in which case nothing is written.
    pub async fn settle_prediction(
        &self,
        id: i64,
        result: PredictionResult,
        actual_side: Option<Pick>,
        margin: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !result.is_settled() {
            return Err(EngineError::Integrity(format!(
                "prediction {id} cannot be settled as pending"
            )));
        }

        let outcome = sqlx::query(
            "UPDATE predictions SET result = ?, actual_side = ?, margin = ?, settled_at = ? \
             WHERE id = ? AND result = 'pending'",
        )
        .bind(result.as_str())
        .bind(actual_side.map(|s| s.as_str()))
        .bind(margin)
        .bind(to_unix(now))
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    /// Decisive (correct or incorrect) model settlements, optionally since a cutoff.
    pub async fn settled_model_picks(&self, since: Option<DateTime<Utc>>) -> Result<Vec<SettledPick>> {
        let rows: Vec<SettledRow> = sqlx::query_as(
            "SELECT prediction_type, confidence, result, settled_at FROM predictions \
             WHERE user_id IS NULL AND result IN ('correct', 'incorrect') \
               AND settled_at IS NOT NULL AND settled_at >= ? \
             ORDER BY settled_at",
        )
        .bind(since.map(to_unix).unwrap_or(i64::MIN))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SettledPick {
                    prediction_type: row.prediction_type.parse()?,
                    confidence: row.confidence,
                    correct: row.result.parse::<PredictionResult>()? == PredictionResult::Correct,
                    settled_at: from_unix(row.settled_at)?,
                })
            })
            .collect()
    }

    /// A user's decisive settlements since `since`, as (total, correct).
    pub async fn user_record_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<(i64, i64)> {
        let record: (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(CASE WHEN result = 'correct' THEN 1 ELSE 0 END) FROM predictions \
             WHERE user_id = ? AND result IN ('correct', 'incorrect') AND settled_at >= ?",
        )
        .bind(user_id)
        .bind(to_unix(since))
        .fetch_one(self.pool())
        .await?;
        Ok((record.0, record.1.unwrap_or(0)))
    }

    /// Pending model picks at or above `floor` on scheduled games starting in
    /// `(from, until]`, highest confidence first.
    pub async fn upcoming_model_picks(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        floor: f64,
    ) -> Result<Vec<UpcomingPick>> {
        let ids: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT p.id, p.game_id FROM predictions p JOIN games g ON g.id = p.game_id \
             WHERE p.user_id IS NULL AND p.result = 'pending' AND p.confidence >= ? \
               AND g.status = ? AND g.scheduled_at > ? AND g.scheduled_at <= ? \
             ORDER BY p.confidence DESC, p.id",
        )
        .bind(floor)
        .bind(GameStatus::Scheduled.as_str())
        .bind(to_unix(from))
        .bind(to_unix(until))
        .fetch_all(self.pool())
        .await?;

        let mut picks = Vec::with_capacity(ids.len());
        for (prediction_id, game_id) in ids {
            let (Some(prediction), Some(game)) =
                (self.prediction(prediction_id).await?, self.game(game_id).await?)
            else {
                continue;
            };
            picks.push(UpcomingPick { prediction, game });
        }
        Ok(picks)
    }
}
