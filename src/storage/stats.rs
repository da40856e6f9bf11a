use chrono::{DateTime, Utc};
use tracing::debug;

use super::{from_unix, to_unix, Store};
use crate::error::{EngineError, Result};
use crate::types::{AccuracyStat, StatScope};

const DECISIVE: &str = "result IN ('correct', 'incorrect')";
const CORRECT_COUNT: &str = "SUM(CASE WHEN result = 'correct' THEN 1 ELSE 0 END)";

#[derive(sqlx::FromRow)]
struct StatRow {
    scope: String,
    scope_id: String,
    total: i64,
    correct: i64,
    rate: f64,
    avg_confidence: f64,
    updated_at: i64,
}

impl TryFrom<StatRow> for AccuracyStat {
    type Error = EngineError;

    fn try_from(row: StatRow) -> Result<Self> {
        Ok(AccuracyStat {
            scope: row.scope.parse()?,
            scope_id: row.scope_id,
            total: row.total,
            correct: row.correct,
            rate: row.rate,
            avg_confidence: row.avg_confidence,
            updated_at: from_unix(row.updated_at)?,
        })
    }
}

impl Store {
    /// Rebuild every aggregate row from the settled predictions in one
    /// transaction. Pushes and pending rows never enter a denominator, and a
    /// scope with no decisive settlements has no row.
    pub async fn recompute_aggregates(&self, now: DateTime<Utc>) -> Result<usize> {
        let updated_at = to_unix(now);
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM aggregate_stats")
            .execute(&mut *tx)
            .await?;

        let per_user = format!(
            "INSERT INTO aggregate_stats (scope, scope_id, total, correct, rate, avg_confidence, updated_at) \
             SELECT 'user', CAST(user_id AS TEXT), COUNT(*), {CORRECT_COUNT}, \
                    CAST({CORRECT_COUNT} AS REAL) / COUNT(*), AVG(confidence), ? \
             FROM predictions WHERE user_id IS NOT NULL AND {DECISIVE} \
             GROUP BY user_id"
        );
        let per_model = format!(
            "INSERT INTO aggregate_stats (scope, scope_id, total, correct, rate, avg_confidence, updated_at) \
             SELECT 'model', prediction_type, COUNT(*), {CORRECT_COUNT}, \
                    CAST({CORRECT_COUNT} AS REAL) / COUNT(*), AVG(confidence), ? \
             FROM predictions WHERE user_id IS NULL AND {DECISIVE} \
             GROUP BY prediction_type"
        );
        let global = format!(
            "INSERT INTO aggregate_stats (scope, scope_id, total, correct, rate, avg_confidence, updated_at) \
             SELECT 'global', 'all', total, correct, CAST(correct AS REAL) / total, avg_confidence, ? \
             FROM (SELECT COUNT(*) AS total, {CORRECT_COUNT} AS correct, AVG(confidence) AS avg_confidence \
                   FROM predictions WHERE user_id IS NULL AND {DECISIVE}) \
             WHERE total > 0"
        );

        let mut rows = 0u64;
        for statement in [&per_user, &per_model, &global] {
            rows += sqlx::query(statement)
                .bind(updated_at)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!(rows, "Aggregates recomputed");
        Ok(rows as usize)
    }

    /// Aggregate rows, optionally restricted to one scope.
    pub async fn accuracy_stats(&self, scope: Option<StatScope>) -> Result<Vec<AccuracyStat>> {
        let rows: Vec<StatRow> = match scope {
            Some(scope) => {
                sqlx::query_as(
                    "SELECT * FROM aggregate_stats WHERE scope = ? ORDER BY scope_id",
                )
                .bind(scope.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM aggregate_stats ORDER BY scope, scope_id")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.into_iter().map(AccuracyStat::try_from).collect()
    }

    pub async fn accuracy_stat(&self, scope: StatScope, scope_id: &str) -> Result<Option<AccuracyStat>> {
        let row: Option<StatRow> =
            sqlx::query_as("SELECT * FROM aggregate_stats WHERE scope = ? AND scope_id = ?")
                .bind(scope.as_str())
                .bind(scope_id)
                .fetch_optional(self.pool())
                .await?;
        row.map(AccuracyStat::try_from).transpose()
    }
}
