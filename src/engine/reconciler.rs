//! Results reconciler.
//!
//! Settles every pending prediction whose game is final, exactly once, then
//! rebuilds the accuracy aggregates from the settled set. Aggregates are
//! recomputed on every run, so a crash between settling and recomputing is
//! repaired by the next run.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::engine::settlement::{settle, FinalScore, Unsettleable};
use crate::error::Result;
use crate::storage::Store;
use crate::types::PredictionResult;

/// Counts from one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub updated: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub pushes: usize,
    /// Left pending (no total line) or rejected (pick/type mismatch).
    pub skipped: usize,
    /// Store write errors on individual predictions.
    pub failed: usize,
    pub aggregate_rows: usize,
}

pub struct ResultsReconciler {
    store: Store,
}

impl ResultsReconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// One reconciliation pass. Failing to load the pending set aborts the
    /// run; a failure on one prediction is counted and the batch continues.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let candidates = self.store.settlement_candidates().await?;
        let now = Utc::now();
        let mut summary = ReconcileSummary::default();

        for candidate in &candidates {
            let prediction = &candidate.prediction;
            let score = FinalScore {
                home: candidate.home_score,
                away: candidate.away_score,
                spread: candidate.spread,
                total: candidate.total,
            };

            let outcome = match settle(prediction.prediction_type, prediction.pick, &score) {
                Ok(outcome) => outcome,
                Err(reason @ Unsettleable::MissingTotalLine) => {
                    warn!(prediction_id = prediction.id, game_id = prediction.game_id, %reason, "Prediction left pending");
                    summary.skipped += 1;
                    continue;
                }
                Err(reason @ Unsettleable::SideMismatch) => {
                    error!(
                        prediction_id = prediction.id,
                        prediction_type = %prediction.prediction_type,
                        pick = %prediction.pick,
                        %reason,
                        "Unsettleable prediction"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            match self
                .store
                .settle_prediction(prediction.id, outcome.result, outcome.actual_side, Some(outcome.margin), now)
                .await
            {
                Ok(true) => {
                    summary.updated += 1;
                    match outcome.result {
                        PredictionResult::Correct => summary.correct += 1,
                        PredictionResult::Incorrect => summary.incorrect += 1,
                        PredictionResult::Push => summary.pushes += 1,
                        PredictionResult::Pending => {}
                    }
                }
                Ok(false) => {
                    error!(prediction_id = prediction.id, "Double settlement refused, prediction already settled");
                }
                Err(e) => {
                    warn!(prediction_id = prediction.id, error = %e, "Failed to write settlement");
                    summary.failed += 1;
                }
            }
        }

        summary.aggregate_rows = self.store.recompute_aggregates(now).await?;

        info!(
            candidates = candidates.len(),
            updated = summary.updated,
            correct = summary.correct,
            incorrect = summary.incorrect,
            pushes = summary.pushes,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reconciliation complete"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
