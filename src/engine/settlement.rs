//! Settlement rules.
//!
//! Pure functions from (prediction, final score, lines) to an outcome. A
//! game that lands level (exact tie, or exactly on the spread or total
//! line) settles as `Push`, which is final but counts as neither correct
//! nor incorrect.

use serde::Serialize;
use std::fmt;

use crate::types::{Pick, PredictionResult, PredictionType};

/// The settled state to write for one prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Outcome {
    pub result: PredictionResult,
    /// Winning or covering side. `None` on a push.
    pub actual_side: Option<Pick>,
    /// Distance from the deciding threshold, in points.
    pub margin: f64,
}

/// Why a prediction cannot be settled yet, or ever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsettleable {
    /// Total prediction on a game with no total line. Stays pending.
    MissingTotalLine,
    /// The pick is not a side of this prediction type (e.g. `over` on a winner pick).
    SideMismatch,
}

impl fmt::Display for Unsettleable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsettleable::MissingTotalLine => write!(f, "no total line"),
            Unsettleable::SideMismatch => write!(f, "pick does not match prediction type"),
        }
    }
}

/// Final score and lines of a game.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalScore {
    pub home: i32,
    pub away: i32,
    /// Points added to the home score.
    pub spread: Option<f64>,
    pub total: Option<f64>,
}

fn decide(pick: Pick, decided: Option<Pick>, margin: f64) -> Outcome {
    match decided {
        Some(side) => Outcome {
            result: if pick == side {
                PredictionResult::Correct
            } else {
                PredictionResult::Incorrect
            },
            actual_side: Some(side),
            margin,
        },
        None => Outcome {
            result: PredictionResult::Push,
            actual_side: None,
            margin: 0.0,
        },
    }
}

fn side_of(diff: f64, positive: Pick, negative: Pick) -> Option<Pick> {
    if diff > 0.0 {
        Some(positive)
    } else if diff < 0.0 {
        Some(negative)
    } else {
        None
    }
}

fn winner_outcome(pick: Pick, score: &FinalScore) -> Outcome {
    let diff = f64::from(score.home - score.away);
    decide(pick, side_of(diff, Pick::Home, Pick::Away), diff.abs())
}

/// Settle one prediction against a final score.
pub fn settle(
    prediction_type: PredictionType,
    pick: Pick,
    score: &FinalScore,
) -> Result<Outcome, Unsettleable> {
    if !prediction_type.accepts(pick) {
        return Err(Unsettleable::SideMismatch);
    }

    match prediction_type {
        PredictionType::Winner | PredictionType::Ensemble => Ok(winner_outcome(pick, score)),
        PredictionType::Spread => match score.spread {
            Some(line) => {
                let diff = f64::from(score.home) + line - f64::from(score.away);
                Ok(decide(pick, side_of(diff, Pick::Home, Pick::Away), diff.abs()))
            }
            // No line was ever published: the straight winner decides.
            None => Ok(winner_outcome(pick, score)),
        },
        PredictionType::Total => {
            let line = score.total.ok_or(Unsettleable::MissingTotalLine)?;
            let diff = f64::from(score.home + score.away) - line;
            Ok(decide(pick, side_of(diff, Pick::Over, Pick::Under), diff.abs()))
        }
    }
}
