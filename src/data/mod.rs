//! Upstream game-data sources.
//!
//! Two seams: the enrichment service (bulk week refresh plus per-game model
//! predictions) and the public sports API (scoreboard by week). Both are
//! traits so the sync tier can be driven by in-memory doubles in tests.

pub mod enrichment;
pub mod espn;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Game, GameUpdate};

/// Model output for one game, as returned by the enrichment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPrediction {
    /// Team name (or abbreviation) the model expects to win.
    pub predicted_winner: String,
    pub confidence: f64,
    /// Predicted home margin (home minus away).
    #[serde(default)]
    pub spread_prediction: Option<f64>,
    /// Predicted combined score.
    #[serde(default)]
    pub over_under_prediction: Option<f64>,
}

/// A season/week pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekRef {
    pub season: i32,
    pub week: i32,
}

/// The enrichment service: writes refreshed week data into the shared store
/// and serves per-game model predictions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    /// Ask the service to refresh a week's games (odds and weather included).
    async fn refresh_week(&self, season: i32, week: i32) -> Result<()>;

    /// Model prediction for a stored game. `Ok(None)` when the service has none.
    async fn predict_event(&self, game: &Game) -> Result<Option<EventPrediction>>;
}

/// A public sports API serving schedules and scores.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SportsApi: Send + Sync {
    async fn games_for_week(&self, season: i32, week: i32) -> Result<Vec<GameUpdate>>;

    /// The week currently in play.
    async fn current_week(&self) -> Result<WeekRef>;
}
