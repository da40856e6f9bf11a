//! HTTP client for the enrichment (ML) service.
//!
//! `POST {base}/api/data/update/all` refreshes a week's games into the shared
//! store; `GET {base}/api/predictions/game/{id}` returns the model's pick for
//! one stored game. Only this contract matters; the modelling is external.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{EnrichmentService, EventPrediction};
use crate::error::{EngineError, Result};
use crate::types::Game;

const SERVICE: &str = "enrichment";

#[derive(Debug, Serialize)]
struct RefreshRequest {
    season: i32,
    week: i32,
    include_weather: bool,
    include_odds: bool,
}

pub struct EnrichmentClient {
    http: Client,
    base_url: String,
}

impl EnrichmentClient {
    /// `timeout` is the client-wide ceiling; callers apply tighter per-call
    /// budgets around individual requests.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pickline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Config(format!("enrichment HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EnrichmentService for EnrichmentClient {
    async fn refresh_week(&self, season: i32, week: i32) -> Result<()> {
        let url = format!("{}/api/data/update/all", self.base_url);
        debug!(url = %url, season, week, "Requesting enrichment refresh");

        let resp = self
            .http
            .post(&url)
            .json(&RefreshRequest {
                season,
                week,
                include_weather: true,
                include_odds: true,
            })
            .send()
            .await
            .map_err(|e| EngineError::upstream(SERVICE, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::upstream(SERVICE, format!("refresh returned {status}: {body}")));
        }
        Ok(())
    }

    async fn predict_event(&self, game: &Game) -> Result<Option<EventPrediction>> {
        let url = format!("{}/api/predictions/game/{}", self.base_url, game.id);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::upstream(SERVICE, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::upstream(SERVICE, format!("prediction returned {status}: {body}")));
        }

        let prediction: EventPrediction = resp
            .json()
            .await
            .map_err(|e| EngineError::upstream(SERVICE, format!("bad prediction body: {e}")))?;
        Ok(Some(prediction))
    }
}
