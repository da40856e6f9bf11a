//! Ops API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::engine::scheduler::{JobScheduler, TaskReport, TaskStatus};
use crate::engine::sync::CacheStats;
use crate::engine::transparency::{TransparencyStats, TrustRecommendation};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::types::{AccuracyStat, Game, StatScope};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub engine: Arc<Engine>,
    pub scheduler: Arc<JobScheduler>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(engine: Arc<Engine>, scheduler: Arc<JobScheduler>) -> Self {
        Self {
            engine,
            scheduler,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Maps engine errors onto HTTP statuses with a `{"error": ...}` body.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::UnknownTask(_) => StatusCode::NOT_FOUND,
            EngineError::TaskBusy(_) => StatusCode::CONFLICT,
            EngineError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Ops request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: bool,
    pub uptime_secs: i64,
    pub cache: CacheStats,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.engine.store().ping().await.is_ok();
    let status = if store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if store { "ok" } else { "degraded" },
            store,
            uptime_secs: (Utc::now() - state.started_at).num_seconds(),
            cache: state.engine.resolver().cache().stats(),
        }),
    )
}

/// GET /api/weeks/:season/:week
pub async fn get_week(
    State(state): State<AppState>,
    Path((season, week)): Path<(i32, i32)>,
) -> Json<Vec<Game>> {
    Json(state.engine.resolve_week(season, week).await)
}

/// GET /api/transparency
pub async fn get_transparency(State(state): State<AppState>) -> ApiResult<TransparencyStats> {
    Ok(Json(state.engine.transparency_stats().await?))
}

/// GET /api/transparency/trust
pub async fn get_trust(State(state): State<AppState>) -> ApiResult<Vec<TrustRecommendation>> {
    Ok(Json(state.engine.trust_recommendations().await?))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub scope: Option<StatScope>,
}

/// GET /api/stats/accuracy?scope=user
pub async fn get_accuracy(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Vec<AccuracyStat>> {
    Ok(Json(state.engine.accuracy_stats(query.scope).await?))
}

/// GET /api/stats/accuracy/:scope/:scope_id
pub async fn get_accuracy_for(
    State(state): State<AppState>,
    Path((scope, scope_id)): Path<(StatScope, String)>,
) -> Result<Response, ApiError> {
    Ok(match state.engine.accuracy_stat(scope, &scope_id).await? {
        Some(stat) => Json(stat).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no {scope} stats for {scope_id}") })),
        )
            .into_response(),
    })
}

/// GET /api/jobs
pub async fn get_jobs(State(state): State<AppState>) -> Json<Vec<TaskStatus>> {
    Json(state.scheduler.statuses())
}

/// POST /api/jobs/:name/run
pub async fn run_job(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<TaskReport> {
    Ok(Json(state.scheduler.run_now(&name).await?))
}

/// POST /api/cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "cleared": state.engine.clear_cache() }))
}

/// POST /api/notifications/:id/retry
pub async fn retry_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let requeued = state.engine.retry_failed(id).await?;
    let status = if requeued {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(json!({ "id": id, "requeued": requeued }))))
}

/// POST /api/notifications/retry-failed
pub async fn retry_all_notifications(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let requeued = state.engine.retry_all_failed().await?;
    Ok(Json(json!({ "requeued": requeued })))
}
