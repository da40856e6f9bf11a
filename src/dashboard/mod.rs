//! Ops dashboard: Axum server exposing health, week lookups, transparency
//! views and operator actions (run a job, clear the cache, retry
//! notifications). CORS enabled for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use routes::AppState;

/// Bind the listener and serve in a background task. Bind errors are
/// returned; serve errors are logged.
pub async fn spawn_dashboard(state: AppState, bind: &str, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind dashboard on {addr}"))?;
    info!(addr = %addr, "Dashboard server listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/weeks/:season/:week", get(routes::get_week))
        .route("/api/transparency", get(routes::get_transparency))
        .route("/api/transparency/trust", get(routes::get_trust))
        .route("/api/stats/accuracy", get(routes::get_accuracy))
        .route("/api/stats/accuracy/:scope/:scope_id", get(routes::get_accuracy_for))
        .route("/api/jobs", get(routes::get_jobs))
        .route("/api/jobs/:name/run", post(routes::run_job))
        .route("/api/cache/clear", post(routes::clear_cache))
        .route("/api/notifications/retry-failed", post(routes::retry_all_notifications))
        .route("/api/notifications/:id/retry", post(routes::retry_notification))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
