//! pickline: game data sync, pick settlement and notification daemon.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! and migrates the store, wires upstream clients and delivery channels,
//! then runs the job scheduler and ops dashboard until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use pickline::channels::dry_run::DryRunChannel;
use pickline::channels::email::EmailChannel;
use pickline::channels::push::PushChannel;
use pickline::channels::{ChannelAdapter, ChannelSet};
use pickline::config::{self, AppConfig};
use pickline::dashboard;
use pickline::dashboard::routes::DashboardState;
use pickline::data::enrichment::EnrichmentClient;
use pickline::data::espn::EspnClient;
use pickline::engine::jobs::register_managed_tasks;
use pickline::engine::scheduler::JobScheduler;
use pickline::engine::Engine;
use pickline::storage::Store;
use pickline::types::Channel;

/// Client-wide HTTP ceiling for upstreams; tighter budgets apply per call.
const UPSTREAM_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("PICKLINE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = if std::path::Path::new(&config_path).exists() {
        AppConfig::load(&config_path)?
    } else {
        AppConfig::default()
    };

    init_logging();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path,
        store = %cfg.store.url,
        "pickline starting up"
    );

    // -- Store -------------------------------------------------------------

    let store = Store::connect(&cfg.store.url, cfg.store.max_connections)
        .await
        .context("Failed to open store")?;
    store.migrate().await.context("Failed to migrate store")?;

    // -- Upstreams and channels --------------------------------------------

    let enrichment = Arc::new(EnrichmentClient::new(&cfg.sync.enrichment_url, UPSTREAM_CLIENT_TIMEOUT)?);
    let sports = Arc::new(EspnClient::new(&cfg.sync.sports_api_url, UPSTREAM_CLIENT_TIMEOUT)?);
    let channels = build_channels(&cfg.channels)?;
    info!(
        email = channels.email.name(),
        push = channels.push.name(),
        "Delivery channels ready"
    );

    let engine = Arc::new(Engine::new(
        store.clone(),
        enrichment,
        sports,
        channels,
        cfg.sync.clone(),
        cfg.notifications.clone(),
    ));

    // -- Scheduler and dashboard -------------------------------------------

    let scheduler = Arc::new(JobScheduler::new());
    register_managed_tasks(&scheduler, engine.clone())?;
    scheduler.start();

    let dashboard = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(engine.clone(), scheduler.clone()));
        Some(dashboard::spawn_dashboard(state, &cfg.dashboard.bind, cfg.dashboard.port).await?)
    } else {
        None
    };

    info!("Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received.");

    scheduler.stop().await;
    if let Some(handle) = dashboard {
        handle.abort();
    }
    store.close().await;
    info!("pickline shut down cleanly.");

    Ok(())
}

/// Real adapters where configured, dry-run loggers otherwise.
fn build_channels(cfg: &config::ChannelsConfig) -> Result<ChannelSet> {
    if cfg.dry_run {
        warn!("Channels in dry-run mode, nothing will be delivered");
        return Ok(ChannelSet::dry_run());
    }
    let timeout = Duration::from_secs(cfg.timeout_secs);

    let email: Arc<dyn ChannelAdapter> = match AppConfig::resolve_secret(&cfg.email_api_key_env) {
        Some(key) => Arc::new(EmailChannel::new(&cfg.email_endpoint, key, &cfg.email_from, timeout)?),
        None => {
            warn!(env = %cfg.email_api_key_env, "No email API key, email will be logged only");
            Arc::new(DryRunChannel::new(Channel::Email))
        }
    };

    let push_token = cfg
        .push_access_token_env
        .as_deref()
        .and_then(AppConfig::resolve_secret);
    let push: Arc<dyn ChannelAdapter> = Arc::new(PushChannel::new(&cfg.push_endpoint, push_token, timeout)?);

    Ok(ChannelSet::new(email, push))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pickline=info"));

    let json_logging = std::env::var("PICKLINE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
