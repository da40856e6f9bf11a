//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so an empty file (or a missing section) is valid.
//! Secrets (mail and push keys) are referenced by env-var name in the config
//! and resolved at startup into `SecretString`s.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub notifications: NotificationConfig,
    pub channels: ChannelsConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://pickline.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the enrichment (prediction model) service.
    pub enrichment_url: String,
    /// Base URL of the public scoreboard API.
    pub sports_api_url: String,
    pub cache_ttl_secs: u64,
    /// Budget for each upstream call made while answering `resolve_week`.
    pub interactive_timeout_ms: u64,
    /// Budget for each per-game prediction call during backfill.
    pub backfill_timeout_secs: u64,
    pub backfill_concurrency: usize,
    /// Used when the sports API cannot report the live week.
    pub default_season: i32,
    pub default_week: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enrichment_url: "http://localhost:5000".to_string(),
            sports_api_url: crate::data::espn::DEFAULT_BASE_URL.to_string(),
            cache_ttl_secs: 300,
            interactive_timeout_ms: 5_000,
            backfill_timeout_secs: 30,
            backfill_concurrency: 4,
            default_season: 2025,
            default_week: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub dedup_window_hours: i64,
    pub retention_days: i64,
    /// Max entries per dispatch pass.
    pub batch_size: i64,
    pub dispatch_concurrency: usize,
    pub high_confidence_floor: f64,
    pub high_confidence_lookahead_hours: i64,
    pub high_confidence_tiers: Vec<String>,
    pub event_start_lead_minutes: i64,
    pub digest_upcoming_games: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dedup_window_hours: 24,
            retention_days: 30,
            batch_size: 100,
            dispatch_concurrency: 8,
            high_confidence_floor: 0.65,
            high_confidence_lookahead_hours: 48,
            high_confidence_tiers: vec!["premium".to_string(), "pro".to_string()],
            event_start_lead_minutes: 60,
            digest_upcoming_games: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Log instead of sending, regardless of credentials.
    pub dry_run: bool,
    pub timeout_secs: u64,
    pub email_endpoint: String,
    pub email_from: String,
    pub email_api_key_env: String,
    pub push_endpoint: String,
    /// Optional; Expo accepts unauthenticated sends unless enhanced security is on.
    pub push_access_token_env: Option<String>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            timeout_secs: 10,
            email_endpoint: crate::channels::email::DEFAULT_ENDPOINT.to_string(),
            email_from: "Pickline <picks@pickline.app>".to_string(),
            email_api_key_env: "RESEND_API_KEY".to_string(),
            push_endpoint: crate::channels::push::DEFAULT_ENDPOINT.to_string(),
            push_access_token_env: Some("EXPO_ACCESS_TOKEN".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret by env-var name. Unset or empty yields `None`.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        Self::resolve_env(env_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}
