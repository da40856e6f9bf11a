//! Data sync tier.
//!
//! `resolve_week` answers "which games are in this week" from the cheapest
//! source that has them: an in-process TTL cache, then the store, then the
//! enrichment service (which refreshes the store), then the public sports
//! API (whose games we upsert ourselves). Every tier failure is logged and
//! falls through; an empty result is never cached, and the caller never
//! sees an error.
//!
//! The data-sync job uses `sync_week`, which forces a refresh through both
//! upstreams and then backfills model predictions for scheduled games.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::data::{EnrichmentService, EventPrediction, SportsApi, WeekRef};
use crate::error::{EngineError, Result};
use crate::storage::Store;
use crate::types::{Game, GameStatus, NewPrediction, Pick, PredictionType};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    games: Vec<Game>,
    inserted_at: Instant,
}

/// In-memory TTL cache of resolved weeks. Holds only non-empty results.
pub struct WeekCache {
    entries: Mutex<HashMap<WeekRef, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache counters for the ops surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl WeekCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // The map holds plain data, so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<WeekRef, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &WeekRef) -> Option<Vec<Game>> {
        let entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.games.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: WeekRef, games: Vec<Game>) {
        if games.is_empty() {
            return;
        }
        self.lock().insert(
            key,
            CacheEntry {
                games,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &WeekRef) {
        self.lock().remove(key);
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of pushing one upstream week into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertStats {
    pub fetched: usize,
    pub applied: usize,
    /// Regressive status updates refused by the store.
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub requested: usize,
    pub inserted: usize,
    /// Games the enrichment service had no prediction for.
    pub missing: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub week: WeekRef,
    pub enrichment_refreshed: bool,
    pub upstream: Option<UpsertStats>,
    pub games: usize,
    pub backfill: BackfillReport,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

const ENRICHMENT: &str = "enrichment";
const SPORTS_API: &str = "sports-api";

/// Bound an upstream call by `budget`; expiry becomes an upstream failure.
async fn bounded<T>(
    service: &'static str,
    budget: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(budget, call)
        .await
        .map_err(|_| EngineError::upstream(service, format!("timed out after {budget:?}")))?
}

pub struct WeekResolver {
    store: Store,
    enrichment: Arc<dyn EnrichmentService>,
    sports: Arc<dyn SportsApi>,
    cache: WeekCache,
    config: SyncConfig,
}

impl WeekResolver {
    pub fn new(
        store: Store,
        enrichment: Arc<dyn EnrichmentService>,
        sports: Arc<dyn SportsApi>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            enrichment,
            sports,
            cache: WeekCache::new(Duration::from_secs(config.cache_ttl_secs)),
            config,
        }
    }

    pub fn cache(&self) -> &WeekCache {
        &self.cache
    }

    fn interactive_timeout(&self) -> Duration {
        Duration::from_millis(self.config.interactive_timeout_ms)
    }

    fn backfill_timeout(&self) -> Duration {
        Duration::from_secs(self.config.backfill_timeout_secs)
    }

    /// Games for a week via layered fallback. Never errors; an empty list
    /// means every tier came up empty or failed.
    pub async fn resolve_week(&self, season: i32, week: i32) -> Vec<Game> {
        let key = WeekRef { season, week };

        if let Some(games) = self.cache.get(&key) {
            debug!(season, week, games = games.len(), "Week served from cache");
            return games;
        }

        if let Some(games) = self.load_from_store(key).await {
            return games;
        }

        match bounded(
            ENRICHMENT,
            self.interactive_timeout(),
            self.enrichment.refresh_week(season, week),
        )
        .await
        {
            Ok(()) => {
                if let Some(games) = self.load_from_store(key).await {
                    info!(season, week, games = games.len(), "Week resolved after enrichment refresh");
                    return games;
                }
                debug!(season, week, "Enrichment refresh left the week empty");
            }
            Err(e) => warn!(season, week, error = %e, "Enrichment tier failed"),
        }

        match self.fetch_and_store(key, self.interactive_timeout()).await {
            Ok(stats) => {
                if let Some(games) = self.load_from_store(key).await {
                    info!(
                        season,
                        week,
                        games = games.len(),
                        applied = stats.applied,
                        "Week resolved from sports API"
                    );
                    return games;
                }
            }
            Err(e) => warn!(season, week, error = %e, "Sports API tier failed"),
        }

        warn!(season, week, "All sync tiers exhausted, returning no games");
        Vec::new()
    }

    /// Store lookup that caches and returns only non-empty weeks.
    async fn load_from_store(&self, key: WeekRef) -> Option<Vec<Game>> {
        match self.store.games_for_week(key.season, key.week).await {
            Ok(games) if !games.is_empty() => {
                self.cache.insert(key, games.clone());
                Some(games)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(season = key.season, week = key.week, error = %e, "Store lookup failed");
                None
            }
        }
    }

    /// Fetch a week from the sports API and upsert every game. Regressions
    /// are logged and counted; any other store error aborts.
    async fn fetch_and_store(&self, key: WeekRef, budget: Duration) -> Result<UpsertStats> {
        let updates = bounded(SPORTS_API, budget, self.sports.games_for_week(key.season, key.week)).await?;
        let now = Utc::now();

        let mut stats = UpsertStats {
            fetched: updates.len(),
            ..UpsertStats::default()
        };
        for update in &updates {
            match self.store.upsert_game(update, now).await {
                Ok(()) => stats.applied += 1,
                Err(EngineError::Integrity(reason)) => {
                    error!(external_id = %update.external_id, reason = %reason, "Game update rejected");
                    stats.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stats)
    }

    /// The week in play according to the sports API, or the configured default.
    pub async fn current_week(&self) -> WeekRef {
        match bounded(SPORTS_API, self.interactive_timeout(), self.sports.current_week()).await {
            Ok(week) => week,
            Err(e) => {
                let fallback = WeekRef {
                    season: self.config.default_season,
                    week: self.config.default_week,
                };
                warn!(error = %e, season = fallback.season, week = fallback.week, "Using configured default week");
                fallback
            }
        }
    }

    /// Forced refresh of one week through both upstreams, then model-pick
    /// backfill. Upstream failures are tolerated; store failures abort.
    pub async fn sync_week(&self, season: i32, week: i32) -> Result<SyncReport> {
        let key = WeekRef { season, week };

        let enrichment_refreshed = match bounded(
            ENRICHMENT,
            self.backfill_timeout(),
            self.enrichment.refresh_week(season, week),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(season, week, error = %e, "Enrichment refresh failed during sync");
                false
            }
        };

        let upstream = match self.fetch_and_store(key, self.backfill_timeout()).await {
            Ok(stats) => Some(stats),
            Err(e) if e.is_transient() => {
                warn!(season, week, error = %e, "Sports API fetch failed during sync");
                None
            }
            Err(e) => return Err(e),
        };

        self.cache.invalidate(&key);
        let games = self.resolve_week(season, week).await;
        let backfill = self.backfill_predictions(&games).await?;

        let report = SyncReport {
            week: key,
            enrichment_refreshed,
            upstream,
            games: games.len(),
            backfill,
        };
        info!(
            season,
            week,
            games = report.games,
            predictions_added = backfill.inserted,
            backfill_failed = backfill.failed,
            "Week synced"
        );
        Ok(report)
    }

    /// Fetch model predictions for scheduled games that lack a full set of
    /// model picks and store them. Upstream calls run with bounded fan-out;
    /// a failing game never stops the others.
    pub async fn backfill_predictions(&self, games: &[Game]) -> Result<BackfillReport> {
        let mut targets = Vec::new();
        for game in games.iter().filter(|g| g.status == GameStatus::Scheduled) {
            let existing = self.store.predictions_for_game(game.id).await?;
            let model_types = existing.iter().filter(|p| p.user_id.is_none()).count();
            if model_types < MODEL_PICK_TYPES.len() {
                targets.push(game);
            }
        }

        let mut report = BackfillReport {
            requested: targets.len(),
            ..BackfillReport::default()
        };
        if targets.is_empty() {
            return Ok(report);
        }

        let budget = self.backfill_timeout();
        let enrichment = &self.enrichment;
        let futures: Vec<_> = targets
            .into_iter()
            .map(|game| async move {
                let outcome = bounded(ENRICHMENT, budget, enrichment.predict_event(game)).await;
                (game, outcome)
            })
            .collect();
        let results: Vec<(&Game, Result<Option<EventPrediction>>)> = stream::iter(futures)
            .buffer_unordered(self.config.backfill_concurrency.max(1))
            .collect()
            .await;

        let now = Utc::now();
        for (game, outcome) in results {
            match outcome {
                Ok(Some(prediction)) => {
                    for pick in model_picks(&prediction, game) {
                        if self.store.insert_prediction(&pick, now).await?.is_some() {
                            report.inserted += 1;
                        }
                    }
                }
                Ok(None) => report.missing += 1,
                Err(e) => {
                    warn!(game_id = game.id, error = %e, "Prediction backfill failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Model picks
// ---------------------------------------------------------------------------

const MODEL_PICK_TYPES: [PredictionType; 3] = [
    PredictionType::Ensemble,
    PredictionType::Spread,
    PredictionType::Total,
];

/// ESPN abbreviations keyed by nickname, for predictions that name a team
/// by abbreviation while the store holds display names.
const NFL_ABBREVIATIONS: [(&str, &str); 32] = [
    ("cardinals", "ari"),
    ("falcons", "atl"),
    ("ravens", "bal"),
    ("bills", "buf"),
    ("panthers", "car"),
    ("bears", "chi"),
    ("bengals", "cin"),
    ("browns", "cle"),
    ("cowboys", "dal"),
    ("broncos", "den"),
    ("lions", "det"),
    ("packers", "gb"),
    ("texans", "hou"),
    ("colts", "ind"),
    ("jaguars", "jax"),
    ("chiefs", "kc"),
    ("raiders", "lv"),
    ("chargers", "lac"),
    ("rams", "lar"),
    ("dolphins", "mia"),
    ("vikings", "min"),
    ("patriots", "ne"),
    ("saints", "no"),
    ("giants", "nyg"),
    ("jets", "nyj"),
    ("eagles", "phi"),
    ("steelers", "pit"),
    ("49ers", "sf"),
    ("seahawks", "sea"),
    ("buccaneers", "tb"),
    ("titans", "ten"),
    ("commanders", "wsh"),
];

/// Lowercased names a team answers to: the full name, the nickname, the
/// known abbreviation and the city initials ("New England Patriots" gives
/// "ne"). Single letters are never aliases.
fn team_aliases(team: &str) -> Vec<String> {
    let full = team.trim().to_lowercase();
    let words: Vec<&str> = full.split_whitespace().collect();
    let mut aliases = vec![full.clone()];

    if let Some((nickname, city)) = words.split_last() {
        if !city.is_empty() {
            aliases.push(nickname.to_string());
            let initials: String = city.iter().filter_map(|w| w.chars().next()).collect();
            if initials.chars().count() > 1 {
                aliases.push(initials);
            }
        }
        if let Some((_, abbr)) = NFL_ABBREVIATIONS.iter().find(|(n, _)| n == nickname) {
            aliases.push(abbr.to_string());
        }
    }
    aliases.retain(|a| a.chars().count() > 1);
    aliases
}

fn team_matches(name: &str, team: &str) -> bool {
    let name = name.trim().to_lowercase();
    !name.is_empty() && team_aliases(team).contains(&name)
}

/// Side named by `name`, or `None` when it matches neither team or both.
fn named_side(name: &str, game: &Game) -> Option<Pick> {
    match (team_matches(name, &game.home_team), team_matches(name, &game.away_team)) {
        (true, false) => Some(Pick::Home),
        (false, true) => Some(Pick::Away),
        _ => None,
    }
}

/// Derive the model's ensemble, spread and total picks for a game. A pick is
/// omitted when the prediction or the game's line leaves it undetermined.
pub fn model_picks(prediction: &EventPrediction, game: &Game) -> Vec<NewPrediction> {
    let confidence = prediction.confidence.clamp(0.0, 1.0);
    let pick = |prediction_type, pick| NewPrediction {
        game_id: game.id,
        user_id: None,
        prediction_type,
        pick,
        confidence,
    };

    let mut picks = Vec::with_capacity(3);

    if let Some(side) = named_side(&prediction.predicted_winner, game) {
        picks.push(pick(PredictionType::Ensemble, side));
    }

    // Home covers when predicted margin plus the line is positive.
    if let (Some(margin), Some(line)) = (prediction.spread_prediction, game.spread) {
        let edge = margin + line;
        if edge > 0.0 {
            picks.push(pick(PredictionType::Spread, Pick::Home));
        } else if edge < 0.0 {
            picks.push(pick(PredictionType::Spread, Pick::Away));
        }
    }

    if let (Some(predicted), Some(line)) = (prediction.over_under_prediction, game.total) {
        if predicted > line {
            picks.push(pick(PredictionType::Total, Pick::Over));
        } else if predicted < line {
            picks.push(pick(PredictionType::Total, Pick::Under));
        }
    }

    picks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
