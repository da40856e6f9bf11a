//! In-memory upstreams for integration testing.
//!
//! Deterministic `SportsApi`, `EnrichmentService` and `ChannelAdapter`
//! implementations. State is fully controllable from test code and nothing
//! touches the network.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use pickline::channels::ChannelAdapter;
use pickline::data::{EnrichmentService, EventPrediction, SportsApi, WeekRef};
use pickline::error::{EngineError, Result};
use pickline::types::{Channel, Game, GameStatus, GameUpdate, NotificationPayload, Recipient};

/// A scheduled game `days` from now with a KC -3 line and a 47.5 total.
pub fn scheduled_game(external_id: &str, season: i32, week: i32, days: i64) -> GameUpdate {
    GameUpdate {
        external_id: external_id.to_string(),
        season,
        week,
        scheduled_at: Utc::now() + Duration::days(days),
        status: GameStatus::Scheduled,
        home_team: "KC".to_string(),
        away_team: "BUF".to_string(),
        home_score: None,
        away_score: None,
        spread: Some(-3.0),
        total: Some(47.5),
        venue: Some("Arrowhead Stadium".to_string()),
        weather: None,
    }
}

/// The same game played out to a final score.
pub fn final_game(external_id: &str, home: i32, away: i32, at: DateTime<Utc>) -> GameUpdate {
    GameUpdate {
        scheduled_at: at,
        status: GameStatus::Final,
        home_score: Some(home),
        away_score: Some(away),
        ..scheduled_game(external_id, 2025, 5, 0)
    }
}

// ---------------------------------------------------------------------------
// Sports API
// ---------------------------------------------------------------------------

/// Serves fixed weeks. Each call can be slowed down to widen race windows.
pub struct FakeSportsApi {
    weeks: HashMap<(i32, i32), Vec<GameUpdate>>,
    current: WeekRef,
    latency: std::time::Duration,
    calls: AtomicUsize,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
}

impl FakeSportsApi {
    pub fn new(current: WeekRef) -> Self {
        Self {
            weeks: HashMap::new(),
            current,
            latency: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            force_error: Mutex::new(None),
        }
    }

    pub fn with_week(mut self, season: i32, week: i32, games: Vec<GameUpdate>) -> Self {
        self.weeks.insert((season, week), games);
        self
    }

    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(EngineError::upstream("sports-api", msg)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SportsApi for FakeSportsApi {
    async fn games_for_week(&self, season: i32, week: i32) -> Result<Vec<GameUpdate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_error()?;
        Ok(self.weeks.get(&(season, week)).cloned().unwrap_or_default())
    }

    async fn current_week(&self) -> Result<WeekRef> {
        self.check_error()?;
        Ok(self.current)
    }
}

// ---------------------------------------------------------------------------
// Enrichment service
// ---------------------------------------------------------------------------

/// Refreshes are no-ops; predictions are keyed by external game id.
#[derive(Default)]
pub struct FakeEnrichment {
    predictions: Mutex<HashMap<String, EventPrediction>>,
    refreshes: AtomicUsize,
    unavailable: Mutex<bool>,
}

impl FakeEnrichment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_prediction(&self, external_id: &str, prediction: EventPrediction) {
        self.predictions
            .lock()
            .unwrap()
            .insert(external_id.to_string(), prediction);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentService for FakeEnrichment {
    async fn refresh_week(&self, _season: i32, _week: i32) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if *self.unavailable.lock().unwrap() {
            return Err(EngineError::upstream("enrichment", "connection refused"));
        }
        Ok(())
    }

    async fn predict_event(&self, game: &Game) -> Result<Option<EventPrediction>> {
        if *self.unavailable.lock().unwrap() {
            return Err(EngineError::upstream("enrichment", "connection refused"));
        }
        Ok(self.predictions.lock().unwrap().get(&game.external_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Records every delivery. Recipients in the failing set get a `Delivery` error.
pub struct RecordingChannel {
    channel: Channel,
    sent: Mutex<Vec<(i64, NotificationPayload)>>,
    failing: Mutex<HashSet<i64>>,
}

impl RecordingChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, user_id: i64) {
        self.failing.lock().unwrap().insert(user_id);
    }

    pub fn recover(&self, user_id: i64) {
        self.failing.lock().unwrap().remove(&user_id);
    }

    pub fn delivered_to(&self) -> Vec<i64> {
        self.sent.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn payloads(&self) -> Vec<NotificationPayload> {
        self.sent.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingChannel {
    fn name(&self) -> &str {
        self.channel.as_str()
    }

    async fn send(&self, recipient: &Recipient, payload: &NotificationPayload) -> Result<()> {
        if self.failing.lock().unwrap().contains(&recipient.user_id) {
            return Err(EngineError::delivery(self.channel, "mailbox unavailable"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.user_id, payload.clone()));
        Ok(())
    }
}
