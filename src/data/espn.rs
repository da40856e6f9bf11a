//! ESPN public scoreboard client.
//!
//! API: `https://site.api.espn.com/apis/site/v2/sports/football/nfl`
//! Auth: none. `GET /scoreboard?dates=<season>&seasontype=2&week=<week>`
//! returns the regular-season games of one week; a bare `/scoreboard`
//! returns the week currently in play.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{SportsApi, WeekRef};
use crate::error::{EngineError, Result};
use crate::types::{GameStatus, GameUpdate};

pub const DEFAULT_BASE_URL: &str = "https://site.api.espn.com/apis/site/v2/sports/football/nfl";
const SERVICE: &str = "sports-api";
const REGULAR_SEASON: u8 = 2;

// ---------------------------------------------------------------------------
// API response types (scoreboard JSON → Rust). Only the fields we use.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Scoreboard {
    #[serde(default)]
    events: Vec<EspnEvent>,
    #[serde(default)]
    season: Option<SeasonInfo>,
    #[serde(default)]
    week: Option<WeekInfo>,
}

#[derive(Debug, Deserialize)]
struct SeasonInfo {
    year: i32,
}

#[derive(Debug, Deserialize)]
struct WeekInfo {
    number: i32,
}

#[derive(Debug, Deserialize)]
struct EspnEvent {
    id: String,
    date: String,
    #[serde(default)]
    season: Option<SeasonInfo>,
    #[serde(default)]
    week: Option<WeekInfo>,
    #[serde(default)]
    status: Option<EspnStatus>,
    #[serde(default)]
    competitions: Vec<Competition>,
}

#[derive(Debug, Deserialize)]
struct EspnStatus {
    #[serde(rename = "type")]
    kind: StatusType,
}

#[derive(Debug, Deserialize)]
struct StatusType {
    /// e.g. "STATUS_SCHEDULED", "STATUS_FINAL", "STATUS_POSTPONED"
    #[serde(default)]
    name: String,
    /// "pre" | "in" | "post"
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Competition {
    #[serde(default)]
    competitors: Vec<Competitor>,
    #[serde(default)]
    venue: Option<Venue>,
    #[serde(default)]
    odds: Vec<Odds>,
    #[serde(default)]
    weather: Option<Weather>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Competitor {
    home_away: String,
    /// A string in the scoreboard payload, a number in some others.
    #[serde(default)]
    score: Option<serde_json::Value>,
    team: Team,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Team {
    display_name: String,
    #[serde(default)]
    abbreviation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Venue {
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Odds {
    /// Favourite and line, e.g. "KC -3.5", or "EVEN".
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    over_under: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Weather {
    #[serde(default)]
    display_value: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct EspnClient {
    http: Client,
    base_url: String,
}

impl EspnClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pickline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Config(format!("sports HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_scoreboard(&self, query: &[(&str, String)]) -> Result<Scoreboard> {
        let url = format!("{}/scoreboard", self.base_url);
        debug!(url = %url, ?query, "Fetching scoreboard");

        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| EngineError::upstream(SERVICE, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::upstream(SERVICE, format!("scoreboard returned {status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| EngineError::upstream(SERVICE, format!("bad scoreboard body: {e}")))
    }

    /// Convert one scoreboard event. Events without both competitors or with
    /// an unreadable date are dropped.
    fn to_game_update(event: EspnEvent, season: i32, week: i32) -> Option<GameUpdate> {
        let scheduled_at = parse_event_date(&event.date)?;
        let competition = event.competitions.into_iter().next()?;

        let mut home = None;
        let mut away = None;
        for c in competition.competitors {
            match c.home_away.as_str() {
                "home" => home = Some(c),
                "away" => away = Some(c),
                _ => {}
            }
        }
        let (home, away) = (home?, away?);

        let status = event
            .status
            .as_ref()
            .map(|s| map_status(&s.kind))
            .unwrap_or(GameStatus::Scheduled);
        let scored = matches!(status, GameStatus::InProgress | GameStatus::Final);

        let odds = competition.odds.into_iter().next();
        let spread = odds
            .as_ref()
            .and_then(|o| o.details.as_deref())
            .and_then(|d| parse_spread(d, &home.team.abbreviation, &away.team.abbreviation));
        let total = odds.as_ref().and_then(|o| o.over_under);

        let weather = competition.weather.and_then(|w| match (w.display_value, w.temperature) {
            (Some(text), Some(t)) => Some(format!("{text}, {t:.0}°F")),
            (Some(text), None) => Some(text),
            (None, Some(t)) => Some(format!("{t:.0}°F")),
            (None, None) => None,
        });

        Some(GameUpdate {
            external_id: event.id,
            season: event.season.map(|s| s.year).unwrap_or(season),
            week: event.week.map(|w| w.number).unwrap_or(week),
            scheduled_at,
            status,
            home_score: if scored { parse_score(home.score.as_ref()) } else { None },
            away_score: if scored { parse_score(away.score.as_ref()) } else { None },
            home_team: home.team.display_name,
            away_team: away.team.display_name,
            spread,
            total,
            venue: competition.venue.and_then(|v| v.full_name),
            weather,
        })
    }
}

#[async_trait]
impl SportsApi for EspnClient {
    async fn games_for_week(&self, season: i32, week: i32) -> Result<Vec<GameUpdate>> {
        let board = self
            .fetch_scoreboard(&[
                ("dates", season.to_string()),
                ("seasontype", REGULAR_SEASON.to_string()),
                ("week", week.to_string()),
            ])
            .await?;

        let total = board.events.len();
        let games: Vec<GameUpdate> = board
            .events
            .into_iter()
            .filter_map(|e| Self::to_game_update(e, season, week))
            .collect();
        if games.len() < total {
            warn!(season, week, dropped = total - games.len(), "Unparseable scoreboard events skipped");
        }
        Ok(games)
    }

    async fn current_week(&self) -> Result<WeekRef> {
        let board = self.fetch_scoreboard(&[]).await?;
        match (board.season, board.week) {
            (Some(season), Some(week)) => Ok(WeekRef {
                season: season.year,
                week: week.number,
            }),
            _ => Err(EngineError::upstream(SERVICE, "scoreboard carried no season/week")),
        }
    }
}

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

/// ESPN dates come as `2025-10-05T17:00Z` (no seconds) or full RFC 3339.
fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ")
                .ok()
                .map(|n| n.and_utc())
        })
}

fn map_status(kind: &StatusType) -> GameStatus {
    if kind.name.contains("POSTPONED") || kind.name.contains("CANCELED") {
        return GameStatus::Postponed;
    }
    match kind.state.as_str() {
        "in" => GameStatus::InProgress,
        "post" => GameStatus::Final,
        _ => GameStatus::Scheduled,
    }
}

fn parse_score(raw: Option<&serde_json::Value>) -> Option<i32> {
    match raw? {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        _ => None,
    }
}

/// Convert the favourite's line into points added to the home score.
/// "KC -3.5" with KC at home gives -3.5; with KC away it gives +3.5.
fn parse_spread(details: &str, home_abbr: &str, away_abbr: &str) -> Option<f64> {
    let details = details.trim();
    if details.eq_ignore_ascii_case("even") || details.eq_ignore_ascii_case("pk") {
        return Some(0.0);
    }
    let (team, line) = details.rsplit_once(' ')?;
    let line: f64 = line.parse().ok()?;
    if team.eq_ignore_ascii_case(home_abbr) {
        Some(line)
    } else if team.eq_ignore_ascii_case(away_abbr) {
        Some(-line)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
