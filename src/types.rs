//! Shared types for the pickline engine.
//!
//! Games, predictions, aggregate stats and notification queue entries as the
//! store persists them. Enum variants round-trip through their lowercase
//! text form, which is also what the SQLite columns hold.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Text form, `Display` and `FromStr` for enums stored as TEXT columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(EngineError::Integrity(format!(
                        "unknown {} value '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Games
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
}

text_enum!(GameStatus {
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Final => "final",
    Postponed => "postponed",
});

impl GameStatus {
    /// Status only moves forward. `final` is terminal, and nothing returns to
    /// `scheduled` once it has left it.
    pub fn can_transition_to(self, next: GameStatus) -> bool {
        use GameStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Scheduled, InProgress | Final | Postponed) => true,
            (InProgress, Final | Postponed) => true,
            (Postponed, InProgress | Final) => true,
            _ => false,
        }
    }
}

/// A game as delivered by an upstream source, before it has a store id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameUpdate {
    pub external_id: String,
    pub season: i32,
    pub week: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: GameStatus,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    /// Points added to the home score to settle spread picks (negative = home favoured).
    pub spread: Option<f64>,
    /// Combined-score line for over/under picks.
    pub total: Option<f64>,
    pub venue: Option<String>,
    pub weather: Option<String>,
}

impl GameUpdate {
    #[cfg(test)]
    pub fn sample(external_id: &str, season: i32, week: i32) -> Self {
        GameUpdate {
            external_id: external_id.to_string(),
            season,
            week,
            scheduled_at: Utc::now() + chrono::Duration::days(2),
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
}

/// A persisted game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    pub external_id: String,
    pub season: i32,
    pub week: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: GameStatus,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub spread: Option<f64>,
    pub total: Option<f64>,
    pub venue: Option<String>,
    pub weather: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    /// Home and away scores once the game is final and both are known.
    pub fn final_score(&self) -> Option<(i32, i32)> {
        match (self.status, self.home_score, self.away_score) {
            (GameStatus::Final, Some(h), Some(a)) => Some((h, a)),
            _ => None,
        }
    }

    pub fn matchup(&self) -> String {
        format!("{} @ {}", self.away_team, self.home_team)
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} S{}W{}] {} ({})",
            self.external_id,
            self.season,
            self.week,
            self.matchup(),
            self.status
        )
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    Winner,
    Ensemble,
    Spread,
    Total,
}

text_enum!(PredictionType {
    Winner => "winner",
    Ensemble => "ensemble",
    Spread => "spread",
    Total => "total",
});

/// A predicted or actual side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    Home,
    Away,
    Over,
    Under,
}

text_enum!(Pick {
    Home => "home",
    Away => "away",
    Over => "over",
    Under => "under",
});

impl PredictionType {
    /// Whether `pick` is a meaningful side for this prediction type.
    pub fn accepts(self, pick: Pick) -> bool {
        match self {
            PredictionType::Total => matches!(pick, Pick::Over | Pick::Under),
            _ => matches!(pick, Pick::Home | Pick::Away),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionResult {
    Pending,
    Correct,
    Incorrect,
    /// Settled level against the line. Counted in no accuracy denominator.
    Push,
}

text_enum!(PredictionResult {
    Pending => "pending",
    Correct => "correct",
    Incorrect => "incorrect",
    Push => "push",
});

impl PredictionResult {
    pub fn is_settled(self) -> bool {
        self != PredictionResult::Pending
    }
}

/// A prediction row. `user_id == None` marks a model pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub game_id: i64,
    pub user_id: Option<i64>,
    pub prediction_type: PredictionType,
    pub pick: Pick,
    pub confidence: f64,
    pub result: PredictionResult,
    pub actual_side: Option<Pick>,
    pub margin: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// A prediction to insert; the store assigns id and pending state.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub game_id: i64,
    pub user_id: Option<i64>,
    pub prediction_type: PredictionType,
    pub pick: Pick,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Aggregate stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatScope {
    User,
    Model,
    Global,
}

text_enum!(StatScope {
    User => "user",
    Model => "model",
    Global => "global",
});

/// Accuracy over decisive settlements (correct + incorrect) for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyStat {
    pub scope: StatScope,
    pub scope_id: String,
    pub total: i64,
    pub correct: i64,
    pub rate: f64,
    pub avg_confidence: f64,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Push,
    Both,
}

text_enum!(Channel {
    Email => "email",
    Push => "push",
    Both => "both",
});

impl Channel {
    /// Channel implied by a recipient's enabled preferences.
    pub fn from_preferences(email: bool, push: bool) -> Option<Channel> {
        match (email, push) {
            (true, true) => Some(Channel::Both),
            (true, false) => Some(Channel::Email),
            (false, true) => Some(Channel::Push),
            (false, false) => None,
        }
    }

    /// Concrete channels an entry on this channel is delivered to.
    pub fn targets(self) -> &'static [Channel] {
        match self {
            Channel::Email => &[Channel::Email],
            Channel::Push => &[Channel::Push],
            Channel::Both => &[Channel::Email, Channel::Push],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

text_enum!(NotificationStatus {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    WeeklyDigest,
    HighConfidence,
    EventStart,
}

text_enum!(NotificationKind {
    WeeklyDigest => "weekly_digest",
    HighConfidence => "high_confidence",
    EventStart => "event_start",
});

impl NotificationKind {
    fn key_prefix(self) -> &'static str {
        match self {
            NotificationKind::WeeklyDigest => "digest",
            NotificationKind::HighConfidence => "high_confidence",
            NotificationKind::EventStart => "event_start",
        }
    }

    /// Domain key namespaced by kind, so different alerts about one game
    /// never suppress each other.
    pub fn domain_key(self, subject: impl fmt::Display) -> String {
        format!("{}:{subject}", self.key_prefix())
    }

    /// Domain key for the digest covering the ISO week containing `at`.
    pub fn digest_key(at: DateTime<Utc>) -> String {
        let iso = at.iso_week();
        NotificationKind::WeeklyDigest.domain_key(format_args!("{}-W{:02}", iso.year(), iso.week()))
    }
}

/// Rendered message content, stored as JSON on the queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A queue entry to enqueue, subject to the dedup check.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub channel: Channel,
    pub kind: NotificationKind,
    pub domain_key: String,
    pub payload: NotificationPayload,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub id: i64,
    pub recipient_id: i64,
    pub channel: Channel,
    pub kind: NotificationKind,
    pub domain_key: String,
    pub payload: NotificationPayload,
    pub status: NotificationStatus,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub attempts: i64,
}

// ---------------------------------------------------------------------------
// Recipients (read-only account data)
// ---------------------------------------------------------------------------

/// Delivery addresses for one user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recipient {
    pub user_id: i64,
    pub email: Option<String>,
    pub push_tokens: Vec<String>,
}

/// A user eligible for some alert kind, with the channel their preferences imply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub user_id: i64,
    pub tier: String,
    pub channel: Channel,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
