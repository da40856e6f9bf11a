//! Model transparency views.
//!
//! Read-only summaries of how the model's picks have actually performed,
//! built from decisive settlements (pushes and pending picks never count).
//! Accuracy is reported both as a 0..1 rate and as a percentage rounded to
//! two decimals for display.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::storage::{SettledPick, Store};
use crate::types::PredictionType;

/// Window for the daily performance series.
pub const RECENT_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Tally {
    pub total: usize,
    pub correct: usize,
    pub rate: f64,
    pub accuracy_pct: f64,
    pub avg_confidence: f64,
}

impl Tally {
    fn from_picks<'a>(picks: impl IntoIterator<Item = &'a SettledPick>) -> Self {
        let mut total = 0usize;
        let mut correct = 0usize;
        let mut confidence = 0.0;
        for pick in picks {
            total += 1;
            confidence += pick.confidence;
            if pick.correct {
                correct += 1;
            }
        }
        if total == 0 {
            return Tally::default();
        }
        let rate = correct as f64 / total as f64;
        Tally {
            total,
            correct,
            rate,
            accuracy_pct: (rate * 10_000.0).round() / 100.0,
            avg_confidence: confidence / total as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceBucket {
    pub label: &'static str,
    /// Inclusive lower bound.
    pub min: f64,
    /// Exclusive upper bound. `None` for the top bucket.
    pub max: Option<f64>,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransparencyStats {
    pub overall: Tally,
    pub by_type: BTreeMap<PredictionType, Tally>,
    /// Highest bucket first; empty buckets are omitted.
    pub by_confidence: Vec<ConfidenceBucket>,
    /// Most recent day first.
    pub recent: Vec<DailyPerformance>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TrustBand {
    #[serde(rename = "HIGH_CONFIDENCE")]
    High,
    #[serde(rename = "MEDIUM_CONFIDENCE")]
    Medium,
    #[serde(rename = "LOW_CONFIDENCE")]
    Low,
}

impl TrustBand {
    pub fn for_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            TrustBand::High
        } else if confidence >= 0.65 {
            TrustBand::Medium
        } else {
            TrustBand::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustRecommendation {
    pub band: TrustBand,
    pub sample_size: usize,
    pub accuracy_pct: f64,
    pub recommendation: &'static str,
}

const STRONG: &str = "Strong bet - historically accurate at this confidence level";
const CAUTION: &str = "Proceed with caution - moderate historical accuracy";
const ENTERTAINMENT: &str = "For entertainment only - lower historical accuracy";

/// (label, inclusive min, exclusive max)
const CONFIDENCE_BUCKETS: [(&str, f64, Option<f64>); 4] = [
    ("Very High (80%+)", 0.8, None),
    ("High (70-80%)", 0.7, Some(0.8)),
    ("Medium (60-70%)", 0.6, Some(0.7)),
    ("Low (<60%)", f64::NEG_INFINITY, Some(0.6)),
];

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn build_stats(picks: &[SettledPick], now: DateTime<Utc>) -> TransparencyStats {
    let mut by_type: BTreeMap<PredictionType, Vec<&SettledPick>> = BTreeMap::new();
    for pick in picks {
        by_type.entry(pick.prediction_type).or_default().push(pick);
    }

    let by_confidence = CONFIDENCE_BUCKETS
        .iter()
        .filter_map(|&(label, min, max)| {
            let tally = Tally::from_picks(
                picks
                    .iter()
                    .filter(|p| p.confidence >= min && max.map_or(true, |m| p.confidence < m)),
            );
            (tally.total > 0).then_some(ConfidenceBucket {
                label,
                min: min.max(0.0),
                max,
                tally,
            })
        })
        .collect();

    let cutoff = now - Duration::days(RECENT_DAYS);
    let mut by_day: BTreeMap<NaiveDate, Vec<&SettledPick>> = BTreeMap::new();
    for pick in picks.iter().filter(|p| p.settled_at >= cutoff) {
        by_day.entry(pick.settled_at.date_naive()).or_default().push(pick);
    }
    let recent = by_day
        .into_iter()
        .rev()
        .map(|(date, day)| DailyPerformance {
            date,
            tally: Tally::from_picks(day),
        })
        .collect();

    TransparencyStats {
        overall: Tally::from_picks(picks),
        by_type: by_type
            .into_iter()
            .map(|(t, group)| (t, Tally::from_picks(group)))
            .collect(),
        by_confidence,
        recent,
        generated_at: now,
    }
}

/// One recommendation per trust band that has decisive settlements.
pub fn build_trust(picks: &[SettledPick]) -> Vec<TrustRecommendation> {
    let mut bands: BTreeMap<TrustBand, Vec<&SettledPick>> = BTreeMap::new();
    for pick in picks {
        bands
            .entry(TrustBand::for_confidence(pick.confidence))
            .or_default()
            .push(pick);
    }

    bands
        .into_iter()
        .map(|(band, group)| {
            let tally = Tally::from_picks(group);
            let recommendation = match band {
                TrustBand::High if tally.accuracy_pct >= 70.0 => STRONG,
                TrustBand::Medium if tally.accuracy_pct >= 60.0 => CAUTION,
                _ => ENTERTAINMENT,
            };
            TrustRecommendation {
                band,
                sample_size: tally.total,
                accuracy_pct: tally.accuracy_pct,
                recommendation,
            }
        })
        .collect()
}

pub async fn transparency_stats(store: &Store, now: DateTime<Utc>) -> Result<TransparencyStats> {
    let picks = store.settled_model_picks(None).await?;
    Ok(build_stats(&picks, now))
}

pub async fn trust_recommendations(store: &Store) -> Result<Vec<TrustRecommendation>> {
    let picks = store.settled_model_picks(None).await?;
    Ok(build_trust(&picks))
}
