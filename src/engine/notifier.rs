//! Notification producers and dispatcher.
//!
//! Producers turn store state into queue entries (weekly digest,
//! high-confidence picks, event-start reminders). Every enqueue goes through
//! the store's atomic dedup check, so re-running a producer inside the dedup
//! window adds nothing. The dispatcher drains due entries with bounded
//! concurrency and records each outcome on its own entry.

use chrono::{DateTime, Datelike, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::channels::ChannelSet;
use crate::config::NotificationConfig;
use crate::error::Result;
use crate::storage::Store;
use crate::types::{
    Game, NewNotification, NotificationEntry, NotificationKind, NotificationPayload, Pick,
    Prediction, Subscriber,
};

/// Upper bound on games considered by one event-start pass.
const EVENT_START_SCAN_LIMIT: i64 = 500;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProduceReport {
    pub kind: NotificationKind,
    /// Subjects found (users for the digest, games for the alerts).
    pub subjects: usize,
    pub enqueued: usize,
    pub suppressed: usize,
}

impl ProduceReport {
    fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            subjects: 0,
            enqueued: 0,
            suppressed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub entry_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub failures: Vec<DeliveryFailure>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct NotificationDispatcher {
    store: Store,
    channels: ChannelSet,
    config: NotificationConfig,
}

impl NotificationDispatcher {
    pub fn new(store: Store, channels: ChannelSet, config: NotificationConfig) -> Self {
        Self {
            store,
            channels,
            config,
        }
    }

    fn dedup_window(&self) -> Duration {
        Duration::hours(self.config.dedup_window_hours)
    }

    async fn enqueue_for(
        &self,
        report: &mut ProduceReport,
        subscriber: &Subscriber,
        domain_key: &str,
        payload: &NotificationPayload,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let entry = NewNotification {
            recipient_id: subscriber.user_id,
            channel: subscriber.channel,
            kind: report.kind,
            domain_key: domain_key.to_string(),
            payload: payload.clone(),
            scheduled_for: now,
        };
        match self
            .store
            .enqueue_deduped(&entry, window_start, now)
            .await?
        {
            Some(_) => report.enqueued += 1,
            None => report.suppressed += 1,
        }
        Ok(())
    }

    // -- producers ----------------------------------------------------------

    /// One digest per opted-in user per ISO week: their last seven days of
    /// settled picks and the next few scheduled games.
    pub async fn produce_weekly_digest(&self, now: DateTime<Utc>) -> Result<ProduceReport> {
        let mut report = ProduceReport::new(NotificationKind::WeeklyDigest);
        let subscribers = self.store.digest_subscribers().await?;
        report.subjects = subscribers.len();
        if subscribers.is_empty() {
            debug!("No digest subscribers");
            return Ok(report);
        }

        let upcoming = self
            .store
            .upcoming_games(now, now + Duration::days(7), self.config.digest_upcoming_games)
            .await?;
        let key = NotificationKind::digest_key(now);
        // The key names the ISO week, so dedup reaches back to its start.
        let window_start = iso_week_start(now).min(now - self.dedup_window());
        let since = now - Duration::days(7);

        for subscriber in &subscribers {
            let (total, correct) = self.store.user_record_since(subscriber.user_id, since).await?;
            let payload = digest_payload(total, correct, &upcoming);
            self.enqueue_for(&mut report, subscriber, &key, &payload, window_start, now)
                .await?;
        }

        info!(
            subscribers = report.subjects,
            enqueued = report.enqueued,
            suppressed = report.suppressed,
            "Weekly digests produced"
        );
        Ok(report)
    }

    /// Alerts for the strongest pending model pick on each game starting
    /// inside the lookahead, to subscribers in the eligible tiers.
    pub async fn produce_high_confidence_alerts(&self, now: DateTime<Utc>) -> Result<ProduceReport> {
        let mut report = ProduceReport::new(NotificationKind::HighConfidence);
        let picks = self
            .store
            .upcoming_model_picks(
                now,
                now + Duration::hours(self.config.high_confidence_lookahead_hours),
                self.config.high_confidence_floor,
            )
            .await?;

        // Ordered by confidence, so the first pick seen per game is its best.
        let mut seen = HashSet::new();
        let best: Vec<_> = picks
            .into_iter()
            .filter(|p| seen.insert(p.game.id))
            .collect();
        report.subjects = best.len();
        if best.is_empty() {
            debug!("No high-confidence picks to alert");
            return Ok(report);
        }

        let subscribers = self
            .store
            .high_confidence_subscribers(&self.config.high_confidence_tiers)
            .await?;

        for pick in &best {
            let key = report.kind.domain_key(pick.game.id);
            let payload = high_confidence_payload(&pick.prediction, &pick.game);
            for subscriber in &subscribers {
                self.enqueue_for(&mut report, subscriber, &key, &payload, now - self.dedup_window(), now)
                    .await?;
            }
        }

        info!(
            games = report.subjects,
            subscribers = subscribers.len(),
            enqueued = report.enqueued,
            suppressed = report.suppressed,
            "High-confidence alerts produced"
        );
        Ok(report)
    }

    /// Reminders for games starting inside the lead time, to users who
    /// favourite either team.
    pub async fn produce_event_start_alerts(&self, now: DateTime<Utc>) -> Result<ProduceReport> {
        let mut report = ProduceReport::new(NotificationKind::EventStart);
        let lead = Duration::minutes(self.config.event_start_lead_minutes);
        let games = self
            .store
            .upcoming_games(now, now + lead, EVENT_START_SCAN_LIMIT)
            .await?;
        report.subjects = games.len();

        for game in &games {
            let subscribers = self
                .store
                .favorite_subscribers(&game.home_team, &game.away_team)
                .await?;
            if subscribers.is_empty() {
                continue;
            }
            let key = report.kind.domain_key(game.id);
            let minutes = (game.scheduled_at - now).num_minutes().max(0);
            let payload = event_start_payload(game, minutes);
            for subscriber in &subscribers {
                self.enqueue_for(&mut report, subscriber, &key, &payload, now - self.dedup_window(), now)
                    .await?;
            }
        }

        info!(
            games = report.subjects,
            enqueued = report.enqueued,
            suppressed = report.suppressed,
            "Event-start alerts produced"
        );
        Ok(report)
    }

    // -- delivery -----------------------------------------------------------

    /// Deliver every due pending entry, up to the batch limit. Each entry is
    /// `sent` only if all of its channels accepted it.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let due = self
            .store
            .due_notifications(now, self.config.batch_size)
            .await?;
        let mut report = DispatchReport {
            attempted: due.len(),
            ..DispatchReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<(i64, std::result::Result<(), String>)> = stream::iter(due)
            .map(|entry| async move {
                let outcome = self.process(&entry, now).await;
                (entry.id, outcome)
            })
            .buffer_unordered(self.config.dispatch_concurrency.max(1))
            .collect()
            .await;

        for (entry_id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.sent += 1,
                Err(reason) => {
                    report.failed += 1;
                    report.failures.push(DeliveryFailure { entry_id, reason });
                }
            }
        }
        report.failures.sort_by_key(|f| f.entry_id);

        info!(
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            "Notification dispatch complete"
        );
        Ok(report)
    }

    /// Deliver one entry and record the outcome on it.
    async fn process(&self, entry: &NotificationEntry, now: DateTime<Utc>) -> std::result::Result<(), String> {
        match self.deliver(entry).await {
            Ok(()) => match self.store.mark_sent(entry.id, now).await {
                Ok(true) => Ok(()),
                Ok(false) => {
                    warn!(entry_id = entry.id, "Entry left pending state during delivery");
                    Ok(())
                }
                Err(e) => {
                    error!(entry_id = entry.id, error = %e, "Delivered but could not mark sent");
                    Err(format!("delivered but not recorded: {e}"))
                }
            },
            Err(reason) => {
                warn!(
                    entry_id = entry.id,
                    recipient = entry.recipient_id,
                    channel = %entry.channel,
                    reason = %reason,
                    "Notification delivery failed"
                );
                if let Err(e) = self.store.mark_failed(entry.id, &reason).await {
                    error!(entry_id = entry.id, error = %e, "Could not record delivery failure");
                }
                Err(reason)
            }
        }
    }

    async fn deliver(&self, entry: &NotificationEntry) -> std::result::Result<(), String> {
        let recipient = match self.store.recipient(entry.recipient_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => return Err(format!("recipient {} not found", entry.recipient_id)),
            Err(e) => return Err(format!("recipient lookup: {e}")),
        };

        let mut errors = Vec::new();
        for &channel in entry.channel.targets() {
            if let Err(e) = self
                .channels
                .adapter(channel)
                .send(&recipient, &entry.payload)
                .await
            {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            debug!(entry_id = entry.id, kind = %entry.kind, "Notification delivered");
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    // -- operator actions ---------------------------------------------------

    /// Put one failed entry back in the queue. `false` if it was not failed.
    pub async fn retry_failed(&self, id: i64) -> Result<bool> {
        let requeued = self.store.requeue_failed(id).await?;
        if requeued {
            info!(entry_id = id, "Failed notification requeued");
        }
        Ok(requeued)
    }

    pub async fn retry_all_failed(&self) -> Result<u64> {
        let requeued = self.store.requeue_all_failed().await?;
        info!(requeued, "Failed notifications requeued");
        Ok(requeued)
    }

    /// Drop finished entries older than the retention period. Entries that
    /// can still suppress a repeat (dedup window, current digest week) are kept.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<u64> {
        let keep = Duration::days(self.config.retention_days)
            .max(self.dedup_window())
            .max(Duration::days(7));
        let purged = self.store.purge_notifications(now - keep).await?;
        if purged > 0 {
            info!(purged, "Old notifications purged");
        }
        Ok(purged)
    }
}

/// Monday 00:00 UTC of the ISO week containing `at`.
fn iso_week_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let monday = at.date_naive() - Duration::days(i64::from(at.weekday().num_days_from_monday()));
    monday
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(at - Duration::days(7))
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

fn pick_label(prediction: &Prediction, game: &Game) -> String {
    match prediction.pick {
        Pick::Home => game.home_team.clone(),
        Pick::Away => game.away_team.clone(),
        Pick::Over | Pick::Under => match game.total {
            Some(line) => format!("{} {line}", prediction.pick),
            None => prediction.pick.to_string(),
        },
    }
}

fn digest_payload(total: i64, correct: i64, upcoming: &[Game]) -> NotificationPayload {
    let accuracy = if total > 0 {
        correct as f64 / total as f64
    } else {
        0.0
    };

    let mut body = if total > 0 {
        format!(
            "This week you went {correct} for {total} ({:.1}%).",
            accuracy * 100.0
        )
    } else {
        "No settled picks this week.".to_string()
    };
    if !upcoming.is_empty() {
        body.push_str("\nComing up:");
        for game in upcoming {
            body.push_str(&format!(
                "\n  {} ({})",
                game.matchup(),
                game.scheduled_at.format("%a %H:%M UTC")
            ));
        }
    }

    NotificationPayload {
        title: "Your weekly picks digest".to_string(),
        body,
        data: json!({
            "total": total,
            "correct": correct,
            "accuracy": accuracy,
            "upcoming": upcoming
                .iter()
                .map(|g| json!({
                    "game_id": g.id,
                    "matchup": g.matchup(),
                    "scheduled_at": g.scheduled_at,
                }))
                .collect::<Vec<_>>(),
        }),
    }
}

fn high_confidence_payload(prediction: &Prediction, game: &Game) -> NotificationPayload {
    NotificationPayload {
        title: "High Confidence Pick".to_string(),
        body: format!(
            "{}: {} ({}) at {:.0}% confidence",
            game.matchup(),
            pick_label(prediction, game),
            prediction.prediction_type,
            prediction.confidence * 100.0
        ),
        data: json!({
            "type": NotificationKind::HighConfidence,
            "game_id": game.id,
            "prediction_id": prediction.id,
            "prediction_type": prediction.prediction_type,
            "pick": prediction.pick,
            "confidence": prediction.confidence,
        }),
    }
}

fn event_start_payload(game: &Game, minutes: i64) -> NotificationPayload {
    NotificationPayload {
        title: format!("{} vs {}", game.home_team, game.away_team),
        body: format!("Kickoff in {minutes} minutes"),
        data: json!({
            "type": NotificationKind::EventStart,
            "game_id": game.id,
            "scheduled_at": game.scheduled_at,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
