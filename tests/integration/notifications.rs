//! Producers, dedup and dispatch through the queue.

use chrono::{DateTime, Duration, Utc};

use pickline::storage::{Preferences, Store};
use pickline::types::{
    Channel, NewNotification, NotificationKind, NotificationPayload, NotificationStatus,
};

use crate::upstreams::{scheduled_game, FakeSportsApi};
use crate::{week_five, Harness};

/// Email-only user with a fixed id.
async fn email_user(store: &Store, id: i64) {
    sqlx::query("INSERT INTO users (id, email, tier, active) VALUES (?, ?, 'premium', 1)")
        .bind(id)
        .bind(format!("fan{id}@example.com"))
        .execute(store.pool())
        .await
        .unwrap();
    store
        .set_preferences(
            id,
            Preferences {
                push_enabled: false,
                ..Preferences::default()
            },
        )
        .await
        .unwrap();
}

fn entry(recipient_id: i64, domain_key: &str, at: DateTime<Utc>) -> NewNotification {
    NewNotification {
        recipient_id,
        channel: Channel::Email,
        kind: NotificationKind::EventStart,
        domain_key: domain_key.to_string(),
        payload: NotificationPayload {
            title: "KC vs BUF".into(),
            body: "Kickoff in 30 minutes".into(),
            data: serde_json::Value::Null,
        },
        scheduled_for: at,
    }
}

#[tokio::test]
async fn test_existing_entry_suppresses_second_producer_pass() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    let now = Utc::now();

    let mut kickoff = scheduled_game("401", 2025, 5, 0);
    kickoff.scheduled_at = now + Duration::minutes(30);
    h.store.upsert_game(&kickoff, now).await.unwrap();
    sqlx::query("UPDATE games SET id = 100 WHERE external_id = '401'")
        .execute(h.store.pool())
        .await
        .unwrap();

    email_user(&h.store, 42).await;
    h.store.add_favorite(42, "KC").await.unwrap();

    let existing = h
        .store
        .enqueue_deduped(&entry(42, "event_start:100", now), now - Duration::hours(24), now)
        .await
        .unwrap()
        .unwrap();

    let pending = h.engine.notifier().produce_event_start_alerts(now).await.unwrap();
    assert_eq!(pending.enqueued, 0);
    assert_eq!(pending.suppressed, 1);

    h.store.mark_sent(existing, now).await.unwrap();
    let sent = h.engine.notifier().produce_event_start_alerts(now).await.unwrap();
    assert_eq!(sent.enqueued, 0);
    assert_eq!(sent.suppressed, 1);

    assert_eq!(h.store.notifications_for(42).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_start_alert_end_to_end() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    let now = Utc::now();

    let mut kickoff = scheduled_game("401", 2025, 5, 0);
    kickoff.scheduled_at = now + Duration::minutes(45);
    h.store.upsert_game(&kickoff, now).await.unwrap();
    email_user(&h.store, 7).await;
    h.store.add_favorite(7, "BUF").await.unwrap();

    let produced = h.engine.notifier().produce_event_start_alerts(now).await.unwrap();
    assert_eq!(produced.enqueued, 1);

    let report = h.engine.notifier().dispatch_due(now).await.unwrap();
    assert_eq!((report.sent, report.failed), (1, 0));
    assert_eq!(h.email.delivered_to(), vec![7]);
    assert!(h.push.delivered_to().is_empty());
    assert_eq!(h.email.payloads()[0].title, "KC vs BUF");

    // Nothing left to send.
    let report = h.engine.notifier().dispatch_due(now).await.unwrap();
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_one_failing_delivery_does_not_block_the_other() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    let now = Utc::now();
    email_user(&h.store, 1).await;
    email_user(&h.store, 2).await;
    h.email.fail_for(1);

    let window = now - Duration::hours(24);
    let bad = h.store.enqueue_deduped(&entry(1, "event_start:9", now), window, now).await.unwrap().unwrap();
    let good = h.store.enqueue_deduped(&entry(2, "event_start:9", now), window, now).await.unwrap().unwrap();

    let report = h.engine.notifier().dispatch_due(now).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].entry_id, bad);
    assert!(report.failures[0].reason.contains("mailbox unavailable"));

    let failed = h.store.notification(bad).await.unwrap().unwrap();
    assert_eq!(failed.status, NotificationStatus::Failed);
    assert!(failed.error.unwrap().contains("mailbox unavailable"));
    let sent = h.store.notification(good).await.unwrap().unwrap();
    assert_eq!(sent.status, NotificationStatus::Sent);
    assert!(sent.sent_at.is_some());

    // Operator retry after the mailbox recovers.
    h.email.recover(1);
    assert!(h.engine.retry_failed(bad).await.unwrap());
    let report = h.engine.notifier().dispatch_due(now).await.unwrap();
    assert_eq!((report.sent, report.failed), (1, 0));
    assert_eq!(h.email.delivered_to(), vec![2, 1]);
}

#[tokio::test]
async fn test_weekly_digest_once_per_week() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    let now = Utc::now();
    h.store
        .upsert_game(&scheduled_game("401", 2025, 5, 2), now)
        .await
        .unwrap();
    email_user(&h.store, 3).await;

    let first = h.engine.notifier().produce_weekly_digest(now).await.unwrap();
    assert_eq!(first.enqueued, 1);
    let again = h.engine.notifier().produce_weekly_digest(now).await.unwrap();
    assert_eq!(again.enqueued, 0);

    h.engine.notifier().dispatch_due(now).await.unwrap();
    let payload = &h.email.payloads()[0];
    assert!(payload.body.contains("BUF @ KC"), "{}", payload.body);
}
