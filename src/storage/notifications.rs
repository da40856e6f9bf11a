use chrono::{DateTime, Utc};
use tracing::debug;

use super::{from_unix, from_unix_opt, to_unix, Store};
use crate::error::{EngineError, Result};
use crate::types::{NewNotification, NotificationEntry};

/// Enqueue unless an overlapping entry (same recipient, same domain key, a
/// channel in common) is pending or was sent inside the dedup window. The
/// check and the insert are one statement, so concurrent producers cannot
/// both pass it.
const ENQUEUE_DEDUPED: &str = "
    INSERT INTO notification_queue
        (recipient_id, channel, kind, domain_key, payload, status, scheduled_for, created_at, attempts)
    SELECT ?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, 0
    WHERE NOT EXISTS (
        SELECT 1 FROM notification_queue
        WHERE recipient_id = ?1
          AND domain_key = ?4
          AND (channel = ?2 OR channel = 'both' OR ?2 = 'both')
          AND status IN ('pending', 'sent')
          AND created_at >= ?8
    )";

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: i64,
    recipient_id: i64,
    channel: String,
    kind: String,
    domain_key: String,
    payload: String,
    status: String,
    scheduled_for: i64,
    created_at: i64,
    sent_at: Option<i64>,
    error: Option<String>,
    attempts: i64,
}

impl TryFrom<EntryRow> for NotificationEntry {
    type Error = EngineError;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(NotificationEntry {
            id: row.id,
            recipient_id: row.recipient_id,
            channel: row.channel.parse()?,
            kind: row.kind.parse()?,
            domain_key: row.domain_key,
            payload: serde_json::from_str(&row.payload)?,
            status: row.status.parse()?,
            scheduled_for: from_unix(row.scheduled_for)?,
            created_at: from_unix(row.created_at)?,
            sent_at: from_unix_opt(row.sent_at)?,
            error: row.error,
            attempts: row.attempts,
        })
    }
}

fn into_entries(rows: Vec<EntryRow>) -> Result<Vec<NotificationEntry>> {
    rows.into_iter().map(NotificationEntry::try_from).collect()
}

impl Store {
    /// Returns the new entry id, or `None` when the dedup check suppressed it.
    pub async fn enqueue_deduped(
        &self,
        entry: &NewNotification,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let payload = serde_json::to_string(&entry.payload)?;
        let result = sqlx::query(ENQUEUE_DEDUPED)
            .bind(entry.recipient_id)
            .bind(entry.channel.as_str())
            .bind(entry.kind.as_str())
            .bind(&entry.domain_key)
            .bind(payload)
            .bind(to_unix(entry.scheduled_for))
            .bind(to_unix(now))
            .bind(to_unix(window_start))
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            debug!(
                recipient = entry.recipient_id,
                key = %entry.domain_key,
                channel = %entry.channel,
                "Duplicate notification suppressed"
            );
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Pending entries due at `now`, oldest schedule first.
    pub async fn due_notifications(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<NotificationEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT * FROM notification_queue \
             WHERE status = 'pending' AND scheduled_for <= ? \
             ORDER BY scheduled_for, id LIMIT ?",
        )
        .bind(to_unix(now))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        into_entries(rows)
    }

    pub async fn notification(&self, id: i64) -> Result<Option<NotificationEntry>> {
        let row: Option<EntryRow> = sqlx::query_as("SELECT * FROM notification_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(NotificationEntry::try_from).transpose()
    }

    pub async fn notifications_for(&self, recipient_id: i64) -> Result<Vec<NotificationEntry>> {
        let rows: Vec<EntryRow> =
            sqlx::query_as("SELECT * FROM notification_queue WHERE recipient_id = ? ORDER BY id")
                .bind(recipient_id)
                .fetch_all(self.pool())
                .await?;
        into_entries(rows)
    }

    /// Pending → sent. `false` if the entry was no longer pending.
    pub async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notification_queue SET status = 'sent', sent_at = ?, error = NULL, \
             attempts = attempts + 1 WHERE id = ? AND status = 'pending'",
        )
        .bind(to_unix(now))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Pending → failed with the delivery error recorded.
    pub async fn mark_failed(&self, id: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notification_queue SET status = 'failed', error = ?, attempts = attempts + 1 \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(reason)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Failed → pending for one entry. `false` if it was not failed.
    pub async fn requeue_failed(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notification_queue SET status = 'pending', error = NULL \
             WHERE id = ? AND status = 'failed'",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn requeue_all_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notification_queue SET status = 'pending', error = NULL WHERE status = 'failed'",
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete finished (sent or failed) entries created before `before`.
    pub async fn purge_notifications(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM notification_queue WHERE status IN ('sent', 'failed') AND created_at < ?",
        )
        .bind(to_unix(before))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_store;
    use crate::types::{Channel, NotificationKind, NotificationPayload, NotificationStatus};
    use chrono::Duration;

    fn alert(recipient_id: i64, channel: Channel, game_id: i64) -> NewNotification {
        NewNotification {
            recipient_id,
            channel,
            kind: NotificationKind::HighConfidence,
            domain_key: NotificationKind::HighConfidence.domain_key(game_id),
            payload: NotificationPayload {
                title: "High-confidence pick".into(),
                body: "BUF @ KC: KC at 72%".into(),
                data: serde_json::json!({ "game_id": game_id }),
            },
            scheduled_for: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dedup_suppresses_pending_duplicate() {
        let store = test_store().await;
        let now = Utc::now();
        let window = now - Duration::hours(24);

        let first = store.enqueue_deduped(&alert(42, Channel::Email, 100), window, now).await.unwrap();
        let second = store.enqueue_deduped(&alert(42, Channel::Email, 100), window, now).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        // A different channel, recipient or game is a different key.
        assert!(store.enqueue_deduped(&alert(42, Channel::Push, 100), window, now).await.unwrap().is_some());
        assert!(store.enqueue_deduped(&alert(43, Channel::Email, 100), window, now).await.unwrap().is_some());
        assert!(store.enqueue_deduped(&alert(42, Channel::Email, 101), window, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_both_overlaps_single_channels() {
        let store = test_store().await;
        let now = Utc::now();
        let window = now - Duration::hours(24);

        store.enqueue_deduped(&alert(7, Channel::Both, 5), window, now).await.unwrap().unwrap();
        assert!(store.enqueue_deduped(&alert(7, Channel::Email, 5), window, now).await.unwrap().is_none());
        assert!(store.enqueue_deduped(&alert(7, Channel::Push, 5), window, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_pairs_suppress_only_on_shared_target() {
        let store = test_store().await;
        let now = Utc::now();
        let window = now - Duration::hours(24);
        let all = [Channel::Email, Channel::Push, Channel::Both];

        let mut recipient = 100;
        for first in all {
            for second in all {
                recipient += 1;
                let shared = first.targets().iter().any(|t| second.targets().contains(t));
                store.enqueue_deduped(&alert(recipient, first, 5), window, now).await.unwrap().unwrap();
                let repeat = store.enqueue_deduped(&alert(recipient, second, 5), window, now).await.unwrap();
                assert_eq!(repeat.is_none(), shared, "{first:?} then {second:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_failed_entry_does_not_block_and_window_expires() {
        let store = test_store().await;
        let now = Utc::now();
        let window = now - Duration::hours(24);

        let id = store.enqueue_deduped(&alert(42, Channel::Email, 100), window, now).await.unwrap().unwrap();
        assert!(store.mark_failed(id, "smtp 550").await.unwrap());
        assert!(store.enqueue_deduped(&alert(42, Channel::Email, 100), window, now).await.unwrap().is_some());

        // Entries older than the window no longer suppress.
        let later = now + Duration::hours(25);
        let late_window = later - Duration::hours(24);
        assert!(store
            .enqueue_deduped(&alert(42, Channel::Email, 100), late_window, later)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_status_transitions_are_guarded() {
        let store = test_store().await;
        let now = Utc::now();
        let id = store
            .enqueue_deduped(&alert(1, Channel::Push, 9), now - Duration::hours(24), now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.due_notifications(now, 100).await.unwrap().len(), 1);
        assert!(store.mark_sent(id, now).await.unwrap());
        assert!(!store.mark_failed(id, "late failure").await.unwrap());
        assert!(!store.requeue_failed(id).await.unwrap());

        let entry = store.notification(id).await.unwrap().unwrap();
        assert_eq!(entry.status, NotificationStatus::Sent);
        assert_eq!(entry.attempts, 1);
        assert!(store.due_notifications(now, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requeue_and_purge() {
        let store = test_store().await;
        let now = Utc::now();
        let window = now - Duration::hours(24);
        let a = store.enqueue_deduped(&alert(1, Channel::Email, 1), window, now).await.unwrap().unwrap();
        let b = store.enqueue_deduped(&alert(1, Channel::Email, 2), window, now).await.unwrap().unwrap();
        store.mark_failed(a, "boom").await.unwrap();
        store.mark_failed(b, "boom").await.unwrap();

        assert_eq!(store.requeue_all_failed().await.unwrap(), 2);
        let entry = store.notification(a).await.unwrap().unwrap();
        assert_eq!(entry.status, NotificationStatus::Pending);
        assert!(entry.error.is_none());

        store.mark_sent(a, now).await.unwrap();
        assert_eq!(store.purge_notifications(now - Duration::days(1)).await.unwrap(), 0);
        assert_eq!(store.purge_notifications(now + Duration::seconds(1)).await.unwrap(), 1);
        assert!(store.notification(a).await.unwrap().is_none());
        assert!(store.notification(b).await.unwrap().is_some());
    }
}
