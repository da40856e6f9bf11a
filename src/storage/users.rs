//! Read side of the account tables: recipients and alert subscribers.
//!
//! The account layer owns these rows. The write helpers at the bottom exist
//! for imports and fixtures.

use super::Store;
use crate::error::Result;
use crate::types::{Channel, Recipient, Subscriber};

/// Per-user notification switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub weekly_digest: bool,
    pub high_confidence_alerts: bool,
    pub event_start_alerts: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            email_enabled: true,
            push_enabled: true,
            weekly_digest: true,
            high_confidence_alerts: true,
            event_start_alerts: true,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    user_id: i64,
    tier: String,
    email_ok: bool,
    push_ok: bool,
}

/// Users without a preferences row get the defaults (everything on). Email
/// only counts as a channel when an address is on file.
const SUBSCRIBER_SELECT: &str = "
    SELECT u.id AS user_id, u.tier AS tier,
           (u.email IS NOT NULL AND COALESCE(p.email_enabled, 1) = 1) AS email_ok,
           (COALESCE(p.push_enabled, 1) = 1) AS push_ok
    FROM users u LEFT JOIN notification_preferences p ON p.user_id = u.id
    WHERE u.active = 1";

fn into_subscribers(rows: Vec<SubscriberRow>) -> Vec<Subscriber> {
    rows.into_iter()
        .filter_map(|row| {
            Channel::from_preferences(row.email_ok, row.push_ok).map(|channel| Subscriber {
                user_id: row.user_id,
                tier: row.tier,
                channel,
            })
        })
        .collect()
}

impl Store {
    /// Delivery addresses for a user, or `None` if the user is unknown or inactive.
    pub async fn recipient(&self, user_id: i64) -> Result<Option<Recipient>> {
        let email: Option<(Option<String>,)> =
            sqlx::query_as("SELECT email FROM users WHERE id = ? AND active = 1")
                .bind(user_id)
                .fetch_optional(self.pool())
                .await?;
        let Some((email,)) = email else {
            return Ok(None);
        };

        let tokens: Vec<(String,)> = sqlx::query_as(
            "SELECT push_token FROM user_devices WHERE user_id = ? AND active = 1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(Some(Recipient {
            user_id,
            email,
            push_tokens: tokens.into_iter().map(|(t,)| t).collect(),
        }))
    }

    pub async fn digest_subscribers(&self) -> Result<Vec<Subscriber>> {
        let rows: Vec<SubscriberRow> = sqlx::query_as(&format!(
            "{SUBSCRIBER_SELECT} AND COALESCE(p.weekly_digest, 1) = 1 ORDER BY u.id"
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(into_subscribers(rows))
    }

    /// High-confidence subscribers whose tier is one of `tiers` (case-insensitive).
    pub async fn high_confidence_subscribers(&self, tiers: &[String]) -> Result<Vec<Subscriber>> {
        let rows: Vec<SubscriberRow> = sqlx::query_as(&format!(
            "{SUBSCRIBER_SELECT} AND COALESCE(p.high_confidence_alerts, 1) = 1 ORDER BY u.id"
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(into_subscribers(rows)
            .into_iter()
            .filter(|s| tiers.iter().any(|t| t.eq_ignore_ascii_case(&s.tier)))
            .collect())
    }

    /// Users who favourite either team and want event-start alerts.
    pub async fn favorite_subscribers(&self, home: &str, away: &str) -> Result<Vec<Subscriber>> {
        let rows: Vec<SubscriberRow> = sqlx::query_as(&format!(
            "{SUBSCRIBER_SELECT} AND COALESCE(p.event_start_alerts, 1) = 1 \
             AND EXISTS (SELECT 1 FROM user_favorites f WHERE f.user_id = u.id AND f.team IN (?, ?)) \
             ORDER BY u.id"
        ))
        .bind(home)
        .bind(away)
        .fetch_all(self.pool())
        .await?;
        Ok(into_subscribers(rows))
    }

    // -- account-layer writes ------------------------------------------------

    pub async fn insert_user(&self, email: Option<&str>, tier: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO users (email, tier, active) VALUES (?, ?, 1)")
            .bind(email)
            .bind(tier)
            .execute(self.pool())
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_preferences(&self, user_id: i64, prefs: Preferences) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_preferences (user_id, email_enabled, push_enabled, weekly_digest, \
             high_confidence_alerts, event_start_alerts) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET email_enabled = excluded.email_enabled, \
             push_enabled = excluded.push_enabled, weekly_digest = excluded.weekly_digest, \
             high_confidence_alerts = excluded.high_confidence_alerts, \
             event_start_alerts = excluded.event_start_alerts",
        )
        .bind(user_id)
        .bind(prefs.email_enabled)
        .bind(prefs.push_enabled)
        .bind(prefs.weekly_digest)
        .bind(prefs.high_confidence_alerts)
        .bind(prefs.event_start_alerts)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn add_favorite(&self, user_id: i64, team: &str) -> Result<()> {
        sqlx::query("INSERT INTO user_favorites (user_id, team) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(team)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn add_device(&self, user_id: i64, push_token: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_devices (user_id, push_token, active) VALUES (?, ?, 1) \
             ON CONFLICT (push_token) DO UPDATE SET user_id = excluded.user_id, active = 1",
        )
        .bind(user_id)
        .bind(push_token)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_store;

    #[tokio::test]
    async fn test_recipient_collects_active_tokens() {
        let store = test_store().await;
        let id = store.insert_user(Some("fan@example.com"), "pro").await.unwrap();
        store.add_device(id, "ExponentPushToken[a]").await.unwrap();
        store.add_device(id, "ExponentPushToken[b]").await.unwrap();

        let recipient = store.recipient(id).await.unwrap().unwrap();
        assert_eq!(recipient.email.as_deref(), Some("fan@example.com"));
        assert_eq!(recipient.push_tokens.len(), 2);
        assert!(store.recipient(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_follows_preferences_and_address() {
        let store = test_store().await;
        let both = store.insert_user(Some("a@example.com"), "pro").await.unwrap();
        let no_email = store.insert_user(None, "pro").await.unwrap();
        let muted = store.insert_user(Some("c@example.com"), "pro").await.unwrap();
        store
            .set_preferences(
                muted,
                Preferences {
                    email_enabled: false,
                    push_enabled: false,
                    ..Preferences::default()
                },
            )
            .await
            .unwrap();

        let subs = store.digest_subscribers().await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].user_id, both);
        assert_eq!(subs[0].channel, Channel::Both);
        assert_eq!(subs[1].user_id, no_email);
        assert_eq!(subs[1].channel, Channel::Push);
    }

    #[tokio::test]
    async fn test_high_confidence_filters_tiers() {
        let store = test_store().await;
        let free = store.insert_user(Some("f@example.com"), "free").await.unwrap();
        let premium = store.insert_user(Some("p@example.com"), "Premium").await.unwrap();

        let subs = store
            .high_confidence_subscribers(&["premium".to_string(), "pro".to_string()])
            .await
            .unwrap();
        let ids: Vec<i64> = subs.iter().map(|s| s.user_id).collect();
        assert_eq!(ids, vec![premium]);
        assert!(!ids.contains(&free));
    }

    #[tokio::test]
    async fn test_favorite_subscribers_match_either_team() {
        let store = test_store().await;
        let kc_fan = store.insert_user(Some("kc@example.com"), "free").await.unwrap();
        let buf_fan = store.insert_user(Some("buf@example.com"), "free").await.unwrap();
        let other = store.insert_user(Some("x@example.com"), "free").await.unwrap();
        store.add_favorite(kc_fan, "KC").await.unwrap();
        store.add_favorite(buf_fan, "BUF").await.unwrap();
        store.add_favorite(other, "DAL").await.unwrap();

        let subs = store.favorite_subscribers("KC", "BUF").await.unwrap();
        let ids: Vec<i64> = subs.iter().map(|s| s.user_id).collect();
        assert_eq!(ids, vec![kc_fan, buf_fan]);
    }
}
