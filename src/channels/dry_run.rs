//! Logging adapter used when a channel has no credentials configured.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use super::ChannelAdapter;
use crate::error::Result;
use crate::types::{Channel, NotificationPayload, Recipient};

pub struct DryRunChannel {
    channel: Channel,
    name: String,
    delivered: AtomicU64,
}

impl DryRunChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            name: format!("dry-run-{channel}"),
            delivered: AtomicU64::new(0),
        }
    }

    /// Messages "delivered" so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChannelAdapter for DryRunChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, recipient: &Recipient, payload: &NotificationPayload) -> Result<()> {
        info!(
            channel = %self.channel,
            user_id = recipient.user_id,
            title = %payload.title,
            "[DRY RUN] Notification not sent"
        );
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
