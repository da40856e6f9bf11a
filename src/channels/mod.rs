//! Delivery channels.
//!
//! Each adapter delivers one rendered payload to one recipient and reports
//! success or a `Delivery` error. Adapters never touch the queue; the
//! dispatcher records outcomes.

pub mod dry_run;
pub mod email;
pub mod push;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Channel, NotificationPayload, Recipient};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    async fn send(&self, recipient: &Recipient, payload: &NotificationPayload) -> Result<()>;
}

/// One adapter per concrete channel.
#[derive(Clone)]
pub struct ChannelSet {
    pub email: Arc<dyn ChannelAdapter>,
    pub push: Arc<dyn ChannelAdapter>,
}

impl ChannelSet {
    pub fn new(email: Arc<dyn ChannelAdapter>, push: Arc<dyn ChannelAdapter>) -> Self {
        Self { email, push }
    }

    /// Both channels log instead of sending.
    pub fn dry_run() -> Self {
        Self {
            email: Arc::new(dry_run::DryRunChannel::new(Channel::Email)),
            push: Arc::new(dry_run::DryRunChannel::new(Channel::Push)),
        }
    }

    /// Adapter for a concrete channel. `Both` is expanded by the caller via
    /// [`Channel::targets`]; asking for it here yields the email adapter.
    pub fn adapter(&self, channel: Channel) -> &Arc<dyn ChannelAdapter> {
        match channel {
            Channel::Push => &self.push,
            Channel::Email | Channel::Both => &self.email,
        }
    }
}
