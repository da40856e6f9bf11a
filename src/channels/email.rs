//! Transactional email over an HTTP mail-send API.
//!
//! Posts `{from, to, subject, text}` as JSON with a bearer key (Resend-style
//! endpoint by default). Any non-2xx response is a delivery failure.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::ChannelAdapter;
use crate::error::{EngineError, Result};
use crate::types::{Channel, NotificationPayload, Recipient};

pub const DEFAULT_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

pub struct EmailChannel {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    from: String,
}

impl EmailChannel {
    pub fn new(endpoint: &str, api_key: SecretString, from: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pickline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Config(format!("email HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl ChannelAdapter for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, recipient: &Recipient, payload: &NotificationPayload) -> Result<()> {
        let Some(to) = recipient.email.as_deref() else {
            return Err(EngineError::delivery(Channel::Email, "no email address on file"));
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&MailRequest {
                from: &self.from,
                to: [to],
                subject: &payload.title,
                text: &payload.body,
            })
            .send()
            .await
            .map_err(|e| EngineError::delivery(Channel::Email, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::delivery(Channel::Email, format!("{status}: {body}")));
        }

        debug!(user_id = recipient.user_id, "Email accepted");
        Ok(())
    }
}
