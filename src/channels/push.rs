//! Expo push notifications.
//!
//! API: `POST https://exp.host/--/api/v2/push/send` with an array of
//! messages, at most 100 per request. The response carries one ticket per
//! message; a ticket with `status: "error"` counts as a failed delivery.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::ChannelAdapter;
use crate::error::{EngineError, Result};
use crate::types::{Channel, NotificationPayload, Recipient};

pub const DEFAULT_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";
const MAX_CHUNK: usize = 100;

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    sound: &'static str,
    priority: &'static str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    data: Vec<PushTicket>,
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct PushChannel {
    http: Client,
    endpoint: String,
    access_token: Option<SecretString>,
}

impl PushChannel {
    pub fn new(endpoint: &str, access_token: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pickline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Config(format!("push HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            access_token,
        })
    }

    async fn send_chunk(&self, messages: &[PushMessage<'_>]) -> Result<Vec<PushTicket>> {
        let mut req = self.http.post(&self.endpoint).json(messages);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::delivery(Channel::Push, e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::delivery(Channel::Push, format!("{status}: {body}")));
        }

        let parsed: PushResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::delivery(Channel::Push, format!("bad ticket body: {e}")))?;
        Ok(parsed.data)
    }
}

/// Expo tokens look like `ExponentPushToken[xxxx]` or `ExpoPushToken[xxxx]`.
pub fn is_push_token(token: &str) -> bool {
    (token.starts_with("ExponentPushToken[") || token.starts_with("ExpoPushToken["))
        && token.ends_with(']')
}

#[async_trait]
impl ChannelAdapter for PushChannel {
    fn name(&self) -> &str {
        "expo-push"
    }

    async fn send(&self, recipient: &Recipient, payload: &NotificationPayload) -> Result<()> {
        let tokens: Vec<&str> = recipient
            .push_tokens
            .iter()
            .map(String::as_str)
            .filter(|t| is_push_token(t))
            .collect();
        if tokens.is_empty() {
            return Err(EngineError::delivery(Channel::Push, "no valid push tokens"));
        }

        let messages: Vec<PushMessage<'_>> = tokens
            .iter()
            .map(|&to| PushMessage {
                to,
                title: &payload.title,
                body: &payload.body,
                data: &payload.data,
                sound: "default",
                priority: "high",
            })
            .collect();

        let mut first_error = None;
        for chunk in messages.chunks(MAX_CHUNK) {
            for ticket in self.send_chunk(chunk).await? {
                if ticket.status == "error" && first_error.is_none() {
                    first_error = Some(ticket.message.unwrap_or_else(|| "unknown ticket error".into()));
                }
            }
        }

        if let Some(reason) = first_error {
            warn!(user_id = recipient.user_id, reason = %reason, "Push ticket error");
            return Err(EngineError::delivery(Channel::Push, reason));
        }

        debug!(user_id = recipient.user_id, devices = tokens.len(), "Push accepted");
        Ok(())
    }
}
