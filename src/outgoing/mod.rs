//! Outbound Send API path.
//!
//! `Outgoing::send` delivers a message and, when asked to wait for delivery or
//! read confirmation, registers a `PendingAck` so the inbound side can resolve
//! it when the matching receipt arrives.

use crate::errors::RelayError;
use crate::events::MessagingEvent;
use crate::pending::{PendingAck, PendingAckTable, WaitFor};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// Page-scoped user id.
    Id(String),
    /// Checkbox plugin reference; only valid for the first message.
    UserRef(String),
}

impl Recipient {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Id(id) | Self::UserRef(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Text(String),
    /// A raw Send API `message` object (attachments, templates, quick replies).
    Payload(Value),
}

impl OutgoingMessage {
    fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => serde_json::json!({ "text": text }),
            Self::Payload(payload) => payload.clone(),
        }
    }
}

/// Send API response body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendReceipt {
    #[serde(default)]
    pub recipient_id: String,
    pub message_id: String,
}

#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn send_message(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
    ) -> Result<SendReceipt, RelayError>;
}

/// Thin client for `POST /me/messages`.
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    pub fn new(base_url: &str, access_token: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }
}

#[async_trait]
impl MessageApi for GraphClient {
    async fn send_message(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
    ) -> Result<SendReceipt, RelayError> {
        let body = serde_json::json!({
            "recipient": recipient,
            "message": message.to_json(),
        });
        let response = self
            .client
            .post(format!("{}/me/messages", self.base_url))
            .query(&[("access_token", self.access_token.as_str())])
            .json(&body)
            .send()
            .await
            .context("Send API request failed")?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(RelayError::Platform {
                status: status.as_u16(),
                message,
            });
        }

        let receipt: SendReceipt = response
            .json()
            .await
            .context("invalid Send API response")?;
        Ok(receipt)
    }
}

#[derive(Debug, PartialEq)]
pub enum ConfirmationOutcome {
    Confirmed(Box<MessagingEvent>),
    TimedOut,
    /// The pending entry was expired and its handle dropped.
    Abandoned,
}

/// Receiving half of a pending ack. The table never cancels it; callers
/// bound the wait themselves with `wait`.
#[derive(Debug)]
pub struct Confirmation(oneshot::Receiver<MessagingEvent>);

impl Confirmation {
    pub async fn wait(self, timeout: Duration) -> ConfirmationOutcome {
        match tokio::time::timeout(timeout, self.0).await {
            Ok(Ok(event)) => ConfirmationOutcome::Confirmed(Box::new(event)),
            Ok(Err(_)) => ConfirmationOutcome::Abandoned,
            Err(_) => ConfirmationOutcome::TimedOut,
        }
    }
}

#[derive(Debug)]
pub struct SentMessage {
    pub message_id: String,
    pub confirmation: Option<Confirmation>,
}

/// Replies that don't need confirmation tracking, such as opt-in
/// acknowledgements and get-started auto responses.
#[async_trait]
pub trait TextSender: Send + Sync {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<String, RelayError>;
}

pub struct Outgoing {
    api: Arc<dyn MessageApi>,
    pending: Arc<PendingAckTable>,
}

impl Outgoing {
    pub fn new(api: Arc<dyn MessageApi>, pending: Arc<PendingAckTable>) -> Self {
        Self { api, pending }
    }

    pub async fn send(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
        wait: WaitFor,
    ) -> Result<SentMessage, RelayError> {
        // Taken before the call so a read watermark for this message is never
        // earlier than its sent_at.
        let sent_at = Utc::now();
        let receipt = self.api.send_message(recipient, message).await?;
        debug!(
            "sent message {} to {}",
            receipt.message_id,
            recipient.as_str()
        );

        if !wait.is_any() {
            return Ok(SentMessage {
                message_id: receipt.message_id,
                confirmation: None,
            });
        }

        // Receipts are keyed by the page-scoped id, which a user_ref send only
        // learns from the response.
        let recipient_id = if receipt.recipient_id.is_empty() {
            recipient.as_str().to_string()
        } else {
            receipt.recipient_id.clone()
        };
        let (ack, rx) = PendingAck::new(recipient_id, receipt.message_id.clone(), sent_at, wait);
        if let Err(e) = self.pending.register(ack) {
            warn!("could not track confirmation: {}", e);
            return Err(e);
        }

        Ok(SentMessage {
            message_id: receipt.message_id,
            confirmation: Some(Confirmation(rx)),
        })
    }
}

#[async_trait]
impl TextSender for Outgoing {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<String, RelayError> {
        let sent = self
            .send(
                recipient,
                &OutgoingMessage::Text(text.to_string()),
                WaitFor::default(),
            )
            .await?;
        Ok(sent.message_id)
    }
}

#[cfg(test)]
mod tests;
