//! Messenger webhook wire types and inbound event classification.
//!
//! The shapes here follow the platform's webhook contract; unknown fields are
//! ignored and most fields are optional so a partially populated event still
//! parses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Top-level webhook body: `{"object":"page","entry":[...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

impl WebhookPayload {
    /// All messaging events across entries, in delivery order.
    ///
    /// Items are decoded one at a time; an item that does not fit
    /// [`MessagingEvent`] is logged and dropped without affecting the rest.
    pub fn into_events(self) -> Vec<MessagingEvent> {
        self.entry
            .into_iter()
            .flat_map(|e| e.messaging)
            .filter_map(|item| match serde_json::from_value::<MessagingEvent>(item) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("skipping malformed messaging item: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub time: i64,
    /// Kept undecoded so one bad item cannot reject the whole body.
    #[serde(default)]
    pub messaging: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postback: Option<Postback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Read>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_linking: Option<AccountLinking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optin: Option<Optin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral: Option<Referral>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<Value>,
}

impl MessagingEvent {
    pub fn sender_id(&self) -> Option<&str> {
        self.sender.as_ref().map(|p| p.id.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_reply: Option<QuickReply>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_echo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Attachment {
    /// The attachment URL if the payload carries one.
    pub fn url(&self) -> Option<&str> {
        self.payload.get("url").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Postback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(default)]
    pub mids: Vec<String>,
    pub watermark: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Read {
    pub watermark: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLinking {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Optin {
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// What an inbound event is, with the tag-specific data pulled out.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Message { text: String },
    Attachment { attachments: Vec<Attachment> },
    QuickReply { payload: String },
    Postback { payload: String },
    Delivery { mids: Vec<String>, watermark: i64 },
    Read { watermark: i64 },
    AccountLinking { authorization_code: Option<String> },
    Optin {
        reference: Option<String>,
        user_ref: Option<String>,
    },
    Referral { reference: Option<String> },
    Payment(Value),
    /// Copy of a message the page itself sent.
    Echo,
    Unsupported,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Attachment { .. } => "attachment",
            Self::QuickReply { .. } => "quick_reply",
            Self::Postback { .. } => "postback",
            Self::Delivery { .. } => "delivery",
            Self::Read { .. } => "read",
            Self::AccountLinking { .. } => "account_linking",
            Self::Optin { .. } => "optin",
            Self::Referral { .. } => "referral",
            Self::Payment(_) => "payment",
            Self::Echo => "echo",
            Self::Unsupported => "unsupported",
        }
    }
}

/// A classified inbound event. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    kind: EventKind,
    raw: MessagingEvent,
}

impl InboundEvent {
    pub fn classify(raw: MessagingEvent) -> Self {
        let kind = classify_kind(&raw);
        Self { kind, raw }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn raw(&self) -> &MessagingEvent {
        &self.raw
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.raw.sender_id()
    }

    /// Platform message id, present for message-bearing events and for
    /// postbacks that carry one.
    pub fn message_id(&self) -> Option<&str> {
        let mid = match self.kind {
            EventKind::Message { .. }
            | EventKind::Attachment { .. }
            | EventKind::QuickReply { .. } => {
                self.raw.message.as_ref().and_then(|m| m.mid.as_deref())
            }
            EventKind::Postback { .. } => self.raw.postback.as_ref().and_then(|p| p.mid.as_deref()),
            _ => None,
        };
        mid.filter(|mid| !mid.is_empty())
    }
}

fn classify_kind(raw: &MessagingEvent) -> EventKind {
    if let Some(message) = &raw.message {
        if message.is_echo {
            return EventKind::Echo;
        }
        if let Some(quick_reply) = &message.quick_reply {
            return EventKind::QuickReply {
                payload: quick_reply.payload.clone(),
            };
        }
        if !message.attachments.is_empty() {
            return EventKind::Attachment {
                attachments: message.attachments.clone(),
            };
        }
        return EventKind::Message {
            text: message.text.clone().unwrap_or_default(),
        };
    }
    if let Some(postback) = &raw.postback {
        return EventKind::Postback {
            payload: postback.payload.clone(),
        };
    }
    if let Some(delivery) = &raw.delivery {
        return EventKind::Delivery {
            mids: delivery.mids.clone(),
            watermark: delivery.watermark,
        };
    }
    if let Some(read) = &raw.read {
        return EventKind::Read {
            watermark: read.watermark,
        };
    }
    if let Some(linking) = &raw.account_linking {
        return EventKind::AccountLinking {
            authorization_code: linking.authorization_code.clone(),
        };
    }
    if let Some(optin) = &raw.optin {
        return EventKind::Optin {
            reference: optin.reference.clone(),
            user_ref: optin.user_ref.clone().filter(|r| !r.is_empty()),
        };
    }
    if let Some(referral) = &raw.referral {
        return EventKind::Referral {
            reference: referral.reference.clone(),
        };
    }
    if let Some(payment) = &raw.payment {
        return EventKind::Payment(payment.clone());
    }
    EventKind::Unsupported
}

/// Convert a platform millisecond timestamp (watermarks, event times) to UTC.
pub fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
