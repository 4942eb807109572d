//! Inbound event handling: dedup, ack correlation, normalization, forwarding.
//!
//! Each event is handled independently. A failure on one event (profile
//! lookup, sink publish, ref store) never touches dedup or pending-ack state
//! already changed, and never affects other events.

use crate::config::{AutoResponseOption, MessengerConfig};
use crate::dedup::DedupCache;
use crate::errors::RelayError;
use crate::events::{EventKind, InboundEvent, MessagingEvent, WebhookPayload, millis_to_utc};
use crate::outgoing::{Recipient, TextSender};
use crate::pending::PendingAckTable;
use crate::profile::{Profile, ProfileResolver};
use crate::refstore::RefStore;
use crate::sink::{InboundSink, NormalizedEvent};
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const GET_STARTED_PAYLOAD: &str = "GET_STARTED";

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Sent to the sink; `published` of `records` succeeded.
    Forwarded { records: usize, published: usize },
    /// Already seen within the dedup window.
    Duplicate,
    /// Checkbox opt-in stored as a reference id instead of forwarded.
    Diverted,
    /// Echoes and unsupported event types.
    Skipped,
}

/// Behavior when a user taps the get-started button.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GetStarted {
    #[default]
    Nothing,
    ReplyText(String),
    InjectPostback(String),
}

#[derive(Debug, Clone)]
pub struct IncomingSettings {
    pub optin_ack_text: String,
    pub get_started: GetStarted,
}

impl From<&MessengerConfig> for IncomingSettings {
    fn from(config: &MessengerConfig) -> Self {
        let get_started = match config.auto_response_option {
            _ if !config.display_get_started => GetStarted::Nothing,
            AutoResponseOption::None => GetStarted::Nothing,
            AutoResponseOption::AutoResponseText => {
                GetStarted::ReplyText(config.auto_response_text.clone())
            }
            AutoResponseOption::AutoResponsePostback => {
                GetStarted::InjectPostback(config.auto_response_postback.clone())
            }
        };
        Self {
            optin_ack_text: config.optin_ack_text.clone(),
            get_started,
        }
    }
}

impl Default for IncomingSettings {
    fn default() -> Self {
        Self::from(&MessengerConfig::default())
    }
}

pub struct IncomingProcessor {
    dedup: Arc<DedupCache>,
    pending: Arc<PendingAckTable>,
    profiles: Arc<dyn ProfileResolver>,
    sink: Arc<dyn InboundSink>,
    refs: Arc<dyn RefStore>,
    replies: Arc<dyn TextSender>,
    settings: IncomingSettings,
}

impl IncomingProcessor {
    pub fn new(
        dedup: Arc<DedupCache>,
        pending: Arc<PendingAckTable>,
        profiles: Arc<dyn ProfileResolver>,
        sink: Arc<dyn InboundSink>,
        refs: Arc<dyn RefStore>,
        replies: Arc<dyn TextSender>,
        settings: IncomingSettings,
    ) -> Self {
        Self {
            dedup,
            pending,
            profiles,
            sink,
            refs,
            replies,
            settings,
        }
    }

    /// Handle every event in a webhook body, each on its own task. Results
    /// come back in event order once all of them finish.
    pub async fn process_payload(
        self: Arc<Self>,
        payload: WebhookPayload,
    ) -> Vec<Result<Outcome, RelayError>> {
        let events = payload.into_events();
        debug!("dispatching {} event(s)", events.len());
        let tasks = events.into_iter().map(|event| {
            let processor = self.clone();
            tokio::spawn(async move { processor.handle(event).await })
        });
        let results: Vec<Result<Outcome, RelayError>> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(RelayError::Internal(anyhow::anyhow!(
                        "event task failed: {}",
                        e
                    )))
                })
            })
            .collect();
        for result in &results {
            if let Err(e) = result {
                warn!("inbound event failed: {}", e);
            }
        }
        results
    }

    pub async fn handle(&self, raw: MessagingEvent) -> Result<Outcome, RelayError> {
        let event = InboundEvent::classify(raw);

        match event.kind() {
            EventKind::Echo | EventKind::Unsupported => {
                debug!("skipping {} event", event.kind().name());
                return Ok(Outcome::Skipped);
            }
            EventKind::Optin {
                user_ref: Some(user_ref),
                ..
            } => return self.divert_optin(&event, user_ref).await,
            EventKind::Delivery { mids, .. } => self.resolve_delivery(&event, mids),
            EventKind::Read { watermark } => self.resolve_read(&event, *watermark),
            _ => {}
        }

        if let Some(mid) = event.message_id()
            && self.dedup.seen(mid)
        {
            debug!("ignoring duplicate {} mid={}", event.kind().name(), mid);
            return Ok(Outcome::Duplicate);
        }

        let sender_id = event.sender_id().ok_or_else(|| {
            RelayError::ProfileResolution(format!("{} event has no sender", event.kind().name()))
        })?;
        let profile = self
            .profiles
            .get_or_fetch_profile(sender_id)
            .await
            .map_err(|e| RelayError::ProfileResolution(format!("{}: {:#}", sender_id, e)))?;

        let mut records = normalize(&event, &profile);
        if let EventKind::Postback { payload } = event.kind()
            && payload == GET_STARTED_PAYLOAD
        {
            match &self.settings.get_started {
                GetStarted::Nothing => {}
                GetStarted::ReplyText(text) => {
                    self.reply(&Recipient::Id(profile.id.clone()), text).await;
                }
                GetStarted::InjectPostback(postback) => {
                    records.push(NormalizedEvent::new(
                        "postback",
                        &profile,
                        postback.clone(),
                        raw_json(event.raw()),
                    ));
                }
            }
        }

        let total = records.len();
        let mut published = 0;
        for record in records {
            let kind = record.kind.clone();
            match self.sink.publish(record).await {
                Ok(()) => published += 1,
                Err(e) => {
                    // Best effort: logged, not retried, state changes stand
                    let err = RelayError::SinkPublish(format!("{:#}", e));
                    warn!("{} for {} from {}", err, kind, sender_id);
                }
            }
        }

        Ok(Outcome::Forwarded {
            records: total,
            published,
        })
    }

    fn resolve_delivery(&self, event: &InboundEvent, mids: &[String]) {
        let Some(sender_id) = event.sender_id() else {
            return;
        };
        let resolved = self.pending.resolve_delivery(sender_id, mids, event.raw());
        if !resolved.is_empty() {
            info!(
                "delivery from {} confirmed {} pending message(s)",
                sender_id,
                resolved.len()
            );
        }
    }

    fn resolve_read(&self, event: &InboundEvent, watermark: i64) {
        let Some(sender_id) = event.sender_id() else {
            return;
        };
        let Some(watermark) = millis_to_utc(watermark) else {
            warn!("read receipt from {} has invalid watermark", sender_id);
            return;
        };
        let resolved = self.pending.resolve_read(sender_id, watermark, event.raw());
        if !resolved.is_empty() {
            info!(
                "read receipt from {} confirmed {} pending message(s)",
                sender_id,
                resolved.len()
            );
        }
    }

    async fn divert_optin(
        &self,
        event: &InboundEvent,
        user_ref: &str,
    ) -> Result<Outcome, RelayError> {
        self.refs.save_ref(user_ref).await?;
        info!("stored checkbox opt-in ref {}", user_ref);

        let recipient = match event.sender_id() {
            Some(id) => Recipient::Id(id.to_string()),
            None => Recipient::UserRef(user_ref.to_string()),
        };
        self.reply(&recipient, &self.settings.optin_ack_text).await;
        Ok(Outcome::Diverted)
    }

    async fn reply(&self, recipient: &Recipient, text: &str) {
        if let Err(e) = self.replies.send_text(recipient, text).await {
            warn!("failed to reply to {}: {}", recipient.as_str(), e);
        }
    }
}

/// Map a classified event to the records the middleware sees. Attachments
/// expand to a summary record plus one record per attachment.
pub fn normalize(event: &InboundEvent, profile: &Profile) -> Vec<NormalizedEvent> {
    let raw = raw_json(event.raw());
    let record = |kind: &str, text: String| NormalizedEvent::new(kind, profile, text, raw.clone());

    match event.kind() {
        EventKind::Message { text } => vec![record("message", text.clone())],
        EventKind::Attachment { attachments } => {
            let mut records = Vec::with_capacity(attachments.len() + 1);
            records.push(record(
                "attachments",
                format!("{} attachments", attachments.len()),
            ));
            for attachment in attachments {
                let text = attachment
                    .url()
                    .map_or_else(|| attachment.payload.to_string(), ToString::to_string);
                let raw = serde_json::to_value(attachment).unwrap_or(Value::Null);
                records.push(NormalizedEvent::new(
                    attachment.kind.as_str(),
                    profile,
                    text,
                    raw,
                ));
            }
            records
        }
        EventKind::QuickReply { payload } => vec![record("quick_reply", payload.clone())],
        EventKind::Postback { payload } => vec![record("postback", payload.clone())],
        EventKind::Delivery { watermark, .. } => vec![record("delivery", watermark.to_string())],
        EventKind::Read { watermark } => vec![record("read", watermark.to_string())],
        EventKind::AccountLinking { authorization_code } => vec![record(
            "account_linking",
            authorization_code.clone().unwrap_or_default(),
        )],
        EventKind::Optin { reference, .. } => {
            vec![record("optin", reference.clone().unwrap_or_default())]
        }
        EventKind::Referral { reference } => {
            vec![record("referral", reference.clone().unwrap_or_default())]
        }
        EventKind::Payment(payment) => {
            let mut payment_record = record("payment", "payment".to_string());
            payment_record.payment = Some(payment.clone());
            vec![payment_record]
        }
        EventKind::Echo | EventKind::Unsupported => Vec::new(),
    }
}

fn raw_json(raw: &MessagingEvent) -> Value {
    serde_json::to_value(raw).unwrap_or(Value::Null)
}
