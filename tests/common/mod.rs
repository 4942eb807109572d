// Shared test helpers; not all items used by every test binary.
#![allow(unused)]

use async_trait::async_trait;
use fbrelay::dedup::DedupCache;
use fbrelay::errors::RelayError;
use fbrelay::events::MessagingEvent;
use fbrelay::incoming::{IncomingProcessor, IncomingSettings};
use fbrelay::outgoing::{MessageApi, Outgoing, OutgoingMessage, Recipient, SendReceipt};
use fbrelay::pending::PendingAckTable;
use fbrelay::profile::{Profile, ProfileResolver};
use fbrelay::refstore::SqliteRefStore;
use fbrelay::sink::{ChannelSink, NormalizedEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Send API stand-in that hands out `mid.<n>` ids and records every call.
#[derive(Default)]
pub struct MockMessageApi {
    counter: AtomicUsize,
    pub calls: Mutex<Vec<(Recipient, OutgoingMessage)>>,
}

#[async_trait]
impl MessageApi for MockMessageApi {
    async fn send_message(
        &self,
        recipient: &Recipient,
        message: &OutgoingMessage,
    ) -> Result<SendReceipt, RelayError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls
            .lock()
            .unwrap()
            .push((recipient.clone(), message.clone()));
        let recipient_id = match recipient {
            Recipient::Id(id) => id.clone(),
            Recipient::UserRef(_) => "PSID-from-ref".to_string(),
        };
        Ok(SendReceipt {
            recipient_id,
            message_id: format!("mid.{}", n),
        })
    }
}

/// Resolves any id to a profile with that id; counts lookups.
#[derive(Default)]
pub struct CountingProfiles {
    pub lookups: AtomicUsize,
}

#[async_trait]
impl ProfileResolver for CountingProfiles {
    async fn get_or_fetch_profile(&self, user_id: &str) -> anyhow::Result<Profile> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent handlers actually interleave
        tokio::task::yield_now().await;
        Ok(Profile::with_id(user_id))
    }
}

pub struct Relay {
    pub processor: Arc<IncomingProcessor>,
    pub outgoing: Arc<Outgoing>,
    pub pending: Arc<PendingAckTable>,
    pub api: Arc<MockMessageApi>,
    pub profiles: Arc<CountingProfiles>,
    pub refs: Arc<SqliteRefStore>,
    pub events: mpsc::Receiver<NormalizedEvent>,
}

/// Full inbound/outbound wiring with an in-memory ref store and a channel sink.
pub fn relay(settings: IncomingSettings) -> Relay {
    let pending = Arc::new(PendingAckTable::new());
    let api = Arc::new(MockMessageApi::default());
    let outgoing = Arc::new(Outgoing::new(api.clone(), pending.clone()));
    let profiles = Arc::new(CountingProfiles::default());
    let refs = Arc::new(SqliteRefStore::in_memory().expect("in-memory sqlite"));
    let (sink, events) = ChannelSink::new(256);

    let processor = Arc::new(IncomingProcessor::new(
        Arc::new(DedupCache::new(10_000, Duration::from_secs(3600))),
        pending.clone(),
        profiles.clone(),
        Arc::new(sink),
        refs.clone(),
        outgoing.clone(),
        settings,
    ));

    Relay {
        processor,
        outgoing,
        pending,
        api,
        profiles,
        refs,
        events,
    }
}

pub fn event(value: serde_json::Value) -> MessagingEvent {
    serde_json::from_value(value).expect("valid messaging event")
}

pub fn delivery(sender: &str, mids: &[&str], watermark: i64) -> MessagingEvent {
    event(serde_json::json!({
        "sender": {"id": sender},
        "recipient": {"id": "PAGE"},
        "delivery": {"mids": mids, "watermark": watermark}
    }))
}

pub fn read(sender: &str, watermark: i64) -> MessagingEvent {
    event(serde_json::json!({
        "sender": {"id": sender},
        "recipient": {"id": "PAGE"},
        "read": {"watermark": watermark}
    }))
}

pub fn text(sender: &str, mid: &str, body: &str) -> MessagingEvent {
    event(serde_json::json!({
        "sender": {"id": sender},
        "recipient": {"id": "PAGE"},
        "message": {"mid": mid, "text": body}
    }))
}
