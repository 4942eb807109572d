//! Outstanding outbound sends waiting for a delivery or read confirmation.
//!
//! Confirmations arrive asynchronously and out of order, so the table is a map
//! indexed by recipient and then by outbound message id. Delivery receipts
//! confirm an explicit batch of ids; read receipts confirm everything sent at
//! or before a watermark.

use crate::errors::RelayError;
use crate::events::MessagingEvent;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which confirmations a sender wants to wait for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitFor {
    pub delivery: bool,
    pub read: bool,
}

impl WaitFor {
    pub const DELIVERY: Self = Self {
        delivery: true,
        read: false,
    };
    pub const READ: Self = Self {
        delivery: false,
        read: true,
    };

    pub fn is_any(self) -> bool {
        self.delivery || self.read
    }
}

/// One outbound send awaiting confirmation. Owns the sending half of the
/// completion handle; the receiving half goes back to whoever sent the message.
#[derive(Debug)]
pub struct PendingAck {
    pub recipient_id: String,
    pub outbound_message_id: String,
    pub sent_at: DateTime<Utc>,
    pub wait: WaitFor,
    completion: oneshot::Sender<MessagingEvent>,
}

/// Snapshot of a `PendingAck` without its completion handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub recipient_id: String,
    pub outbound_message_id: String,
    pub sent_at: DateTime<Utc>,
    pub wait: WaitFor,
}

impl PendingAck {
    pub fn new(
        recipient_id: impl Into<String>,
        outbound_message_id: impl Into<String>,
        sent_at: DateTime<Utc>,
        wait: WaitFor,
    ) -> (Self, oneshot::Receiver<MessagingEvent>) {
        let (tx, rx) = oneshot::channel();
        let ack = Self {
            recipient_id: recipient_id.into(),
            outbound_message_id: outbound_message_id.into(),
            sent_at,
            wait,
            completion: tx,
        };
        (ack, rx)
    }

    pub fn record(&self) -> AckRecord {
        AckRecord {
            recipient_id: self.recipient_id.clone(),
            outbound_message_id: self.outbound_message_id.clone(),
            sent_at: self.sent_at,
            wait: self.wait,
        }
    }

    /// Consumes the ack, so a handle can only ever be completed once.
    fn complete(self, event: &MessagingEvent) -> AckRecord {
        let record = self.record();
        if self.completion.send(event.clone()).is_err() {
            debug!(
                "ack waiter for {} already gone, confirmation dropped",
                record.outbound_message_id
            );
        }
        record
    }
}

/// recipient id -> outbound message id -> ack
type AckIndex = HashMap<String, HashMap<String, PendingAck>>;

#[derive(Default)]
pub struct PendingAckTable {
    entries: Mutex<AckIndex>,
}

impl PendingAckTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AckIndex> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails with `DuplicateKey` if the (recipient, message id) pair is already
    /// pending; the rejected ack is dropped, closing its handle.
    pub fn register(&self, ack: PendingAck) -> Result<(), RelayError> {
        let mut entries = self.lock();
        let by_message = entries.entry(ack.recipient_id.clone()).or_default();
        match by_message.entry(ack.outbound_message_id.clone()) {
            Entry::Occupied(_) => Err(RelayError::DuplicateKey {
                recipient_id: ack.recipient_id,
                message_id: ack.outbound_message_id,
            }),
            Entry::Vacant(slot) => {
                debug!(
                    "registered pending ack: recipient={}, mid={}, delivery={}, read={}",
                    ack.recipient_id, ack.outbound_message_id, ack.wait.delivery, ack.wait.read
                );
                slot.insert(ack);
                Ok(())
            }
        }
    }

    /// Resolve every delivery-waiting ack for `sender_id` whose message id is in
    /// `confirmed_ids`, completing each handle with `event`.
    pub fn resolve_delivery(
        &self,
        sender_id: &str,
        confirmed_ids: &[String],
        event: &MessagingEvent,
    ) -> Vec<AckRecord> {
        let resolved = self.take_matching(sender_id, |ack| {
            ack.wait.delivery && confirmed_ids.contains(&ack.outbound_message_id)
        });
        resolved.into_iter().map(|ack| ack.complete(event)).collect()
    }

    /// Resolve every read-waiting ack for `sender_id` sent at or before `watermark`.
    pub fn resolve_read(
        &self,
        sender_id: &str,
        watermark: DateTime<Utc>,
        event: &MessagingEvent,
    ) -> Vec<AckRecord> {
        let resolved =
            self.take_matching(sender_id, |ack| ack.wait.read && ack.sent_at <= watermark);
        resolved.into_iter().map(|ack| ack.complete(event)).collect()
    }

    fn take_matching(
        &self,
        recipient_id: &str,
        matches: impl Fn(&PendingAck) -> bool,
    ) -> Vec<PendingAck> {
        let mut entries = self.lock();
        let Some(by_message) = entries.get_mut(recipient_id) else {
            return Vec::new();
        };

        let keys: Vec<String> = by_message
            .iter()
            .filter(|(_, ack)| matches(ack))
            .map(|(mid, _)| mid.clone())
            .collect();
        let taken: Vec<PendingAck> = keys
            .iter()
            .filter_map(|mid| by_message.remove(mid))
            .collect();

        if by_message.is_empty() {
            entries.remove(recipient_id);
        }
        taken
    }

    /// Remove and return acks sent more than `max_age` before `now`. Their
    /// handles are handed back uncompleted.
    pub fn expire(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<PendingAck> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut entries = self.lock();
        let mut expired = Vec::new();

        entries.retain(|_, by_message| {
            let stale: Vec<String> = by_message
                .iter()
                .filter(|(_, ack)| now.signed_duration_since(ack.sent_at) > max_age)
                .map(|(mid, _)| mid.clone())
                .collect();
            expired.extend(stale.iter().filter_map(|mid| by_message.remove(mid)));
            !by_message.is_empty()
        });
        expired
    }

    pub fn contains(&self, recipient_id: &str, outbound_message_id: &str) -> bool {
        self.lock()
            .get(recipient_id)
            .is_some_and(|m| m.contains_key(outbound_message_id))
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Periodically expire stale acks. Dropping an expired ack closes its handle,
/// so a waiter sees the confirmation as abandoned.
pub fn spawn_expiry_sweeper(
    table: Arc<PendingAckTable>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let expired = table.expire(Utc::now(), max_age);
            if expired.is_empty() {
                continue;
            }
            info!(
                "expired {} pending ack(s) older than {}s, {} still pending",
                expired.len(),
                max_age.as_secs(),
                table.len()
            );
            for ack in expired {
                warn!(
                    "ack never confirmed: recipient={}, mid={}, sent_at={}",
                    ack.recipient_id,
                    ack.outbound_message_id,
                    ack.sent_at.to_rfc3339()
                );
            }
        }
    })
}
