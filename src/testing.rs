//! In-memory collaborators for unit tests.

use crate::dedup::DedupCache;
use crate::errors::RelayError;
use crate::incoming::{IncomingProcessor, IncomingSettings};
use crate::outgoing::{Recipient, TextSender};
use crate::pending::PendingAckTable;
use crate::profile::{Profile, ProfileResolver};
use crate::refstore::RefStore;
use crate::sink::{InboundSink, NormalizedEvent};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Resolves every id to a fixed profile, failing for one chosen id.
#[derive(Default)]
pub(crate) struct StaticProfiles {
    pub fail_for: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ProfileResolver for StaticProfiles {
    async fn get_or_fetch_profile(&self, user_id: &str) -> anyhow::Result<Profile> {
        self.calls.lock().unwrap().push(user_id.to_string());
        if self.fail_for.as_deref() == Some(user_id) {
            anyhow::bail!("graph unavailable");
        }
        let mut profile = Profile::with_id(user_id);
        profile.first_name = Some("Ada".to_string());
        Ok(profile)
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    pub fail: bool,
    pub events: Mutex<Vec<NormalizedEvent>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<NormalizedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl InboundSink for RecordingSink {
    async fn publish(&self, event: NormalizedEvent) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("middleware down");
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryRefs {
    pub refs: Mutex<Vec<String>>,
}

#[async_trait]
impl RefStore for MemoryRefs {
    async fn save_ref(&self, ref_id: &str) -> anyhow::Result<()> {
        self.refs.lock().unwrap().push(ref_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSender {
    pub sent: Mutex<Vec<(Recipient, String)>>,
}

#[async_trait]
impl TextSender for RecordingSender {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<String, RelayError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.clone(), text.to_string()));
        Ok(format!("m_out_{}", sent.len()))
    }
}

/// A processor wired to in-memory collaborators, with handles kept for
/// assertions.
pub(crate) struct Harness {
    pub processor: Arc<IncomingProcessor>,
    pub pending: Arc<PendingAckTable>,
    pub profiles: Arc<StaticProfiles>,
    pub sink: Arc<RecordingSink>,
    pub refs: Arc<MemoryRefs>,
    pub sender: Arc<RecordingSender>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(IncomingSettings::default(), false, None)
    }

    pub fn with(settings: IncomingSettings, sink_fails: bool, fail_profile: Option<&str>) -> Self {
        let pending = Arc::new(PendingAckTable::new());
        let profiles = Arc::new(StaticProfiles {
            fail_for: fail_profile.map(str::to_string),
            calls: Mutex::new(Vec::new()),
        });
        let sink = Arc::new(RecordingSink {
            fail: sink_fails,
            events: Mutex::new(Vec::new()),
        });
        let refs = Arc::new(MemoryRefs::default());
        let sender = Arc::new(RecordingSender::default());
        let processor = Arc::new(IncomingProcessor::new(
            Arc::new(DedupCache::new(100, Duration::from_secs(3600))),
            pending.clone(),
            profiles.clone(),
            sink.clone(),
            refs.clone(),
            sender.clone(),
            settings,
        ));
        Self {
            processor,
            pending,
            profiles,
            sink,
            refs,
            sender,
        }
    }

    pub fn published(&self) -> Vec<NormalizedEvent> {
        self.sink.published()
    }
}
