use crate::profile::Profile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const PLATFORM: &str = "facebook";
pub const DEFAULT_SINK_CAPACITY: usize = 1000;
/// Timeout for channel send operations to prevent indefinite blocking
/// when the consumer is slow or stalled.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Platform-neutral record handed to the downstream middleware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub platform: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub user: Profile,
    pub text: String,
    pub raw: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<Value>,
}

impl NormalizedEvent {
    pub fn new(kind: impl Into<String>, user: &Profile, text: impl Into<String>, raw: Value) -> Self {
        Self {
            platform: PLATFORM.to_string(),
            kind: kind.into(),
            user: user.clone(),
            text: text.into(),
            raw,
            payment: None,
        }
    }
}

#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn publish(&self, event: NormalizedEvent) -> Result<()>;
}

/// Sink backed by a bounded mpsc channel; the receiver is the middleware.
pub struct ChannelSink {
    tx: mpsc::Sender<NormalizedEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NormalizedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Default for ChannelSink {
    /// A sink whose receiver is dropped immediately; every publish fails.
    /// Only useful as a placeholder in tests and dry runs.
    fn default() -> Self {
        Self::new(DEFAULT_SINK_CAPACITY).0
    }
}

#[async_trait]
impl InboundSink for ChannelSink {
    async fn publish(&self, event: NormalizedEvent) -> Result<()> {
        let kind = event.kind.clone();
        let user_id = event.user.id.clone();
        tokio::time::timeout(SEND_TIMEOUT, self.tx.send(event))
            .await
            .map_err(|_| {
                warn!(
                    "sink publish timed out after {}s, middleware stalled",
                    SEND_TIMEOUT.as_secs()
                );
                anyhow::anyhow!("sink publish timed out, queue full")
            })?
            .context("Failed to publish inbound event - receiver closed")?;
        debug!("inbound event queued: type={}, user={}", kind, user_id);
        Ok(())
    }
}
