//! Inbound message deduplication.
//!
//! The platform redelivers webhook events it believes were not acknowledged,
//! so the same `mid` can arrive more than once, sometimes concurrently.
//! `DedupCache` remembers recently seen message ids for a bounded time and
//! a bounded count.
//!
//! This is a best-effort guarantee, not exactly-once: an id that expires or is
//! evicted for capacity before its duplicate arrives is processed again.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

pub struct DedupCache {
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
}

impl DedupCache {
    /// A `max_entries` of zero is clamped to one.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    /// Returns `true` if `message_id` is a live entry, leaving the cache untouched.
    /// Otherwise records it and returns `false`.
    ///
    /// The check and the insert happen under one lock, so concurrent callers
    /// with the same id get exactly one `false`.
    pub fn seen(&self, message_id: &str) -> bool {
        self.seen_at(message_id, Instant::now())
    }

    pub(crate) fn seen_at(&self, message_id: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        // peek, not get: a duplicate must not refresh recency
        if let Some(inserted_at) = entries.peek(message_id) {
            if now.saturating_duration_since(*inserted_at) < self.ttl {
                return true;
            }
            entries.pop(message_id);
        }

        if let Some((evicted, _)) = entries.push(message_id.to_string(), now) {
            debug!("dedup cache full, evicted mid={}", evicted);
        }
        false
    }

    /// Drop entries whose TTL has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        // Entries are never promoted, so the LRU tail is always the oldest insert.
        while let Some((_, inserted_at)) = entries.peek_lru() {
            if now.saturating_duration_since(*inserted_at) < self.ttl {
                break;
            }
            entries.pop_lru();
            removed += 1;
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cap()
            .get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

/// Periodically drop expired ids so a quiet cache does not hold them until
/// capacity eviction.
pub fn spawn_purge_task(cache: Arc<DedupCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!("purged {} expired mid(s), {} remembered", removed, cache.len());
            }
        }
    })
}
