//! Change fan-out from the store to its subscribers.
//!
//! Every committed batch publishes one [`ChangeEvent`] listing the paths it
//! touched. Subscription forwarders filter events by path overlap and re-read
//! the tree, so a lagging receiver only loses granularity, never the latest
//! value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::store::StorePath;

/// One committed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub revision: u64,
    pub paths: Vec<StorePath>,
}

impl ChangeEvent {
    /// Whether a subscriber of `path` may observe a different value.
    pub fn touches(&self, path: &StorePath) -> bool {
        self.paths.iter().any(|changed| changed.overlaps(path))
    }
}

/// Statistics for monitoring feed health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedStats {
    pub events_published: u64,
    pub events_lagged: u64,
    pub active_receivers: usize,
}

/// Lock-free counters, read via [`ChangeFeed::stats`].
struct AtomicFeedStats {
    events_published: AtomicU64,
    events_lagged: AtomicU64,
}

impl AtomicFeedStats {
    fn new() -> Self {
        Self {
            events_published: AtomicU64::new(0),
            events_lagged: AtomicU64::new(0),
        }
    }
}

/// Broadcast channel of change events.
pub struct ChangeFeed {
    sender: broadcast::Sender<Arc<ChangeEvent>>,
    capacity: usize,
    atomic_stats: Arc<AtomicFeedStats>,
}

impl ChangeFeed {
    /// `capacity` events are buffered per receiver before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            atomic_stats: Arc::new(AtomicFeedStats::new()),
        }
    }

    /// Publish an event. Returns the number of receivers it reached.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let count = self.sender.send(Arc::new(event)).unwrap_or(0);
        self.atomic_stats
            .events_published
            .fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.sender.subscribe()
    }

    /// Record that a receiver skipped `missed` events.
    pub fn record_lag(&self, missed: u64) {
        self.atomic_stats
            .events_lagged
            .fetch_add(missed, Ordering::Relaxed);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            events_published: self.atomic_stats.events_published.load(Ordering::Relaxed),
            events_lagged: self.atomic_stats.events_lagged.load(Ordering::Relaxed),
            active_receivers: self.sender.receiver_count(),
        }
    }
}
