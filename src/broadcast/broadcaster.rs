//! Snapshot broadcaster
//!
//! Every subscriber gets its own bounded window over a tokio broadcast
//! channel. Publishing never waits: a subscriber that falls more than
//! `capacity` snapshots behind loses the oldest ones and resumes at the
//! most recent state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::snapshot::Snapshot;

pub struct StateBroadcaster {
    /// `None` once closed
    tx: Mutex<Option<broadcast::Sender<Arc<Snapshot>>>>,
    latest: watch::Sender<Option<Arc<Snapshot>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl StateBroadcaster {
    /// tokio rounds `capacity` up to the next power of two
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (latest, _) = watch::channel(None);
        Self {
            tx: Mutex::new(Some(tx)),
            latest,
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<Arc<Snapshot>>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a snapshot to every current subscriber
    pub fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        self.latest.send_replace(Some(Arc::clone(&snapshot)));

        if let Some(tx) = self.sender().as_ref() {
            // Err only means nobody is subscribed
            let _ = tx.send(snapshot);
        }
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = match self.sender().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                warn!(subscriber = id, "subscribe after close");
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        };
        debug!(subscriber = id, capacity = self.capacity, "subscriber added");
        Subscription { id, rx, dropped: 0 }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!(
            subscriber = subscription.id,
            dropped = subscription.dropped,
            "subscriber removed"
        );
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender().as_ref().map_or(0, |tx| tx.receiver_count())
    }

    /// End every subscription once it has drained what is queued
    pub fn close(&self) {
        if self.sender().take().is_some() {
            info!("state broadcaster closed");
        }
    }
}

/// One observer's view of the snapshot stream
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<Arc<Snapshot>>,
    dropped: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshots skipped because this subscriber fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next snapshot, or `None` once the broadcaster is closed
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    debug!(subscriber = self.id, skipped, "subscriber lagged, oldest snapshots dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
