use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::CycleSnapshot;
use crate::metrics;

/// Default per-subscriber queue length.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<CycleSnapshot>>,
    dropped: u64,
}

struct BroadcasterInner {
    subscribers: Mutex<Vec<Subscriber>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl BroadcasterInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delivery counts of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose queue was full; they miss this snapshot.
    pub dropped: usize,
    /// Subscribers that had gone away and were removed.
    pub removed: usize,
}

/// Fan-out of cycle snapshots to any number of subscribers.
///
/// Each subscriber has its own bounded queue. Publishing never waits: a full
/// queue drops the new snapshot for that subscriber only.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                subscribers: Mutex::new(Vec::new()),
                buffer: buffer.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a subscriber. It receives snapshots published from now on.
    pub fn subscribe(&self) -> SnapshotSubscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.inner.lock();
        subscribers.push(Subscriber { id, tx, dropped: 0 });
        metrics::SNAPSHOT_SUBSCRIBERS.set(subscribers.len() as i64);

        debug!(subscriber = id, "Snapshot subscriber attached");
        SnapshotSubscription { id, rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Deliver `snapshot` to every subscriber without blocking.
    pub fn publish(&self, snapshot: CycleSnapshot) -> PublishReport {
        let snapshot = Arc::new(snapshot);
        let mut report = PublishReport::default();

        let mut subscribers = self.inner.lock();
        subscribers.retain_mut(|sub| match sub.tx.try_send(Arc::clone(&snapshot)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                sub.dropped += 1;
                report.dropped += 1;
                metrics::SNAPSHOTS_DROPPED.inc();
                debug!(
                    subscriber = sub.id,
                    cycle_id = snapshot.cycle_id,
                    total_dropped = sub.dropped,
                    "Subscriber queue full, snapshot dropped"
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.removed += 1;
                debug!(subscriber = sub.id, "Snapshot subscriber detached");
                false
            }
        });
        metrics::SNAPSHOT_SUBSCRIBERS.set(subscribers.len() as i64);

        report
    }
}

/// Receiving side of a snapshot subscription.
pub struct SnapshotSubscription {
    id: u64,
    rx: mpsc::Receiver<Arc<CycleSnapshot>>,
}

impl SnapshotSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next snapshot, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Arc<CycleSnapshot>> {
        self.rx.recv().await
    }

    /// Next queued snapshot, if any.
    pub fn try_recv(&mut self) -> Option<Arc<CycleSnapshot>> {
        self.rx.try_recv().ok()
    }
}
