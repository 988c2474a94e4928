use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::ActivityEvent;

/// Activity event with the time it was emitted
#[derive(Debug, Clone)]
pub struct ActivityEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: ActivityEvent,
}

/// Cloneable sender for activity events.
///
/// Events go through a bounded channel to the `ActivityWriter`.
#[derive(Clone)]
pub struct ActivityHandle {
    tx: mpsc::Sender<ActivityEnvelope>,
}

impl ActivityHandle {
    pub fn new(tx: mpsc::Sender<ActivityEnvelope>) -> Self {
        Self { tx }
    }

    /// Send an event, waiting for channel capacity. A closed channel is
    /// logged and ignored.
    pub async fn emit(&self, event: ActivityEvent) {
        let envelope = ActivityEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit activity event: {}", e);
        }
    }

    /// Send an event without waiting. Returns false if it was dropped.
    pub fn try_emit(&self, event: ActivityEvent) -> bool {
        let envelope = ActivityEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropped activity event: {}", e);
                false
            }
        }
    }
}
