use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ActivityEnvelope, ActivityHandle, ActivityRecord, ActivityStore};

/// Background task that drains activity events into the store
pub struct ActivityWriter {
    rx: mpsc::Receiver<ActivityEnvelope>,
    store: Arc<dyn ActivityStore>,
}

impl ActivityWriter {
    pub fn new(rx: mpsc::Receiver<ActivityEnvelope>, store: Arc<dyn ActivityStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Activity writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = ActivityRecord {
                id: 0,
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                item_id: envelope.event.item_id().map(String::from),
                user_id: envelope.event.user_id().map(String::from),
                message: envelope.event.message(),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(record) {
                tracing::error!("Failed to write activity event: {}", e);
            }
        }

        tracing::info!("Activity writer shutting down");
    }
}

/// Create a handle/writer pair over `store`.
///
/// Spawn the writer with `tokio::spawn(writer.run())`.
pub fn create_activity_system(
    store: Arc<dyn ActivityStore>,
    buffer_size: usize,
) -> (ActivityHandle, ActivityWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (ActivityHandle::new(tx), ActivityWriter::new(rx, store))
}
