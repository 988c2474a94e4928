//! Mock acquisition action for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::acquisition::{AcquisitionAction, ActionError, ActionOutcome};
use crate::arbiter::ResourceToken;
use crate::deadline::DeadlineSignal;

/// A recorded call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedAction {
    /// Item the action was asked to acquire.
    pub item_id: String,
    /// Resource holder at the time of the call.
    pub holder: String,
}

/// Mock implementation of the AcquisitionAction trait.
///
/// Provides controllable behavior for testing:
/// - Configurable duration (global or per item)
/// - Configurable outcome or error
/// - Call recording and in-flight tracking
///
/// The mock honours the attempt deadline, returning `ActionError::Timeout`
/// when it fires first.
#[derive(Debug)]
pub struct MockAcquisitionAction {
    calls: Arc<RwLock<Vec<RecordedAction>>>,
    outcome: Arc<RwLock<ActionOutcome>>,
    next_error: Arc<RwLock<Option<ActionError>>>,
    duration: Arc<RwLock<Duration>>,
    item_durations: Arc<RwLock<HashMap<String, Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MockAcquisitionAction {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAcquisitionAction {
    /// Create a mock that purchases instantly.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            outcome: Arc::new(RwLock::new(ActionOutcome::Purchased {
                order_number: Some("ORD-000001-01".to_string()),
            })),
            next_error: Arc::new(RwLock::new(None)),
            duration: Arc::new(RwLock::new(Duration::ZERO)),
            item_durations: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Outcome returned by every subsequent call.
    pub async fn set_outcome(&self, outcome: ActionOutcome) {
        *self.outcome.write().await = outcome;
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: ActionError) {
        *self.next_error.write().await = Some(error);
    }

    /// Duration of every call without a per-item override.
    pub async fn set_duration(&self, duration: Duration) {
        *self.duration.write().await = duration;
    }

    /// Duration for calls on one item.
    pub async fn set_item_duration(&self, item_id: &str, duration: Duration) {
        self.item_durations
            .write()
            .await
            .insert(item_id.to_string(), duration);
    }

    pub async fn recorded_calls(&self) -> Vec<RecordedAction> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Number of calls made for one item.
    pub async fn calls_for(&self, item_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.item_id == item_id)
            .count()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter when the call ends or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AcquisitionAction for MockAcquisitionAction {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(
        &self,
        item_id: &str,
        token: &ResourceToken,
        deadline: &DeadlineSignal,
    ) -> Result<ActionOutcome, ActionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        self.calls.write().await.push(RecordedAction {
            item_id: item_id.to_string(),
            holder: token.holder().to_string(),
        });

        let item_duration = self.item_durations.read().await.get(item_id).copied();
        let duration = match item_duration {
            Some(d) => d,
            None => *self.duration.read().await,
        };

        if !duration.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = deadline.expired() => return Err(ActionError::Timeout),
            }
        }

        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        Ok(self.outcome.read().await.clone())
    }
}
