//! Snapshot payloads published once per cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arbiter::ResourceStatus;
use crate::feed::AvailabilityMap;
use crate::state::{FinalOutcome, ItemState, ItemStatus};

/// Kind of change the orchestrator made during Reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// A finished or orphaned item went back to `Ready`.
    Reset,
    /// A new attempt was launched.
    AttemptStarted,
}

/// One status change made by the orchestrator in this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub item_id: String,
    pub kind: TransitionKind,
    pub from: ItemStatus,
    pub to: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_deadline: Option<DateTime<Utc>>,
    /// Outcome a reset cleared, so a result that landed between two
    /// snapshots is still published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_outcome: Option<FinalOutcome>,
}

/// Timer information so observers can render a countdown that matches the
/// real loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleTimer {
    /// Idle time chosen after this cycle.
    pub next_cycle_eta_secs: f64,
    /// Worst-case extra time the next cycle can spend draining workers and
    /// polling the feed before its snapshot goes out.
    #[serde(default)]
    pub next_snapshot_max_delay_secs: f64,
    pub interval_min_secs: f64,
    pub interval_max_secs: f64,
    /// Actual time since the previous snapshot, absent for the first cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_since_previous_secs: Option<f64>,
}

/// How the drain before this cycle's Reconcile went.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forced_items: Vec<String>,
    pub waited_secs: f64,
}

/// Complete view of the system after one cycle.
///
/// A subscriber can rebuild full state from a single snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub cycle_id: u64,
    pub timestamp: DateTime<Utc>,
    pub availability: AvailabilityMap,
    /// The feed failed this cycle and `availability` is the previous map.
    pub availability_stale: bool,
    /// Every tracked item, in priority order.
    pub items: Vec<ItemState>,
    pub transitions: Vec<StateTransition>,
    pub timer: CycleTimer,
    pub drain: DrainReport,
    pub resource: ResourceStatus,
}

impl CycleSnapshot {
    pub fn item(&self, id: &str) -> Option<&ItemState> {
        self.items.iter().find(|s| s.id == id)
    }
}
