//! Types for the cycle orchestrator.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arbiter::ResourceStatus;
use crate::broadcast::{DrainReport, StateTransition};
use crate::registry::WorkerInfo;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Item is not tracked.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// No worker is running for the item.
    #[error("no live attempt for item: {0}")]
    NoLiveAttempt(String),

    /// The live attempt is already tearing down and can no longer be aborted.
    #[error("attempt {attempt_id} for item {item_id} is already completing")]
    AttemptCompleting { item_id: String, attempt_id: u64 },

    /// Rejected settings update.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// State store error.
    #[error("state store error: {0}")]
    State(#[from] crate::state::StateError),
}

/// Countdown to the next cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerState {
    /// Seconds left in the current idle wait. Absent while a cycle is
    /// running or the loop is stopped.
    pub remaining_secs: Option<f64>,
    pub interval_min_secs: f64,
    pub interval_max_secs: f64,
    pub last_cycle_id: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the cycle loop is running.
    pub running: bool,
    /// Id of the last published cycle (0 before the first).
    pub last_cycle_id: u64,
    /// Workers currently executing or completing.
    pub live_workers: Vec<WorkerInfo>,
    pub resource: ResourceStatus,
    pub timer: TimerState,
    /// Tracked items per status.
    pub items_by_status: BTreeMap<String, usize>,
    /// The last cycle reused a previous availability map.
    pub availability_stale: bool,
    /// State persistence backend.
    pub storage: String,
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub drain: DrainReport,
    pub availability_stale: bool,
    pub transitions: Vec<StateTransition>,
    /// A registry conflict stopped launches early.
    pub launches_aborted: bool,
    /// Idle wait chosen after this cycle.
    pub next_idle: Duration,
    pub duration: Duration,
}

impl CycleReport {
    pub fn launched(&self) -> impl Iterator<Item = &StateTransition> {
        self.transitions
            .iter()
            .filter(|t| t.kind == crate::broadcast::TransitionKind::AttemptStarted)
    }

    pub fn resets(&self) -> impl Iterator<Item = &StateTransition> {
        self.transitions
            .iter()
            .filter(|t| t.kind == crate::broadcast::TransitionKind::Reset)
    }
}
