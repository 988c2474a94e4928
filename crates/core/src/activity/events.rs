use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activity log event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },
    OrchestratorToggled {
        running: bool,
        requested_by: String,
    },
    ConfigReloaded {
        config_hash: String,
        requested_by: String,
    },

    // Cycle events
    FeedDegraded {
        cycle_id: u64,
        error: String,
        attempts: u32,
    },
    DrainTimedOut {
        cycle_id: u64,
        waited_ms: u64,
        forced_items: Vec<String>,
    },
    RefreshRequested {
        requested_by: String,
    },

    // Item lifecycle
    ItemReset {
        item_id: String,
        from_status: String,
    },
    AttemptStarted {
        item_id: String,
        attempt_id: u64,
        deadline: DateTime<Utc>,
    },
    AttemptFinished {
        item_id: String,
        attempt_id: u64,
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_number: Option<String>,
        teardown_timed_out: bool,
        duration_ms: u64,
    },
    AttemptSuperseded {
        item_id: String,
        attempt_id: u64,
        /// Outcome the store refused to record.
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_number: Option<String>,
    },
    AttemptAborted {
        item_id: String,
        attempt_id: u64,
        requested_by: String,
    },

    // Resource
    ResourceRetired {
        reason: String,
    },
    ResourceRestored {
        requested_by: String,
    },
}

impl ActivityEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::OrchestratorToggled { .. } => "orchestrator_toggled",
            Self::ConfigReloaded { .. } => "config_reloaded",
            Self::FeedDegraded { .. } => "feed_degraded",
            Self::DrainTimedOut { .. } => "drain_timed_out",
            Self::RefreshRequested { .. } => "refresh_requested",
            Self::ItemReset { .. } => "item_reset",
            Self::AttemptStarted { .. } => "attempt_started",
            Self::AttemptFinished { .. } => "attempt_finished",
            Self::AttemptSuperseded { .. } => "attempt_superseded",
            Self::AttemptAborted { .. } => "attempt_aborted",
            Self::ResourceRetired { .. } => "resource_retired",
            Self::ResourceRestored { .. } => "resource_restored",
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::ItemReset { item_id, .. }
            | Self::AttemptStarted { item_id, .. }
            | Self::AttemptFinished { item_id, .. }
            | Self::AttemptSuperseded { item_id, .. }
            | Self::AttemptAborted { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::OrchestratorToggled { requested_by, .. }
            | Self::ConfigReloaded { requested_by, .. }
            | Self::RefreshRequested { requested_by }
            | Self::AttemptAborted { requested_by, .. }
            | Self::ResourceRestored { requested_by } => Some(requested_by),
            _ => None,
        }
    }

    /// One-line description for the dashboard log.
    pub fn message(&self) -> String {
        match self {
            Self::ServiceStarted { version, .. } => format!("Service started (v{})", version),
            Self::ServiceStopped { reason } => format!("Service stopped: {}", reason),
            Self::OrchestratorToggled { running, .. } => {
                if *running {
                    "Orchestrator started".to_string()
                } else {
                    "Orchestrator stopped".to_string()
                }
            }
            Self::ConfigReloaded { .. } => "Configuration reloaded".to_string(),
            Self::FeedDegraded {
                cycle_id, error, ..
            } => format!(
                "Cycle {}: availability feed failed, reusing previous data ({})",
                cycle_id, error
            ),
            Self::DrainTimedOut {
                cycle_id,
                forced_items,
                ..
            } => format!(
                "Cycle {}: drain timed out, force-cleared {} worker(s)",
                cycle_id,
                forced_items.len()
            ),
            Self::RefreshRequested { .. } => "Manual refresh requested".to_string(),
            Self::ItemReset {
                item_id,
                from_status,
            } => format!("Item {} reset from {}", item_id, from_status),
            Self::AttemptStarted {
                item_id,
                attempt_id,
                ..
            } => format!("Attempt {} started for item {}", attempt_id, item_id),
            Self::AttemptFinished {
                item_id,
                outcome,
                reason,
                order_number,
                ..
            } => match (order_number, reason) {
                (Some(order), _) => format!("Item {} {} (order {})", item_id, outcome, order),
                (None, Some(reason)) => format!("Item {} {}: {}", item_id, outcome, reason),
                (None, None) => format!("Item {} {}", item_id, outcome),
            },
            Self::AttemptSuperseded {
                item_id,
                attempt_id,
                outcome,
                order_number,
            } => match order_number {
                Some(order) => format!(
                    "Late result of attempt {} for item {} not recorded: {} (order {})",
                    attempt_id, item_id, outcome, order
                ),
                None => format!(
                    "Late result of attempt {} for item {} not recorded: {}",
                    attempt_id, item_id, outcome
                ),
            },
            Self::AttemptAborted {
                item_id,
                attempt_id,
                ..
            } => format!("Attempt {} for item {} aborted", attempt_id, item_id),
            Self::ResourceRetired { reason } => format!("Automation resource retired: {}", reason),
            Self::ResourceRestored { .. } => "Automation resource restored".to_string(),
        }
    }
}

/// Stored activity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub item_id: Option<String>,
    pub user_id: Option<String>,
    pub message: String,
    pub data: ActivityEvent,
}
