//! Item state machine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Idle; eligible for a new attempt when available.
    Ready,
    /// A worker has been launched and is waiting for or driving the resource.
    Attempting,
    /// The attempt's action finished; teardown still owns the resource.
    Completing,
    /// The last attempt acquired the item.
    Purchased,
    /// The last attempt failed (see `FinalOutcome::reason`).
    Failed,
}

impl ItemStatus {
    /// All statuses other than `Ready`. Used by the cycle reset.
    pub const NOT_READY: [ItemStatus; 4] = [
        ItemStatus::Attempting,
        ItemStatus::Completing,
        ItemStatus::Purchased,
        ItemStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Ready => "ready",
            ItemStatus::Attempting => "attempting",
            ItemStatus::Completing => "completing",
            ItemStatus::Purchased => "purchased",
            ItemStatus::Failed => "failed",
        }
    }

    /// Whether an attempt is in flight (the deadline must be set).
    pub fn is_active(&self) -> bool {
        matches!(self, ItemStatus::Attempting | ItemStatus::Completing)
    }

    /// Whether this is an outcome of a finished attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Purchased | ItemStatus::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(ItemStatus::Ready),
            "attempting" => Some(ItemStatus::Attempting),
            "completing" => Some(ItemStatus::Completing),
            "purchased" => Some(ItemStatus::Purchased),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The automation resource could not be acquired in time.
    ResourceTimeout,
    /// The automation resource has been retired and refuses new holders.
    ResourceUnavailable,
    /// The acquisition action ran past the attempt deadline.
    ActionTimeout,
    /// The storefront refused the acquisition.
    ActionRejected,
    /// Teardown exceeded its hard bound.
    TeardownTimeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ResourceTimeout => "resource_timeout",
            FailureReason::ResourceUnavailable => "resource_unavailable",
            FailureReason::ActionTimeout => "action_timeout",
            FailureReason::ActionRejected => "action_rejected",
            FailureReason::TeardownTimeout => "teardown_timeout",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutcome {
    /// `Purchased` or `Failed`.
    pub outcome: ItemStatus,
    /// Failure code, absent on purchase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Human readable detail from the action or teardown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Storefront order reference, present on purchase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    /// Set when teardown had to be cut off by its hard timeout.
    #[serde(default)]
    pub teardown_timed_out: bool,
    pub completed_at: DateTime<Utc>,
}

impl FinalOutcome {
    pub fn purchased(order_number: Option<String>) -> Self {
        Self {
            outcome: ItemStatus::Purchased,
            reason: None,
            detail: None,
            order_number,
            teardown_timed_out: false,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            outcome: ItemStatus::Failed,
            reason: Some(reason),
            detail: Some(detail.into()),
            order_number: None,
            teardown_timed_out: false,
            completed_at: Utc::now(),
        }
    }

    pub fn is_purchased(&self) -> bool {
        self.outcome == ItemStatus::Purchased
    }
}

/// Durable state of one tracked item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub id: String,
    pub status: ItemStatus,
    /// Attempt number assigned at launch; distinguishes a stale worker's
    /// late write from the current attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_started_at: Option<DateTime<Utc>>,
    /// Set iff `status` is `Attempting` or `Completing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_outcome: Option<FinalOutcome>,
    pub updated_at: DateTime<Utc>,
}

impl ItemState {
    /// A fresh record, as created at first sight of an item id.
    pub fn ready(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::Ready,
            attempt_id: None,
            attempt_started_at: None,
            attempt_deadline: None,
            final_outcome: None,
            updated_at: Utc::now(),
        }
    }

    /// Check the deadline invariant and the outcome/status pairing.
    pub fn check_invariant(&self) -> Result<(), String> {
        if self.status.is_active() != self.attempt_deadline.is_some() {
            return Err(format!(
                "item {}: attempt_deadline must be set iff attempting/completing (status {})",
                self.id, self.status
            ));
        }
        match (&self.final_outcome, self.status.is_terminal()) {
            (Some(outcome), true) if outcome.outcome != self.status => Err(format!(
                "item {}: outcome {} does not match status {}",
                self.id, outcome.outcome, self.status
            )),
            (Some(_), false) => Err(format!(
                "item {}: final_outcome present in non-terminal status {}",
                self.id, self.status
            )),
            _ => Ok(()),
        }
    }
}

/// Result of a compare-and-transition call.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The transition was applied and persisted.
    Applied {
        previous: ItemStatus,
        state: ItemState,
    },
    /// The current status (or attempt) did not match; nothing changed.
    Rejected { current: ItemState },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    /// The state after the call (new state if applied, current otherwise).
    pub fn state(&self) -> &ItemState {
        match self {
            Transition::Applied { state, .. } => state,
            Transition::Rejected { current } => current,
        }
    }

    pub fn into_state(self) -> ItemState {
        match self {
            Transition::Applied { state, .. } => state,
            Transition::Rejected { current } => current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ItemStatus::Completing).unwrap();
        assert_eq!(json, "\"completing\"");
        let parsed: ItemStatus = serde_json::from_str("\"purchased\"").unwrap();
        assert_eq!(parsed, ItemStatus::Purchased);
    }

    #[test]
    fn test_status_parse_matches_as_str() {
        for status in [
            ItemStatus::Ready,
            ItemStatus::Attempting,
            ItemStatus::Completing,
            ItemStatus::Purchased,
            ItemStatus::Failed,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemStatus::parse("cooldown"), None);
    }

    #[test]
    fn test_failure_reason_codes() {
        assert_eq!(FailureReason::ResourceTimeout.as_str(), "resource_timeout");
        assert_eq!(FailureReason::TeardownTimeout.to_string(), "teardown_timeout");
        let json = serde_json::to_string(&FailureReason::ActionRejected).unwrap();
        assert_eq!(json, "\"action_rejected\"");
    }

    #[test]
    fn test_ready_state_satisfies_invariant() {
        let state = ItemState::ready("94724987");
        assert_eq!(state.status, ItemStatus::Ready);
        assert!(state.check_invariant().is_ok());
    }

    #[test]
    fn test_invariant_rejects_active_without_deadline() {
        let mut state = ItemState::ready("a");
        state.status = ItemStatus::Attempting;
        assert!(state.check_invariant().is_err());

        state.attempt_deadline = Some(Utc::now());
        assert!(state.check_invariant().is_ok());
    }

    #[test]
    fn test_invariant_rejects_outcome_on_ready() {
        let mut state = ItemState::ready("a");
        state.final_outcome = Some(FinalOutcome::purchased(None));
        assert!(state.check_invariant().is_err());
    }

    #[test]
    fn test_item_state_omits_empty_fields() {
        let state = ItemState::ready("a");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "ready");
        assert!(json.get("attempt_deadline").is_none());
        assert!(json.get("final_outcome").is_none());
    }
}
