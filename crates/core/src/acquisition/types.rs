//! Types shared by acquisition actions and the worker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{FailureReason, FinalOutcome};

/// What the storefront answered to an acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The item was acquired.
    Purchased { order_number: Option<String> },
    /// The storefront refused.
    Rejected { reason: String },
}

impl ActionOutcome {
    pub fn into_final(self) -> FinalOutcome {
        match self {
            ActionOutcome::Purchased { order_number } => FinalOutcome::purchased(order_number),
            ActionOutcome::Rejected { reason } => {
                FinalOutcome::failed(FailureReason::ActionRejected, reason)
            }
        }
    }
}

/// Errors raised by an acquisition action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The action observed the attempt deadline.
    #[error("action exceeded the attempt deadline")]
    Timeout,

    /// The storefront interaction broke.
    #[error("storefront error: {0}")]
    Storefront(String),
}

impl ActionError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ActionError::Timeout => FailureReason::ActionTimeout,
            ActionError::Storefront(_) => FailureReason::ActionRejected,
        }
    }
}

/// Errors raised by a teardown action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TeardownError {
    /// The teardown observed its own bound.
    #[error("teardown exceeded its time bound")]
    Timeout,

    /// Cleanup failed but returned.
    #[error("teardown failed: {0}")]
    Failed(String),
}

/// What happens to the resource when teardown overruns its hard timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownTimeoutPolicy {
    /// Release the resource and keep using it.
    Reclaim,
    /// Release the resource and retire it until an operator restores it.
    #[default]
    Quarantine,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ItemStatus;

    #[test]
    fn test_outcome_into_final() {
        let purchased = ActionOutcome::Purchased {
            order_number: Some("ORD-482913-27".into()),
        }
        .into_final();
        assert_eq!(purchased.outcome, ItemStatus::Purchased);
        assert_eq!(purchased.order_number.as_deref(), Some("ORD-482913-27"));

        let rejected = ActionOutcome::Rejected {
            reason: "cart limit reached".into(),
        }
        .into_final();
        assert_eq!(rejected.outcome, ItemStatus::Failed);
        assert_eq!(rejected.reason, Some(FailureReason::ActionRejected));
        assert_eq!(rejected.detail.as_deref(), Some("cart limit reached"));
    }

    #[test]
    fn test_action_error_reason() {
        assert_eq!(ActionError::Timeout.reason(), FailureReason::ActionTimeout);
        assert_eq!(
            ActionError::Storefront("503".into()).reason(),
            FailureReason::ActionRejected
        );
    }

    #[test]
    fn test_policy_deserialize() {
        let policy: TeardownTimeoutPolicy = serde_json::from_str("\"reclaim\"").unwrap();
        assert_eq!(policy, TeardownTimeoutPolicy::Reclaim);
        assert_eq!(TeardownTimeoutPolicy::default(), TeardownTimeoutPolicy::Quarantine);
    }
}
