//! Testing utilities and mock implementations.
//!
//! Mocks for every external collaborator of the orchestrator, so cycles can
//! be driven end to end under a paused tokio clock.
//!
//! # Example
//!
//! ```rust,ignore
//! use dropwatch_core::testing::{MockAcquisitionAction, MockAvailabilityFeed, MockTeardownAction};
//!
//! let feed = MockAvailabilityFeed::available(&["94724987"]);
//! let action = MockAcquisitionAction::new();
//! action.set_duration(Duration::from_secs(2)).await;
//! let teardown = MockTeardownAction::new();
//! ```

mod mock_action;
mod mock_feed;
mod mock_teardown;

pub use mock_action::{MockAcquisitionAction, RecordedAction};
pub use mock_feed::MockAvailabilityFeed;
pub use mock_teardown::MockTeardownAction;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::orchestrator::{CycleSettings, ItemEntry};

    /// Configured item entry, enabled.
    pub fn item(id: &str) -> ItemEntry {
        ItemEntry {
            id: id.to_string(),
            name: None,
            enabled: true,
        }
    }

    /// Settings with short, fixed timings: 20s interval, 30s drain bound,
    /// 5s resource wait, 60s action and 10s teardown bounds.
    pub fn settings(items: &[&str]) -> CycleSettings {
        CycleSettings {
            items: items.iter().map(|id| item(id)).collect(),
            interval_min_ms: 20_000,
            interval_max_ms: 20_000,
            max_drain_timeout_ms: 30_000,
            resource_timeout_ms: 5_000,
            action_timeout_ms: 60_000,
            teardown_timeout_ms: 10_000,
            feed_timeout_ms: 5_000,
            feed_retry_attempts: 1,
            feed_retry_delay_ms: 100,
            teardown_timeout_policy: Default::default(),
        }
    }
}
