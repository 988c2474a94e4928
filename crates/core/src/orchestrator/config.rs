//! Orchestrator configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::acquisition::{AttemptLimits, TeardownTimeoutPolicy};

/// One tracked item from `[[items]]`. List order is launch priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEntry {
    pub id: String,

    /// Display name, only used in logs and the API.
    #[serde(default)]
    pub name: Option<String>,

    /// Disabled items are tracked and reset but never attempted.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Configuration for the cycle orchestrator (`[orchestrator]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Start the cycle loop when the service starts.
    /// When disabled, it can be started via API.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Lower bound of the random idle wait between cycles (milliseconds).
    #[serde(default = "default_interval_min")]
    pub interval_min_ms: u64,

    /// Upper bound of the random idle wait between cycles (milliseconds).
    #[serde(default = "default_interval_max")]
    pub interval_max_ms: u64,

    /// How long a cycle waits for the previous cycle's workers before
    /// force-clearing them (milliseconds).
    #[serde(default = "default_drain_timeout")]
    pub max_drain_timeout_ms: u64,

    /// How long a worker waits for the shared resource (milliseconds).
    #[serde(default = "default_resource_timeout")]
    pub resource_timeout_ms: u64,

    /// Budget of the acquisition action itself (milliseconds).
    /// The attempt deadline is resource wait plus this.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,

    /// Hard bound on teardown (milliseconds).
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_ms: u64,

    /// What happens to the resource when teardown times out.
    #[serde(default)]
    pub teardown_timeout_policy: TeardownTimeoutPolicy,

    /// Bound on one availability poll (milliseconds).
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_ms: u64,

    /// Extra polls after a failed one before the previous map is reused.
    #[serde(default = "default_feed_retry_attempts")]
    pub feed_retry_attempts: u32,

    /// Pause between feed retries (milliseconds).
    #[serde(default = "default_feed_retry_delay")]
    pub feed_retry_delay_ms: u64,

    /// Per-subscriber snapshot queue length.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_true() -> bool {
    true
}

fn default_interval_min() -> u64 {
    15_000
}

fn default_interval_max() -> u64 {
    25_000
}

fn default_drain_timeout() -> u64 {
    30_000
}

fn default_resource_timeout() -> u64 {
    30_000
}

fn default_action_timeout() -> u64 {
    120_000
}

fn default_teardown_timeout() -> u64 {
    15_000
}

fn default_feed_timeout() -> u64 {
    10_000
}

fn default_feed_retry_attempts() -> u32 {
    2
}

fn default_feed_retry_delay() -> u64 {
    1_000
}

fn default_subscriber_buffer() -> usize {
    crate::broadcast::DEFAULT_SUBSCRIBER_BUFFER
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            interval_min_ms: default_interval_min(),
            interval_max_ms: default_interval_max(),
            max_drain_timeout_ms: default_drain_timeout(),
            resource_timeout_ms: default_resource_timeout(),
            action_timeout_ms: default_action_timeout(),
            teardown_timeout_ms: default_teardown_timeout(),
            teardown_timeout_policy: TeardownTimeoutPolicy::default(),
            feed_timeout_ms: default_feed_timeout(),
            feed_retry_attempts: default_feed_retry_attempts(),
            feed_retry_delay_ms: default_feed_retry_delay(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Upper bound for every configured duration.
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

const MAX_FEED_RETRY_ATTEMPTS: u32 = 10;

/// Everything one cycle needs to know, swapped as a unit between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub items: Vec<ItemEntry>,
    pub interval_min_ms: u64,
    pub interval_max_ms: u64,
    pub max_drain_timeout_ms: u64,
    pub resource_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub teardown_timeout_ms: u64,
    pub feed_timeout_ms: u64,
    pub feed_retry_attempts: u32,
    pub feed_retry_delay_ms: u64,
    pub teardown_timeout_policy: TeardownTimeoutPolicy,
}

impl CycleSettings {
    pub fn from_config(config: &OrchestratorConfig, items: &[ItemEntry]) -> Self {
        Self {
            items: items.to_vec(),
            interval_min_ms: config.interval_min_ms,
            interval_max_ms: config.interval_max_ms,
            max_drain_timeout_ms: config.max_drain_timeout_ms,
            resource_timeout_ms: config.resource_timeout_ms,
            action_timeout_ms: config.action_timeout_ms,
            teardown_timeout_ms: config.teardown_timeout_ms,
            feed_timeout_ms: config.feed_timeout_ms,
            feed_retry_attempts: config.feed_retry_attempts,
            feed_retry_delay_ms: config.feed_retry_delay_ms,
            teardown_timeout_policy: config.teardown_timeout_policy,
        }
    }

    /// Check the rules the loop relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_min_ms > self.interval_max_ms {
            return Err(format!(
                "interval_min_ms ({}) must not exceed interval_max_ms ({})",
                self.interval_min_ms, self.interval_max_ms
            ));
        }
        let timeouts = [
            ("max_drain_timeout_ms", self.max_drain_timeout_ms),
            ("resource_timeout_ms", self.resource_timeout_ms),
            ("action_timeout_ms", self.action_timeout_ms),
            ("teardown_timeout_ms", self.teardown_timeout_ms),
            ("feed_timeout_ms", self.feed_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(format!("{} must be greater than 0", name));
        }
        let bounded = [
            ("interval_max_ms", self.interval_max_ms),
            ("feed_retry_delay_ms", self.feed_retry_delay_ms),
        ];
        if let Some((name, ms)) = timeouts
            .iter()
            .chain(bounded.iter())
            .find(|(_, ms)| *ms > MAX_DURATION_MS)
        {
            return Err(format!(
                "{} ({}) must not exceed {} (24h)",
                name, ms, MAX_DURATION_MS
            ));
        }
        if self.feed_retry_attempts > MAX_FEED_RETRY_ATTEMPTS {
            return Err(format!(
                "feed_retry_attempts ({}) must not exceed {}",
                self.feed_retry_attempts, MAX_FEED_RETRY_ATTEMPTS
            ));
        }
        for (i, item) in self.items.iter().enumerate() {
            if item.id.trim().is_empty() {
                return Err(format!("items[{}].id must not be empty", i));
            }
            if self.items[..i].iter().any(|other| other.id == item.id) {
                return Err(format!("duplicate item id '{}'", item.id));
            }
        }
        Ok(())
    }

    pub fn item(&self, id: &str) -> Option<&ItemEntry> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Feed-only ids are enabled; configured ids follow their entry.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.item(id).map(|item| item.enabled).unwrap_or(true)
    }

    /// Random idle wait in `[interval_min, interval_max]`.
    pub fn pick_interval(&self) -> Duration {
        let ms = if self.interval_min_ms >= self.interval_max_ms {
            self.interval_min_ms
        } else {
            rand::thread_rng().gen_range(self.interval_min_ms..=self.interval_max_ms)
        };
        Duration::from_millis(ms)
    }

    pub fn interval_bounds_secs(&self) -> (f64, f64) {
        (
            self.interval_min_ms as f64 / 1000.0,
            self.interval_max_ms as f64 / 1000.0,
        )
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.max_drain_timeout_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn feed_retry_delay(&self) -> Duration {
        Duration::from_millis(self.feed_retry_delay_ms)
    }

    /// Deadline given to a fresh attempt: resource wait plus action budget.
    pub fn attempt_budget(&self) -> Duration {
        Duration::from_millis(self.resource_timeout_ms.saturating_add(self.action_timeout_ms))
    }

    /// Longest a single availability poll can take, retries included.
    pub fn feed_budget(&self) -> Duration {
        let attempts = self.feed_retry_attempts.saturating_add(1);
        self.feed_timeout()
            .saturating_mul(attempts)
            .saturating_add(self.feed_retry_delay().saturating_mul(attempts - 1))
    }

    pub fn attempt_limits(&self) -> AttemptLimits {
        AttemptLimits {
            resource_timeout: Duration::from_millis(self.resource_timeout_ms),
            teardown_timeout: Duration::from_millis(self.teardown_timeout_ms),
            teardown_policy: self.teardown_timeout_policy,
        }
    }
}
