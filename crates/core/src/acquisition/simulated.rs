//! Simulated storefront for dry runs and demos.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::{
    AcquisitionAction, ActionError, ActionOutcome, SimulationConfig, TeardownAction,
    TeardownError,
};
use crate::arbiter::ResourceToken;
use crate::deadline::DeadlineSignal;

const REJECTION_REASONS: &[&str] = &[
    "item went out of stock at checkout",
    "payment authorization declined",
    "purchase limit reached for this item",
    "checkout session expired",
];

fn random_duration(min_ms: u64, max_ms: u64) -> Duration {
    let (lo, hi) = if min_ms <= max_ms {
        (min_ms, max_ms)
    } else {
        (max_ms, min_ms)
    };
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

/// Order reference in the storefront's `ORD-XXXXXX-XX` shape.
pub fn order_number() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "ORD-{:06}-{:02}",
        rng.gen_range(100_000..1_000_000),
        rng.gen_range(10..100)
    )
}

/// Checkout that sleeps for a random duration and succeeds with a
/// configured probability.
#[derive(Debug, Clone)]
pub struct SimulatedAcquisition {
    config: SimulationConfig,
}

impl SimulatedAcquisition {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AcquisitionAction for SimulatedAcquisition {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(
        &self,
        item_id: &str,
        _token: &ResourceToken,
        deadline: &DeadlineSignal,
    ) -> Result<ActionOutcome, ActionError> {
        let duration = random_duration(self.config.action_min_ms, self.config.action_max_ms);
        let succeed = rand::thread_rng().gen_bool(self.config.success_rate.clamp(0.0, 1.0));

        debug!(item_id = %item_id, duration_ms = duration.as_millis() as u64, "Simulating checkout");

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = deadline.expired() => return Err(ActionError::Timeout),
        }

        if succeed {
            Ok(ActionOutcome::Purchased {
                order_number: Some(order_number()),
            })
        } else {
            let idx = rand::thread_rng().gen_range(0..REJECTION_REASONS.len());
            Ok(ActionOutcome::Rejected {
                reason: REJECTION_REASONS[idx].to_string(),
            })
        }
    }
}

/// Teardown that sleeps for a random duration.
#[derive(Debug, Clone)]
pub struct SimulatedTeardown {
    config: SimulationConfig,
}

impl SimulatedTeardown {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TeardownAction for SimulatedTeardown {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(
        &self,
        token: &ResourceToken,
        deadline: &DeadlineSignal,
    ) -> Result<(), TeardownError> {
        let duration = random_duration(self.config.teardown_min_ms, self.config.teardown_max_ms);
        debug!(holder = %token.holder(), duration_ms = duration.as_millis() as u64, "Simulating teardown");

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = deadline.expired() => Err(TeardownError::Timeout),
        }
    }
}
