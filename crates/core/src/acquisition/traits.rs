use async_trait::async_trait;

use super::{ActionError, ActionOutcome, TeardownError};
use crate::arbiter::ResourceToken;
use crate::deadline::DeadlineSignal;

/// Drives one acquisition against the storefront.
///
/// Implementations may watch `deadline` to stop early; the worker also races
/// the call against it and drops the future once it expires.
#[async_trait]
pub trait AcquisitionAction: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        item_id: &str,
        token: &ResourceToken,
        deadline: &DeadlineSignal,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Cleans up the automation resource after an attempt.
#[async_trait]
pub trait TeardownAction: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        token: &ResourceToken,
        deadline: &DeadlineSignal,
    ) -> Result<(), TeardownError>;
}
