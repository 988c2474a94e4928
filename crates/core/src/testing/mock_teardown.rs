//! Mock teardown action for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::acquisition::{TeardownAction, TeardownError};
use crate::arbiter::ResourceToken;
use crate::deadline::DeadlineSignal;

/// Mock implementation of the TeardownAction trait.
///
/// Sleeps for the configured duration without watching the deadline, so a
/// long duration behaves like a hung cleanup.
#[derive(Debug)]
pub struct MockTeardownAction {
    holders: Arc<RwLock<Vec<String>>>,
    duration: Arc<RwLock<Duration>>,
    next_error: Arc<RwLock<Option<TeardownError>>>,
}

impl Default for MockTeardownAction {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTeardownAction {
    pub fn new() -> Self {
        Self {
            holders: Arc::new(RwLock::new(Vec::new())),
            duration: Arc::new(RwLock::new(Duration::ZERO)),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_duration(&self, duration: Duration) {
        *self.duration.write().await = duration;
    }

    pub async fn set_next_error(&self, error: TeardownError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn call_count(&self) -> usize {
        self.holders.read().await.len()
    }

    /// Resource holders seen, in call order.
    pub async fn recorded_holders(&self) -> Vec<String> {
        self.holders.read().await.clone()
    }
}

#[async_trait]
impl TeardownAction for MockTeardownAction {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(
        &self,
        token: &ResourceToken,
        _deadline: &DeadlineSignal,
    ) -> Result<(), TeardownError> {
        self.holders.write().await.push(token.holder().to_string());

        let duration = *self.duration.read().await;
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }

        match self.next_error.write().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
