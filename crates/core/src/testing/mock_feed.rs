//! Mock availability feed for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::feed::{AvailabilityFeed, AvailabilityMap, FeedError};

/// Mock implementation of the AvailabilityFeed trait.
///
/// Serves a settable map. Failures can be queued and are returned before
/// the map, one per poll.
#[derive(Debug)]
pub struct MockAvailabilityFeed {
    map: Arc<RwLock<AvailabilityMap>>,
    failures: Arc<RwLock<VecDeque<FeedError>>>,
    delay: Arc<RwLock<Duration>>,
    polls: Arc<RwLock<usize>>,
}

impl Default for MockAvailabilityFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAvailabilityFeed {
    pub fn new() -> Self {
        Self {
            map: Arc::new(RwLock::new(AvailabilityMap::new())),
            failures: Arc::new(RwLock::new(VecDeque::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            polls: Arc::new(RwLock::new(0)),
        }
    }

    /// Create a feed with every listed item available.
    pub fn available(ids: &[&str]) -> Self {
        let mut feed = Self::new();
        let map = ids.iter().map(|id| (id.to_string(), true)).collect();
        feed.map = Arc::new(RwLock::new(map));
        feed
    }

    pub async fn set(&self, item_id: &str, available: bool) {
        self.map.write().await.insert(item_id.to_string(), available);
    }

    /// Queue `count` failing polls.
    pub async fn fail_next(&self, count: usize, error: FeedError) {
        let mut failures = self.failures.write().await;
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Delay every poll (to exercise the poll timeout).
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn poll_count(&self) -> usize {
        *self.polls.read().await
    }
}

#[async_trait]
impl AvailabilityFeed for MockAvailabilityFeed {
    fn name(&self) -> &str {
        "mock"
    }

    async fn poll(&self) -> Result<AvailabilityMap, FeedError> {
        *self.polls.write().await += 1;

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failures.write().await.pop_front() {
            return Err(err);
        }
        Ok(self.map.read().await.clone())
    }
}
