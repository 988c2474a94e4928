use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AvailabilityFeed, AvailabilityMap, FeedError};

/// Feed serving a fixed map, editable at runtime. Used for dry runs.
#[derive(Debug, Default)]
pub struct StaticAvailabilityFeed {
    map: RwLock<AvailabilityMap>,
}

impl StaticAvailabilityFeed {
    pub fn new(map: AvailabilityMap) -> Self {
        Self {
            map: RwLock::new(map),
        }
    }

    /// All `tracked` ids, with those in `available` marked available.
    pub fn from_lists<'a>(
        tracked: impl IntoIterator<Item = &'a str>,
        available: &[String],
    ) -> Self {
        let map = tracked
            .into_iter()
            .map(|id| (id.to_string(), available.iter().any(|a| a == id)))
            .chain(available.iter().map(|id| (id.clone(), true)))
            .collect();
        Self::new(map)
    }

    pub async fn set(&self, item_id: &str, available: bool) {
        self.map.write().await.insert(item_id.to_string(), available);
    }
}

#[async_trait]
impl AvailabilityFeed for StaticAvailabilityFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn poll(&self) -> Result<AvailabilityMap, FeedError> {
        Ok(self.map.read().await.clone())
    }
}
