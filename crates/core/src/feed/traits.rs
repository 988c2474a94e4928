use std::collections::BTreeMap;

use async_trait::async_trait;

use super::FeedError;

/// Availability of every item the feed knows about, keyed by item id.
pub type AvailabilityMap = BTreeMap<String, bool>;

/// Source of per-item availability, polled once per cycle.
#[async_trait]
pub trait AvailabilityFeed: Send + Sync {
    /// Name of the feed for logs.
    fn name(&self) -> &str;

    /// Fetch the current availability map.
    ///
    /// An error means "unknown", never "unavailable".
    async fn poll(&self) -> Result<AvailabilityMap, FeedError>;
}
