use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use super::ActivityRecord;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Filter for querying activity records
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub item_id: Option<String>,
    pub event_type: Option<String>,
    pub limit: usize,
}

impl ActivityFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, record: &ActivityRecord) -> bool {
        self.item_id
            .as_deref()
            .is_none_or(|id| record.item_id.as_deref() == Some(id))
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| record.event_type == t)
    }
}

/// Storage for activity records
pub trait ActivityStore: Send + Sync {
    /// Insert a record, returns the assigned ID
    fn insert(&self, record: ActivityRecord) -> Result<u64, ActivityError>;

    /// Newest-first records matching the filter
    fn query(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>, ActivityError>;

    /// Number of matching records
    fn count(&self, filter: &ActivityFilter) -> Result<usize, ActivityError>;
}

struct Ring {
    records: VecDeque<ActivityRecord>,
    next_id: u64,
}

/// Bounded in-memory store; the oldest record is evicted when full.
pub struct MemoryActivityStore {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl MemoryActivityStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl ActivityStore for MemoryActivityStore {
    fn insert(&self, mut record: ActivityRecord) -> Result<u64, ActivityError> {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ring.next_id;
        ring.next_id += 1;
        record.id = id;

        if ring.records.len() == self.capacity {
            ring.records.pop_front();
        }
        ring.records.push_back(record);
        Ok(id)
    }

    fn query(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>, ActivityError> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ring
            .records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit)
            .cloned()
            .collect())
    }

    fn count(&self, filter: &ActivityFilter) -> Result<usize, ActivityError> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ring.records.iter().filter(|r| filter.matches(r)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityEvent;
    use chrono::Utc;

    fn record(event: ActivityEvent) -> ActivityRecord {
        ActivityRecord {
            id: 0,
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            item_id: event.item_id().map(String::from),
            user_id: event.user_id().map(String::from),
            message: event.message(),
            data: event,
        }
    }

    fn reset(item: &str) -> ActivityRecord {
        record(ActivityEvent::ItemReset {
            item_id: item.to_string(),
            from_status: "failed".to_string(),
        })
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let store = MemoryActivityStore::new(3);
        for i in 0..5 {
            store.insert(reset(&format!("item-{}", i))).unwrap();
        }

        let all = store.query(&ActivityFilter::new()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].item_id.as_deref(), Some("item-4"));
        assert_eq!(all[2].item_id.as_deref(), Some("item-2"));
        assert_eq!(all[0].id, 5);
    }

    #[test]
    fn test_filters() {
        let store = MemoryActivityStore::new(10);
        store.insert(reset("a")).unwrap();
        store.insert(reset("b")).unwrap();
        store
            .insert(record(ActivityEvent::RefreshRequested {
                requested_by: "operator".to_string(),
            }))
            .unwrap();

        let by_item = store.query(&ActivityFilter::new().with_item_id("a")).unwrap();
        assert_eq!(by_item.len(), 1);

        let by_type = ActivityFilter::new().with_event_type("item_reset");
        assert_eq!(store.count(&by_type).unwrap(), 2);

        let limited = store.query(&ActivityFilter::new().with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].event_type, "refresh_requested");
    }
}
