use std::collections::BTreeMap;

use super::{CycleSnapshot, CycleTimer};
use crate::arbiter::ResourceStatus;
use crate::feed::AvailabilityMap;
use crate::state::ItemState;

/// Subscriber-side copy of the system state, rebuilt from snapshots.
///
/// Applying a snapshot that is not newer than the current one is a no-op,
/// so replays and out-of-order deliveries leave the replica unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotReplica {
    cycle_id: Option<u64>,
    items: BTreeMap<String, ItemState>,
    order: Vec<String>,
    availability: AvailabilityMap,
    availability_stale: bool,
    timer: CycleTimer,
    resource: ResourceStatus,
}

impl SnapshotReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the replica with `snapshot` if it is newer. Returns whether
    /// anything changed.
    pub fn apply(&mut self, snapshot: &CycleSnapshot) -> bool {
        if self.cycle_id.is_some_and(|current| snapshot.cycle_id <= current) {
            return false;
        }

        self.cycle_id = Some(snapshot.cycle_id);
        self.order = snapshot.items.iter().map(|s| s.id.clone()).collect();
        self.items = snapshot
            .items
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        self.availability = snapshot.availability.clone();
        self.availability_stale = snapshot.availability_stale;
        self.timer = snapshot.timer.clone();
        self.resource = snapshot.resource.clone();
        true
    }

    pub fn cycle_id(&self) -> Option<u64> {
        self.cycle_id
    }

    pub fn item(&self, id: &str) -> Option<&ItemState> {
        self.items.get(id)
    }

    /// Items in the priority order of the last applied snapshot.
    pub fn items(&self) -> Vec<&ItemState> {
        self.order.iter().filter_map(|id| self.items.get(id)).collect()
    }

    pub fn availability(&self) -> &AvailabilityMap {
        &self.availability
    }

    pub fn availability_stale(&self) -> bool {
        self.availability_stale
    }

    pub fn timer(&self) -> &CycleTimer {
        &self.timer
    }

    pub fn resource(&self) -> &ResourceStatus {
        &self.resource
    }
}
