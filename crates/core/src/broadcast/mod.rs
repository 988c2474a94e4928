//! Per-cycle snapshot publication.
//!
//! The orchestrator publishes one immutable `CycleSnapshot` per cycle through
//! the `EventBroadcaster`; subscribers can keep a `SnapshotReplica`.

mod broadcaster;
mod replica;
mod types;

pub use broadcaster::{
    EventBroadcaster, PublishReport, SnapshotSubscription, DEFAULT_SUBSCRIBER_BUFFER,
};
pub use replica::SnapshotReplica;
pub use types::{CycleSnapshot, CycleTimer, DrainReport, StateTransition, TransitionKind};
