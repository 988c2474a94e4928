//! Durable per-item state machines.
//!
//! The `StateStore` is the only way an item's status changes. Every change
//! goes through a compare-and-transition call that checks the current status
//! and persists the result before the lock is released.

mod persistence;
mod sqlite;
mod store;
mod types;

use thiserror::Error;

pub use persistence::{JsonFilePersistence, MemoryPersistence, StatePersistence};
pub use sqlite::SqlitePersistence;
pub use store::StateStore;
pub use types::{FailureReason, FinalOutcome, ItemState, ItemStatus, Transition};

/// Errors from the state store and its backends.
#[derive(Debug, Error)]
pub enum StateError {
    /// No record exists for this id.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// A write would break the status/deadline invariant.
    #[error("state invariant violated: {0}")]
    Invariant(String),

    /// The backend failed; the in-memory change was rolled back.
    #[error("persistence error: {0}")]
    Persistence(String),
}
