//! Cycle orchestrator.
//!
//! The orchestrator drives items through their state machines:
//! - **Drain**: bounded wait for the previous cycle's workers, force clear on timeout
//! - **Availability**: one feed poll per cycle, previous map reused on failure
//! - **Reconcile**: resets first, then launches in priority order
//! - **Publish**: one snapshot per cycle, then a random idle wait

mod config;
mod runner;
mod types;

pub use config::{CycleSettings, ItemEntry, OrchestratorConfig};
pub use runner::{CycleOrchestrator, OrchestratorDeps};
pub use types::{CycleReport, OrchestratorError, OrchestratorStatus, TimerState};
