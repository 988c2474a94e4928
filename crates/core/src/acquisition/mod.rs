//! Acquisition attempts: the storefront-facing actions and the worker that
//! drives one attempt from resource wait to terminal state.

mod config;
mod simulated;
mod traits;
mod types;
mod worker;

pub use config::SimulationConfig;
pub use simulated::{order_number, SimulatedAcquisition, SimulatedTeardown};
pub use traits::{AcquisitionAction, TeardownAction};
pub use types::{ActionError, ActionOutcome, TeardownError, TeardownTimeoutPolicy};
pub use worker::{AcquisitionWorker, AttemptLimits, AttemptReport, WorkerContext};
