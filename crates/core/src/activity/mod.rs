//! Operator-facing activity log.
//!
//! Components emit `ActivityEvent`s through a cloneable `ActivityHandle`; a
//! background `ActivityWriter` stores them in an `ActivityStore`.

mod events;
mod handle;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use store::*;
pub use writer::*;
