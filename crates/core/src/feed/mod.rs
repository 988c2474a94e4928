//! Item availability feeds.

mod file;
mod static_feed;
mod traits;

use thiserror::Error;

pub use file::FileAvailabilityFeed;
pub use static_feed::StaticAvailabilityFeed;
pub use traits::{AvailabilityFeed, AvailabilityMap};

/// Errors from an availability poll.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The source could not be reached or read.
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something unreadable.
    #[error("feed parse error: {0}")]
    Parse(String),

    /// The poll did not finish in time.
    #[error("feed poll timed out after {0}ms")]
    Timeout(u64),
}
