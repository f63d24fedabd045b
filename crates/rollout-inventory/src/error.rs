//! Error types for rollout-inventory

use thiserror::Error;

/// Errors raised while listing the fleet
#[derive(Error, Debug, Clone)]
pub enum HostSourceError {
    /// The backing store could not be reached or answered garbage
    #[error("could not fetch host list: {0}")]
    Backend(String),

    /// A configured host entry could not be understood
    #[error("invalid host entry {entry:?}: {reason}")]
    InvalidEntry {
        /// The offending entry as written
        entry: String,
        /// What was wrong with it
        reason: String,
    },
}
