//! Error types for rollout-exec

use thiserror::Error;

/// Errors that can occur while talking to a host.
///
/// Every variant is a per-host failure from the engine's point of view: the
/// host is reported and skipped, the deploy moves on.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Failed to open a channel to the host
    #[error("could not connect: {0}")]
    Connection(String),

    /// Credential loading or authentication failed
    #[error("ssh key error: {0}")]
    Key(String),

    /// Command channel could not be opened on an established session
    #[error("could not open command channel: {0}")]
    Channel(String),

    /// Remote command exited non-zero
    #[error("remote command exited with status {0}")]
    NonZeroStatus(u32),

    /// Remote command was killed by a signal
    #[error("remote command was terminated by signal {0}")]
    Signal(String),

    /// Remote command produced output that is not a JSON object
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Command ran longer than the execution timeout
    #[error("{command:?} timed out after {seconds} seconds")]
    ExecutionTimeout {
        /// The command line that was running
        command: String,
        /// The configured limit
        seconds: u64,
    },
}
