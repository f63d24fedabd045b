//! Engine error types

use rollout_exec::TransportError;
use thiserror::Error;

/// A clean, operator-requested shutdown.
///
/// Raised by event subscribers (precheck refusal, pause-menu exit) and always
/// routed through a single `deploy.abort` event.
#[derive(Error, Debug, Clone)]
#[error("{reason}")]
pub struct AbortDeploy {
    /// Human-readable explanation shown in the abort banner
    pub reason: String,
}

impl AbortDeploy {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failures that end a deploy, or one host's part in it.
#[derive(Error, Debug, Clone)]
pub enum DeployError {
    /// The transport could not start up at all
    #[error("could not initialize transport: {0}")]
    TransportInit(#[source] TransportError),

    /// Signal handlers could not be installed
    #[error("could not install signal handlers: {0}")]
    Signals(String),

    /// One host failed; the rest of the deploy continues
    #[error("{host}: {error}")]
    Host {
        /// Display name of the failed host
        host: String,
        #[source]
        error: TransportError,
    },

    /// A component was synchronized but the buildhost returned no token for it
    #[error("{component}: build token not generated")]
    ComponentNotBuilt {
        /// The component that never got a deploy token
        component: String,
    },

    /// Anything else that went wrong during the sync/build phase
    #[error("unexpected error in sync/build")]
    Build,

    /// The deploy was stopped before finishing
    #[error("{0}")]
    Aborted(String),
}

impl From<AbortDeploy> for DeployError {
    fn from(abort: AbortDeploy) -> Self {
        DeployError::Aborted(abort.reason)
    }
}
