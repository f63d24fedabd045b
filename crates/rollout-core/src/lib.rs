//! rollout-core: the deploy engine
//!
//! Orchestrates a rolling deploy: resolves and orders the host list, drives
//! the build phase on the code-host, fans out per-host command sequences
//! under a parallelism budget, and publishes lifecycle events that front-ends
//! and notification sinks subscribe to.

pub mod command;
pub mod deploy;
pub mod error;
pub mod eventbus;
pub mod hostlist;
pub mod state;

pub use command::{CheckResult, Command, DeployResult};
pub use deploy::{Deployer, DeployerArgs};
pub use error::{AbortDeploy, DeployError};
pub use eventbus::{Event, EventBus, Subscriber, SubscriberError};
pub use hostlist::HostlistError;
pub use state::{CompletionResult, HostState};
