//! rollout-exec: remote command execution
//!
//! Provides the `Transport`/`Connection` traits the deploy engine drives,
//! the SSH implementation, and a scriptable mock for rehearsals and tests.

pub mod error;
pub mod mock;
pub mod ssh;
pub mod traits;

pub use error::TransportError;
pub use mock::MockTransport;
pub use ssh::{SshConfig, SshTransport};
pub use traits::{Connection, ResultMap, Transport};
