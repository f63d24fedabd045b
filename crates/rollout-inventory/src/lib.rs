//! rollout-inventory: fleet membership and liveness
//!
//! Defines the `Host` value type and the `HostSource` trait the deploy engine
//! queries for the fleet, plus the static and mock sources.

pub mod error;
pub mod mock;
pub mod source;
pub mod static_source;
pub mod types;

pub use error::HostSourceError;
pub use mock::MockHostSource;
pub use source::HostSource;
pub use static_source::{HostEntry, StaticHostSource};
pub use types::Host;
