//! Host source trait

use async_trait::async_trait;

use crate::error::HostSourceError;
use crate::types::Host;

/// Where the fleet comes from.
///
/// The deploy engine resolves host references against `get_hosts` and asks
/// `should_be_alive` when a host errors out, to decide whether the failure is
/// worth shouting about.
#[async_trait]
pub trait HostSource: Send + Sync {
    /// Return the entire fleet.
    async fn get_hosts(&self) -> Result<Vec<Host>, HostSourceError>;

    /// Whether the host is expected to be in service right now.
    ///
    /// Implementations must fail safe: if the backing store cannot answer,
    /// return `true` so transport errors are not silently downgraded. Only a
    /// positive "this host is gone" answer should return `false`.
    async fn should_be_alive(&self, host: &Host) -> bool;
}
