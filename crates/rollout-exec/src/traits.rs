//! Transport traits

use async_trait::async_trait;

use crate::error::TransportError;

/// Structured result of one remote command: an opaque JSON object.
pub type ResultMap = serde_json::Map<String, serde_json::Value>;

/// Opens command channels to hosts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// One-time setup, e.g. loading credentials.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Open a command channel to `address`.
    async fn connect_to(&self, address: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// A command channel to a single host.
///
/// The engine runs a host's full command sequence on one connection and then
/// disconnects; there is no reconnect or retry at this layer.
#[async_trait]
pub trait Connection: Send {
    /// Execute one command and return its structured result.
    ///
    /// `timeout_secs == 0` disables the execution timeout.
    async fn execute(
        &mut self,
        command: &[String],
        timeout_secs: u64,
    ) -> Result<ResultMap, TransportError>;

    /// Close the channel.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
