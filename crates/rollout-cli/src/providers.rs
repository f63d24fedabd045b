//! Provider wiring
//!
//! Turns the `[hostsource]` and `[transport]` config tables into live
//! implementations. Unknown provider names never get this far: the tagged
//! config enums reject them at parse time.

use std::sync::Arc;

use rollout_exec::{MockTransport, SshTransport, Transport};
use rollout_inventory::{HostSource, MockHostSource, StaticHostSource};

use crate::config::{ConfigError, HostSourceConfig, TransportConfig};

pub fn build_host_source(config: &HostSourceConfig) -> Result<Arc<dyn HostSource>, ConfigError> {
    match config {
        HostSourceConfig::Static { hosts } => {
            let source = StaticHostSource::from_entries(hosts.clone())
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            Ok(Arc::new(source))
        }
        HostSourceConfig::Mock {
            app_hosts,
            job_hosts,
        } => Ok(Arc::new(MockHostSource::new(*app_hosts, *job_hosts))),
    }
}

pub fn build_transport(config: &TransportConfig) -> Arc<dyn Transport> {
    match config {
        TransportConfig::Ssh { ssh } => Arc::new(SshTransport::new(ssh.clone())),
        TransportConfig::Mock => Arc::new(MockTransport::new()),
    }
}
