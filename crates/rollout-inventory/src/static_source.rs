//! Config-backed host source

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostSourceError;
use crate::source::HostSource;
use crate::types::Host;

/// One host as written in the `[hostsource]` config table.
///
/// `name` and `address` default to `id`; `pool` defaults to empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    /// Canonical unique key
    pub id: String,
    /// Display name (defaults to `id`)
    pub name: Option<String>,
    /// Network endpoint (defaults to `id`)
    pub address: Option<String>,
    /// Group label
    #[serde(default)]
    pub pool: String,
}

impl HostEntry {
    fn into_host(self) -> Result<Host, HostSourceError> {
        if self.id.is_empty() {
            return Err(HostSourceError::InvalidEntry {
                entry: String::new(),
                reason: "empty host id".to_string(),
            });
        }
        let name = self.name.unwrap_or_else(|| self.id.clone());
        let address = self.address.unwrap_or_else(|| self.id.clone());
        Ok(Host::new(self.id, name, address, self.pool))
    }
}

/// Host source backed by a fixed list from the profile.
///
/// Stands in for registry-backed sources: every listed host is expected to be
/// in service, so `should_be_alive` is always `true`.
pub struct StaticHostSource {
    hosts: Vec<Host>,
}

impl StaticHostSource {
    /// Build from already-constructed hosts
    pub fn new(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    /// Build from config entries
    pub fn from_entries(entries: Vec<HostEntry>) -> Result<Self, HostSourceError> {
        let hosts = entries
            .into_iter()
            .map(HostEntry::into_host)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hosts })
    }
}

#[async_trait]
impl HostSource for StaticHostSource {
    async fn get_hosts(&self) -> Result<Vec<Host>, HostSourceError> {
        Ok(self.hosts.clone())
    }

    async fn should_be_alive(&self, _host: &Host) -> bool {
        true
    }
}
