//! Host value type

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A deploy target.
///
/// `id` is the canonical unique key (instance identifier or similar); `name`
/// is the display name, `address` is what the transport dials, and `pool` is
/// the operational grouping used for canary selection and interleaving.
/// Equality and hashing go by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Canonical unique key
    pub id: String,
    /// Display name
    pub name: String,
    /// Network endpoint fed to the transport
    pub address: String,
    /// Group label (e.g. autoscaling group), may be empty
    pub pool: String,
}

impl Host {
    /// Create a new host
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            pool: pool.into(),
        }
    }

    /// Build a synthetic host from a bare hostname.
    ///
    /// Used for the code-host, which is not part of the fleet: id, name and
    /// address are all the hostname and the pool is empty.
    pub fn from_hostname(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name: name.clone(),
            address: name,
            pool: String::new(),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
