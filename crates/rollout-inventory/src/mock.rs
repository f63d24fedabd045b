//! Mock host source for rehearsal deploys

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::HostSourceError;
use crate::source::HostSource;
use crate::types::Host;

/// Synthesizes a two-pool fleet of `app-NN` and `job-NN` hosts.
///
/// Useful for rehearsing a deploy against the mock transport without touching
/// real machines. Hosts whose ids are in `terminated` report
/// `should_be_alive = false`.
pub struct MockHostSource {
    app_hosts: usize,
    job_hosts: usize,
    terminated: HashSet<String>,
}

impl MockHostSource {
    /// A fleet with `app_hosts` hosts in the `app` pool and `job_hosts` in `job`
    pub fn new(app_hosts: usize, job_hosts: usize) -> Self {
        Self {
            app_hosts,
            job_hosts,
            terminated: HashSet::new(),
        }
    }

    /// Mark host ids as terminated
    #[must_use]
    pub fn with_terminated(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.terminated.extend(ids);
        self
    }
}

impl Default for MockHostSource {
    fn default() -> Self {
        Self::new(12, 4)
    }
}

#[async_trait]
impl HostSource for MockHostSource {
    async fn get_hosts(&self) -> Result<Vec<Host>, HostSourceError> {
        let mut hosts = Vec::with_capacity(self.app_hosts + self.job_hosts);
        for i in 1..=self.app_hosts {
            let name = format!("app-{i:02}");
            hosts.push(Host::new(name.clone(), name.clone(), name, "app"));
        }
        for i in 1..=self.job_hosts {
            let name = format!("job-{i:02}");
            hosts.push(Host::new(name.clone(), name.clone(), name, "job"));
        }
        Ok(hosts)
    }

    async fn should_be_alive(&self, host: &Host) -> bool {
        !self.terminated.contains(&host.id)
    }
}
