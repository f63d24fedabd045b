//! Per-host deploy state

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use rollout_inventory::Host;

use crate::command::DeployResult;

/// Why a host reached `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionResult {
    Success,
    Aborted,
}

/// Where a host is in its deploy.
///
/// Transitions are strictly `Pending -> Deploying -> Complete`; both complete
/// branches are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum HostState {
    Pending,
    Deploying,
    Complete {
        result: CompletionResult,
        /// Set when the host aborted on a transport error: whether the host
        /// source expected it to be in service
        should_be_alive: Option<bool>,
        results: Vec<DeployResult>,
    },
}

/// The engine-owned map of host id to state.
///
/// Mutated only by the engine in response to its own transitions; the mutex
/// is held just long enough to swap a state.
pub struct DeployStateMap {
    states: Mutex<HashMap<String, HostState>>,
}

impl DeployStateMap {
    /// Every host starts out pending
    pub fn new(hosts: &[Host]) -> Self {
        let states = hosts
            .iter()
            .map(|host| (host.id.clone(), HostState::Pending))
            .collect();
        Self {
            states: Mutex::new(states),
        }
    }

    fn transition(&self, host: &Host, from_pending: bool, next: HostState) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        match states.get(&host.id) {
            Some(HostState::Pending) if from_pending => {
                states.insert(host.id.clone(), next);
            }
            Some(HostState::Deploying) if !from_pending => {
                states.insert(host.id.clone(), next);
            }
            other => {
                warn!(host = %host, state = ?other, "refusing invalid host state transition");
            }
        }
    }

    /// `Pending -> Deploying`, at semaphore acquisition
    pub fn mark_deploying(&self, host: &Host) {
        self.transition(host, true, HostState::Deploying);
    }

    /// `Deploying -> Complete(Success)`, at `host.end`
    pub fn mark_success(&self, host: &Host, results: Vec<DeployResult>) {
        self.transition(
            host,
            false,
            HostState::Complete {
                result: CompletionResult::Success,
                should_be_alive: None,
                results,
            },
        );
    }

    /// `Deploying -> Complete(Aborted)`, at `host.abort` or when the host's
    /// task died some other way
    pub fn mark_aborted(&self, host: &Host, should_be_alive: Option<bool>) {
        self.transition(
            host,
            false,
            HostState::Complete {
                result: CompletionResult::Aborted,
                should_be_alive,
                results: Vec::new(),
            },
        );
    }

    /// Point-in-time copy of every host's state
    pub fn snapshot(&self) -> HashMap<String, HostState> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
