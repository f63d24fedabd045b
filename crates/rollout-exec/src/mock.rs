//! Mock transport for rehearsal deploys and engine tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::error::TransportError;
use crate::traits::{Connection, ResultMap, Transport};

/// In-memory transport that answers the deploy command protocol.
///
/// Defaults mimic a healthy fleet: `synchronize` hands out sync tokens,
/// `build` answers with deploy tokens, `deploy` reports nothing notable and
/// `restart`/`wait-until-components-ready` return empty results. Tests and
/// rehearsals can override responses per command, refuse connections to
/// chosen addresses, mark addresses as no-op deploys, and delay commands to
/// exercise the execution timeout.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    refused: Mutex<HashSet<String>>,
    noop_deploys: Mutex<HashSet<String>>,
    responses: Mutex<HashMap<String, Result<ResultMap, TransportError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    executed: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections to `address`
    #[must_use]
    pub fn refusing(self, address: &str) -> Self {
        self.state
            .refused
            .lock()
            .unwrap()
            .insert(address.to_string());
        self
    }

    /// Make `deploy` report `repo_unchanged` for every component on `address`
    #[must_use]
    pub fn noop_deploys_on(self, address: &str) -> Self {
        self.state
            .noop_deploys
            .lock()
            .unwrap()
            .insert(address.to_string());
        self
    }

    /// Fix the response for a command name, for every host
    #[must_use]
    pub fn responding(self, command: &str, response: ResultMap) -> Self {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Ok(response));
        self
    }

    /// Fail a command name with `error`, for every host
    #[must_use]
    pub fn failing(self, command: &str, error: TransportError) -> Self {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Err(error));
        self
    }

    /// Delay a command, so a nonzero execution timeout can expire
    #[must_use]
    pub fn delaying(self, command: &str, delay: Duration) -> Self {
        self.state
            .delays
            .lock()
            .unwrap()
            .insert(command.to_string(), delay);
        self
    }

    /// Every command executed so far, as `(address, argv)` pairs
    pub fn executed(&self) -> Vec<(String, Vec<String>)> {
        self.state.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect_to(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        if self.state.refused.lock().unwrap().contains(address) {
            return Err(TransportError::Connection(format!(
                "connection refused by {address}"
            )));
        }
        Ok(Box::new(MockConnection {
            address: address.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    address: String,
    state: Arc<MockState>,
}

impl MockConnection {
    fn default_response(&self, name: &str, args: &[String]) -> Result<ResultMap, TransportError> {
        let value = match name {
            "synchronize" => {
                let mut map = serde_json::Map::new();
                for component in args {
                    map.insert(
                        component.clone(),
                        json!({"token": format!("sync-{component}"), "buildhost": "build-01"}),
                    );
                }
                Value::Object(map)
            }
            "build" => {
                let mut map = serde_json::Map::new();
                for build_ref in args {
                    let component = build_ref.split('@').next().unwrap_or(build_ref);
                    map.insert(
                        build_ref.clone(),
                        Value::String(format!("deploy-{component}")),
                    );
                }
                Value::Object(map)
            }
            "deploy" => {
                let noop = self.state.noop_deploys.lock().unwrap().contains(&self.address);
                let mut map = serde_json::Map::new();
                if noop {
                    for deploy_ref in args {
                        let component = deploy_ref.split('@').next().unwrap_or(deploy_ref);
                        map.insert(
                            component.to_string(),
                            Value::String("repo_unchanged".to_string()),
                        );
                    }
                }
                Value::Object(map)
            }
            "restart" | "wait-until-components-ready" => json!({}),
            "components" => json!({
                "components": {
                    "example": {
                        "fbcedda5b56618db18426f90a06f1f62984b95e8": 3,
                    },
                },
            }),
            // the remote binary answers unknown commands with exit 127
            _ => return Err(TransportError::NonZeroStatus(127)),
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => unreachable!("mock responses are objects"),
        }
    }

    async fn run(&self, command: &[String]) -> Result<ResultMap, TransportError> {
        let (name, args) = command
            .split_first()
            .ok_or_else(|| TransportError::MalformedResponse("empty command".to_string()))?;

        let delay = self.state.delays.lock().unwrap().get(name).copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        debug!(host = %self.address, command = %name, "mock execution");

        let scripted = self.state.responses.lock().unwrap().get(name).cloned();
        match scripted {
            Some(response) => response,
            None => self.default_response(name, args),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(
        &mut self,
        command: &[String],
        timeout_secs: u64,
    ) -> Result<ResultMap, TransportError> {
        self.state
            .executed
            .lock()
            .unwrap()
            .push((self.address.clone(), command.to_vec()));

        if timeout_secs == 0 {
            return self.run(command).await;
        }
        match timeout(Duration::from_secs(timeout_secs), self.run(command)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ExecutionTimeout {
                command: command.join(" "),
                seconds: timeout_secs,
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
