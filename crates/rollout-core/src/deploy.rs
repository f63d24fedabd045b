//! The deploy engine
//!
//! Drives a rolling deploy: precheck, sync/build on the code-host, then a
//! semaphore-bounded fan-out of per-host command sequences. Everything the
//! outside world learns about the deploy comes over the event bus; everything
//! that can stop it (operator, signals, unexpected errors) funnels through a
//! single abort path that lets in-flight hosts settle first.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use rollout_exec::{ResultMap, Transport, TransportError};
use rollout_inventory::{Host, HostSource};

use crate::command::{CheckResult, Command, DeployResult};
use crate::error::{AbortDeploy, DeployError};
use crate::eventbus::{Event, EventBus};
use crate::state::{DeployStateMap, HostState};

const SIGINT_MESSAGE: &str = "received SIGINT";
const SIGHUP_MESSAGE: &str = "received SIGHUP. tsk tsk.";

/// Everything a `Deployer` needs.
pub struct DeployerArgs {
    pub host_source: Arc<dyn HostSource>,
    pub transport: Arc<dyn Transport>,
    pub event_bus: Arc<EventBus>,
    /// Maximum hosts in flight at once (at least 1)
    pub parallel: usize,
    /// Seconds to sleep between host enqueues
    pub sleeptime: u64,
    /// Per-command execution timeout in seconds; 0 disables
    pub execution_timeout: u64,
    /// Skip the synthetic wait-until-components-ready after restarts
    pub dangerously_fast: bool,
    /// Hostname of the machine that synchronizes source and delegates builds
    pub code_host: String,
}

/// The orchestrator.
pub struct Deployer {
    host_source: Arc<dyn HostSource>,
    transport: Arc<dyn Transport>,
    event_bus: Arc<EventBus>,
    parallel: usize,
    sleeptime: u64,
    execution_timeout: u64,
    dangerously_fast: bool,
    code_host: Host,
}

impl Deployer {
    /// The bus this deployer announces on; register subscribers here.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn new(args: DeployerArgs) -> Self {
        Self {
            host_source: args.host_source,
            transport: args.transport,
            event_bus: args.event_bus,
            parallel: args.parallel.max(1),
            sleeptime: args.sleeptime,
            execution_timeout: args.execution_timeout,
            dangerously_fast: args.dangerously_fast,
            code_host: Host::from_hostname(args.code_host),
        }
    }

    /// Run the whole deploy.
    ///
    /// Returns the final per-host states on a clean finish. Any error has
    /// already been announced over the bus (`deploy.abort`), except a
    /// transport that refused to initialize, which never got far enough to
    /// deserve one.
    pub async fn run_deploy(
        &self,
        hosts: Vec<Host>,
        components: Vec<String>,
        commands: Vec<Command>,
    ) -> Result<HashMap<String, HostState>, DeployError> {
        if let Err(abort) = self.event_bus.trigger(Event::DeployPrecheck).await {
            self.announce_abort(&abort.reason).await;
            return Err(abort.into());
        }

        self.transport
            .initialize()
            .await
            .map_err(DeployError::TransportInit)?;

        let aborter = Arc::new(Aborter::new());
        let signal_task = spawn_signal_listener(Arc::clone(&aborter))?;

        let state = Arc::new(DeployStateMap::new(&hosts));
        let outcome = self.drive(hosts, components, commands, &state, &aborter).await;
        signal_task.abort();

        match outcome {
            Err(error) => {
                self.announce_abort(&error.to_string()).await;
                Err(error)
            }
            Ok(()) => match aborter.reason() {
                Some(reason) => {
                    self.announce_abort(&reason).await;
                    Err(DeployError::Aborted(reason))
                }
                None => {
                    if let Err(late) = self.event_bus.trigger(Event::DeployEnd).await {
                        warn!(reason = %late.reason, "subscriber tried to abort during deploy.end");
                    }
                    Ok(state.snapshot())
                }
            },
        }
    }

    async fn drive(
        &self,
        hosts: Vec<Host>,
        components: Vec<String>,
        mut commands: Vec<Command>,
        state: &Arc<DeployStateMap>,
        aborter: &Arc<Aborter>,
    ) -> Result<(), DeployError> {
        self.event_bus.trigger(Event::DeployBegin).await?;

        if !components.is_empty() {
            commands = self.build_phase(&components, commands).await?;
        }

        self.rollout(&hosts, Arc::new(commands), state, aborter).await;
        Ok(())
    }

    async fn announce_abort(&self, reason: &str) {
        let event = Event::DeployAbort {
            reason: reason.to_string(),
        };
        if let Err(late) = self.event_bus.trigger(event).await {
            warn!(reason = %late.reason, "subscriber tried to abort during deploy.abort");
        }
    }

    /// Step E: synchronize on the code-host, build per buildhost, and prefix
    /// the command sequence with the synthesized deploy command.
    async fn build_phase(
        &self,
        components: &[String],
        mut commands: Vec<Command>,
    ) -> Result<Vec<Command>, DeployError> {
        self.event_bus.trigger(Event::BuildBegin).await?;

        let deploy_refs = match self.sync_and_build(components).await {
            Ok(deploy_refs) => deploy_refs,
            Err(
                error @ (DeployError::ComponentNotBuilt { .. }
                | DeployError::Aborted(_)
                | DeployError::Build),
            ) => return Err(error),
            Err(error) => {
                error!(error = %error, "unexpected error in sync/build");
                return Err(DeployError::Build);
            }
        };

        if !self.dangerously_fast
            && commands
                .iter()
                .any(|command| matches!(command, Command::Restart { .. }))
        {
            commands.push(Command::WaitUntilComponentsReady);
        }
        commands.insert(0, Command::Deploy { deploy_refs });

        self.event_bus.trigger(Event::BuildEnd).await?;
        Ok(commands)
    }

    async fn sync_and_build(&self, components: &[String]) -> Result<Vec<String>, DeployError> {
        let sync_command = Command::Synchronize {
            components: components.to_vec(),
        };
        let sync_info = self
            .run_build_command(&self.code_host, &sync_command)
            .await
            .map_err(|error| DeployError::Host {
                host: self.code_host.name.clone(),
                error,
            })?;

        self.event_bus
            .trigger(Event::BuildSync {
                sync_info: sync_info.clone(),
            })
            .await?;

        let mut deploy_refs = Vec::new();
        // buildhost -> [(component, sync token)], ordered so build commands
        // run in a stable order
        let mut buckets: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();

        for component in components {
            let info = sync_info.get(component).ok_or_else(|| {
                error!(component = %component, "synchronize result is missing the component");
                DeployError::Build
            })?;
            let token = info.get("token").and_then(|v| v.as_str()).ok_or_else(|| {
                error!(component = %component, "synchronize result has no token");
                DeployError::Build
            })?;

            match info.get("buildhost").and_then(|v| v.as_str()) {
                Some(buildhost) => buckets
                    .entry(buildhost.to_string())
                    .or_default()
                    .push((component.clone(), token.to_string())),
                // no buildhost means the sync token deploys as-is
                None => deploy_refs.push(format!("{component}@{token}")),
            }
        }

        for (buildhost, bucket) in buckets {
            let build_refs: Vec<String> = bucket
                .iter()
                .map(|(component, token)| format!("{component}@{token}"))
                .collect();
            let build_host = Host::from_hostname(&buildhost);
            let build_command = Command::Build {
                build_refs: build_refs.clone(),
            };
            let build_result = self
                .run_build_command(&build_host, &build_command)
                .await
                .map_err(|error| DeployError::Host {
                    host: build_host.name.clone(),
                    error,
                })?;

            for ((component, _), build_ref) in bucket.iter().zip(&build_refs) {
                let deploy_token = build_result
                    .get(build_ref)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| DeployError::ComponentNotBuilt {
                        component: component.clone(),
                    })?;
                deploy_refs.push(format!("{component}@{deploy_token}"));
            }
        }

        Ok(deploy_refs)
    }

    /// Run one command against the code-host or a buildhost. These runs are
    /// not deploy targets, so no `host.*` events fire for them.
    async fn run_build_command(
        &self,
        host: &Host,
        command: &Command,
    ) -> Result<ResultMap, TransportError> {
        let argv = command.cmdline();
        info!(host = %host, "{}", argv.join(" "));
        let mut connection = self.transport.connect_to(&host.address).await?;
        let result = connection.execute(&argv, self.execution_timeout).await?;
        connection.disconnect().await?;
        Ok(result)
    }

    /// Step F: enqueue hosts in order under the parallelism semaphore,
    /// sleeping between them, until done or aborted. Always waits for every
    /// spawned host task to settle before returning.
    async fn rollout(
        &self,
        hosts: &[Host],
        commands: Arc<Vec<Command>>,
        state: &Arc<DeployStateMap>,
        aborter: &Arc<Aborter>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let mut abort_rx = aborter.subscribe();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        'rollout: for (index, host) in hosts.iter().enumerate() {
            if index > 0 {
                for count in (1..=self.sleeptime).rev() {
                    let event = Event::DeploySleep {
                        host: host.clone(),
                        count,
                    };
                    if let Err(abort) = self.event_bus.trigger(event).await {
                        aborter.abort(abort.reason);
                        break 'rollout;
                    }
                    tokio::select! {
                        () = sleep(Duration::from_secs(1)) => {}
                        _ = abort_rx.changed() => break 'rollout,
                    }
                }
            }

            if aborter.reason().is_some() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = abort_rx.changed() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if aborter.reason().is_some() {
                break;
            }

            state.mark_deploying(host);
            tasks.push(self.spawn_host_task(
                host.clone(),
                Arc::clone(&commands),
                permit,
                Arc::clone(state),
                Arc::clone(aborter),
            ));

            let event = Event::DeployEnqueue { host: host.clone() };
            if let Err(abort) = self.event_bus.trigger(event).await {
                aborter.abort(abort.reason);
                break;
            }
        }

        for task in tasks {
            if let Err(error) = task.await {
                // host tasks catch their own panics, so this is shutdown noise
                debug!(error = %error, "host task join failed");
            }
        }
    }

    fn spawn_host_task(
        &self,
        host: Host,
        commands: Arc<Vec<Command>>,
        permit: OwnedSemaphorePermit,
        state: Arc<DeployStateMap>,
        aborter: Arc<Aborter>,
    ) -> JoinHandle<()> {
        let event_bus = Arc::clone(&self.event_bus);
        let transport = Arc::clone(&self.transport);
        let host_source = Arc::clone(&self.host_source);
        let execution_timeout = self.execution_timeout;

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = AssertUnwindSafe(process_host(
                &event_bus,
                &*transport,
                &*host_source,
                &host,
                &commands,
                execution_timeout,
                &state,
            ))
            .catch_unwind()
            .await;

            match outcome {
                Ok(Ok(results)) => state.mark_success(&host, results),
                // already reported via host.abort; the deploy rolls on
                Ok(Err(DeployError::Host { .. })) => {}
                Ok(Err(DeployError::Aborted(reason))) => {
                    state.mark_aborted(&host, None);
                    aborter.abort(reason);
                }
                Ok(Err(error)) => {
                    error!(host = %host, error = %error, "host processing failed unexpectedly");
                    state.mark_aborted(&host, None);
                    aborter.abort(error.to_string());
                }
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    error!(host = %host, "host task panicked: {reason}");
                    state.mark_aborted(&host, None);
                    aborter.abort(reason);
                }
            }
        })
    }
}

/// One host's full command sequence, with its lifecycle events.
///
/// Transport errors are reported (`host.abort`, downgraded to a warning when
/// the host source says the host is gone) and wrapped into
/// `DeployError::Host`, which the caller swallows so the rest of the deploy
/// continues. Anything else that comes out of here stops the whole deploy.
async fn process_host(
    event_bus: &EventBus,
    transport: &dyn Transport,
    host_source: &dyn HostSource,
    host: &Host,
    commands: &[Command],
    execution_timeout: u64,
    state: &DeployStateMap,
) -> Result<Vec<DeployResult>, DeployError> {
    event_bus
        .trigger(Event::HostBegin { host: host.clone() })
        .await?;

    info!(host = %host, "connecting");
    match run_command_sequence(event_bus, transport, host, commands, execution_timeout).await {
        Ok(results) => {
            info!(host = %host, "success! all done");
            event_bus
                .trigger(Event::HostEnd {
                    host: host.clone(),
                    results: results.clone(),
                })
                .await?;
            Ok(results)
        }
        Err(HostRunError::Abort(abort)) => Err(abort.into()),
        Err(HostRunError::Transport(error)) => {
            let should_be_alive = host_source.should_be_alive(host).await;
            if should_be_alive {
                error!(host = %host, "error: {error}");
            } else {
                warn!(host = %host, "error on possibly terminated host: {error}");
            }

            event_bus
                .trigger(Event::HostAbort {
                    host: host.clone(),
                    error: error.to_string(),
                    should_be_alive,
                })
                .await?;
            state.mark_aborted(host, Some(should_be_alive));
            Err(DeployError::Host {
                host: host.name.clone(),
                error,
            })
        }
    }
}

enum HostRunError {
    Transport(TransportError),
    Abort(AbortDeploy),
}

impl From<TransportError> for HostRunError {
    fn from(error: TransportError) -> Self {
        HostRunError::Transport(error)
    }
}

impl From<AbortDeploy> for HostRunError {
    fn from(abort: AbortDeploy) -> Self {
        HostRunError::Abort(abort)
    }
}

async fn run_command_sequence(
    event_bus: &EventBus,
    transport: &dyn Transport,
    host: &Host,
    commands: &[Command],
    execution_timeout: u64,
) -> Result<Vec<DeployResult>, HostRunError> {
    let mut connection = transport.connect_to(&host.address).await?;
    let mut results = Vec::new();

    for command in commands {
        let argv = command.cmdline();
        info!(host = %host, "{}", argv.join(" "));
        event_bus
            .trigger(Event::HostCommand {
                host: host.clone(),
                command: argv.clone(),
            })
            .await?;

        let result = connection.execute(&argv, execution_timeout).await?;
        let outcome = command.check_result(&result);
        results.push(DeployResult {
            command: command.clone(),
            result,
        });
        if outcome == CheckResult::SkipRemaining {
            break;
        }
    }

    connection.disconnect().await?;
    Ok(results)
}

/// First abort wins; everyone else can watch for it.
struct Aborter {
    tx: watch::Sender<Option<String>>,
}

impl Aborter {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }
}

/// SIGINT and SIGHUP become aborts, marshalled onto the runtime through the
/// abort channel rather than acted on in signal context.
fn spawn_signal_listener(aborter: Arc<Aborter>) -> Result<JoinHandle<()>, DeployError> {
    let mut sigint =
        signal(SignalKind::interrupt()).map_err(|e| DeployError::Signals(e.to_string()))?;
    let mut sighup =
        signal(SignalKind::hangup()).map_err(|e| DeployError::Signals(e.to_string()))?;

    Ok(tokio::spawn(async move {
        let reason = tokio::select! {
            _ = sigint.recv() => SIGINT_MESSAGE,
            _ = sighup.recv() => SIGHUP_MESSAGE,
        };
        aborter.abort(reason);
    }))
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "host task panicked".to_string()
    }
}
