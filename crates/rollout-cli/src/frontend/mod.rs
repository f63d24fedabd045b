//! Terminal front-ends
//!
//! Both front-ends watch the bus and narrate progress; the headful one also
//! reads the operator's keystrokes and gates `deploy.enqueue` through the
//! pause strategies. Keeping them as plain subscribers means the engine
//! never knows pausing exists.

pub mod strategy;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use crossterm::style::Stylize;
use tokio::sync::watch;

use rollout_core::{Command, DeployResult, Event, Subscriber, SubscriberError};
use rollout_inventory::Host;

use crate::logging::ConsoleVerbosity;
use crate::util::sorted_nicely;
use strategy::{Console, HostsState, PauseStrategy, initial_strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostOutcome {
    Success,
    Error,
    Warning,
}

struct Summary {
    host_results: HashMap<String, Option<HostOutcome>>,
    collected: Vec<Vec<DeployResult>>,
    started: Option<Instant>,
}

/// Narrates the deploy without ever asking for input. Used when stdout is
/// not a terminal or the operator asked for `--dangerously-fast`.
pub struct HeadlessFrontend {
    summary: Mutex<Summary>,
    verbosity: Option<ConsoleVerbosity>,
}

impl HeadlessFrontend {
    pub fn new(plan: &[Host], verbosity: Option<ConsoleVerbosity>) -> Self {
        Self {
            summary: Mutex::new(Summary {
                host_results: plan
                    .iter()
                    .map(|host| (host.name.clone(), None))
                    .collect(),
                collected: Vec::new(),
                started: None,
            }),
            verbosity,
        }
    }

    fn on_host_end(&self, host: &Host, results: &[DeployResult]) {
        let mut summary = self.summary.lock().unwrap();
        let summary = &mut *summary;
        if let Some(entry) = summary.host_results.get_mut(&host.name) {
            *entry = Some(HostOutcome::Success);
            summary.collected.push(results.to_vec());

            let complete = summary
                .host_results
                .values()
                .filter(|v| v.is_some())
                .count();
            let percent = complete * 100 / summary.host_results.len();
            println!("{}", format!("*** {percent}% done").green());
        }
    }

    fn on_host_abort(&self, host: &Host, should_be_alive: bool) {
        let mut summary = self.summary.lock().unwrap();
        if let Some(entry) = summary.host_results.get_mut(&host.name) {
            *entry = Some(if should_be_alive {
                HostOutcome::Error
            } else {
                HostOutcome::Warning
            });
        }
    }

    fn on_deploy_end(&self) {
        let summary = self.summary.lock().unwrap();
        println!("{}", "*** deploy complete!".green().bold());

        let hosts_with = |wanted: HostOutcome| -> Vec<String> {
            summary
                .host_results
                .iter()
                .filter(|(_, outcome)| **outcome == Some(wanted))
                .map(|(name, _)| name.clone())
                .collect()
        };

        let warnings = hosts_with(HostOutcome::Warning);
        if !warnings.is_empty() {
            println!(
                "*** encountered errors on {} possibly terminated hosts:",
                warnings.len()
            );
            let colored: Vec<String> = sorted_nicely(warnings)
                .into_iter()
                .map(|name| format!("{}", name.yellow()))
                .collect();
            println!("       {}", colored.join(" "));
        }

        let errors = hosts_with(HostOutcome::Error);
        if !errors.is_empty() {
            println!(
                "*** encountered unexpected errors on {} healthy hosts:",
                errors.len()
            );
            let colored: Vec<String> = sorted_nicely(errors)
                .into_iter()
                .map(|name| format!("{}", name.red()))
                .collect();
            println!("       {}", colored.join(" "));
        }

        println!(
            "*** processed {} hosts successfully",
            hosts_with(HostOutcome::Success).len()
        );

        let report = component_report(&summary.collected);
        if !report.is_empty() {
            println!("*** component versions seen:");
            for (component, versions) in &report {
                for (version, count) in versions {
                    println!("       {component} @ {version}: {count} hosts");
                }
            }
        }

        if let Some(started) = summary.started {
            println!("*** elapsed time: {} seconds", started.elapsed().as_secs());
        }
    }
}

#[async_trait]
impl Subscriber for HeadlessFrontend {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
        match event {
            Event::DeployBegin => {
                self.summary.lock().unwrap().started = Some(Instant::now());
                println!("{}", "*** starting deploy".green().bold());
            }
            Event::BuildBegin => {
                if let Some(verbosity) = &self.verbosity {
                    verbosity.boost();
                }
            }
            Event::BuildEnd => {
                if let Some(verbosity) = &self.verbosity {
                    verbosity.restore();
                }
            }
            Event::HostEnd { host, results } => self.on_host_end(host, results),
            Event::HostAbort {
                host,
                should_be_alive,
                ..
            } => self.on_host_abort(host, *should_be_alive),
            Event::DeployAbort { reason } => {
                println!("{}", format!("*** deploy aborted: {reason}").red().bold());
            }
            Event::DeployEnd => self.on_deploy_end(),
            _ => {}
        }
        Ok(())
    }
}

/// Aggregate `components` command results across hosts:
/// component -> version -> number of hosts reporting it.
pub fn component_report(collected: &[Vec<DeployResult>]) -> BTreeMap<String, BTreeMap<String, u64>> {
    let mut report: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();

    for results in collected {
        for deploy_result in results {
            if !matches!(deploy_result.command, Command::Components) {
                continue;
            }
            let Some(components) = deploy_result
                .result
                .get("components")
                .and_then(|v| v.as_object())
            else {
                continue;
            };
            for (component, versions) in components {
                let Some(versions) = versions.as_object() else {
                    continue;
                };
                for (version, count) in versions {
                    let count = count.as_u64().unwrap_or(0);
                    *report
                        .entry(component.clone())
                        .or_default()
                        .entry(version.clone())
                        .or_default() += count;
                }
            }
        }
    }

    report
}

/// The interactive front-end: everything the headless one does, plus the
/// sleep countdown and operator-driven pausing.
pub struct HeadfulFrontend {
    inner: HeadlessFrontend,
    console: Arc<dyn Console>,
    hosts: Mutex<HostsState>,
    strategy: tokio::sync::Mutex<Box<dyn PauseStrategy>>,
    deploying: watch::Sender<usize>,
}

impl HeadfulFrontend {
    pub fn new(plan: &[Host], verbosity: Option<ConsoleVerbosity>, console: Arc<dyn Console>) -> Self {
        let (deploying, _) = watch::channel(0);
        Self {
            inner: HeadlessFrontend::new(plan, verbosity),
            console,
            hosts: Mutex::new(HostsState::new(plan)),
            strategy: tokio::sync::Mutex::new(initial_strategy(plan)),
            deploying,
        }
    }

    fn mark_complete(&self, host: &Host) {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.mark_complete(&host.name);
        let _ = self.deploying.send(hosts.deploying());
    }

    async fn on_enqueue(&self, host: &Host) -> Result<(), SubscriberError> {
        {
            let mut hosts = self.hosts.lock().unwrap();
            hosts.mark_deploying(&host.name);
            let _ = self.deploying.send(hosts.deploying());

            // nothing left to gate once the last host is out
            if hosts.pending() == 0 {
                return Ok(());
            }
        }

        let mut strategy = self.strategy.lock().await;
        let pause_now = {
            let hosts = self.hosts.lock().unwrap();
            strategy.is_complete(&hosts)
        };
        if !pause_now {
            return Ok(());
        }

        // let the hosts already in flight finish before asking anything
        let mut deploying = self.deploying.subscribe();
        let _ = deploying.wait_for(|count| *count == 0).await;

        let snapshot = self.hosts.lock().unwrap().clone();
        let next = strategy
            .next_strategy(&snapshot, &*self.console)
            .await
            .map_err(|abort| SubscriberError::Abort(abort.reason))?;
        *strategy = next;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for HeadfulFrontend {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
        self.inner.handle_event(event).await?;

        match event {
            Event::DeploySleep { count, .. } => {
                println!("{}", format!("*** sleeping {count}...").blue().bold());
            }
            Event::DeployEnqueue { host } => self.on_enqueue(host).await?,
            Event::HostEnd { host, .. } => self.mark_complete(host),
            Event::HostAbort { host, .. } => self.mark_complete(host),
            _ => {}
        }
        Ok(())
    }
}
