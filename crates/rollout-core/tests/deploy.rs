//! End-to-end engine tests over the mock transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use rollout_core::{
    CompletionResult, Command, Deployer, DeployerArgs, DeployError, Event, EventBus, HostState,
    Subscriber, SubscriberError,
};
use rollout_exec::{MockTransport, ResultMap};
use rollout_inventory::{Host, HostSource, MockHostSource, StaticHostSource};

/// Flattens every event into a comparable line.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn lines(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count_of(&self, prefix: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Subscriber for Recorder {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
        let line = match event {
            Event::DeploySleep { host, count } => format!("deploy.sleep:{host}:{count}"),
            Event::DeployEnqueue { host } => format!("deploy.enqueue:{host}"),
            Event::DeployAbort { reason } => format!("deploy.abort:{reason}"),
            Event::HostBegin { host } => format!("host.begin:{host}"),
            Event::HostCommand { host, command } => {
                format!("host.command:{host}:{}", command.join(" "))
            }
            Event::HostEnd { host, results } => format!("host.end:{host}:{}", results.len()),
            Event::HostAbort {
                host,
                should_be_alive,
                ..
            } => format!("host.abort:{host}:{should_be_alive}"),
            other => other.name().to_string(),
        };
        self.events.lock().unwrap().push(line);
        Ok(())
    }
}

fn host(name: &str, pool: &str) -> Host {
    Host::new(name, name, name, pool)
}

fn restart_all() -> Vec<Command> {
    vec![Command::Restart {
        target: "all".to_string(),
    }]
}

fn object(value: serde_json::Value) -> ResultMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

struct Fixture {
    deployer: Deployer,
    recorder: Arc<Recorder>,
    transport: MockTransport,
}

fn fixture(hosts: &[Host], transport: MockTransport, parallel: usize, sleeptime: u64) -> Fixture {
    fixture_with_timeout(hosts, transport, parallel, sleeptime, 0)
}

fn fixture_with_timeout(
    hosts: &[Host],
    transport: MockTransport,
    parallel: usize,
    sleeptime: u64,
    execution_timeout: u64,
) -> Fixture {
    let event_bus = Arc::new(EventBus::new());
    let recorder = Arc::new(Recorder::default());
    event_bus.register(Arc::clone(&recorder) as Arc<dyn Subscriber>);

    let deployer = Deployer::new(DeployerArgs {
        host_source: Arc::new(StaticHostSource::new(hosts.to_vec())),
        transport: Arc::new(transport.clone()),
        event_bus,
        parallel,
        sleeptime,
        execution_timeout,
        dangerously_fast: false,
        code_host: "code-01".to_string(),
    });

    Fixture {
        deployer,
        recorder,
        transport,
    }
}

#[tokio::test]
async fn single_host_success() {
    let hosts = vec![host("a", "p")];
    let fx = fixture(&hosts, MockTransport::new(), 1, 0);

    let states = fx
        .deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap();

    assert_eq!(
        fx.recorder.lines(),
        vec![
            "deploy.precheck",
            "deploy.begin",
            "deploy.enqueue:a",
            "host.begin:a",
            "host.command:a:restart all",
            "host.end:a:1",
            "deploy.end",
        ]
    );
    assert!(matches!(
        &states["a"],
        HostState::Complete {
            result: CompletionResult::Success,
            ..
        }
    ));
}

#[tokio::test]
async fn empty_deploy_still_begins_and_ends() {
    let fx = fixture(&[], MockTransport::new(), 1, 0);

    fx.deployer
        .run_deploy(Vec::new(), Vec::new(), restart_all())
        .await
        .unwrap();

    assert_eq!(
        fx.recorder.lines(),
        vec!["deploy.precheck", "deploy.begin", "deploy.end"]
    );
}

#[tokio::test]
async fn build_phase_then_noop_deploy_skips_remaining_commands() {
    let hosts = vec![host("a", "p"), host("b", "p")];
    let transport = MockTransport::new()
        .responding(
            "synchronize",
            object(json!({"svc": {"token": "T1", "buildhost": "bh"}})),
        )
        .responding("build", object(json!({"svc@T1": "D1"})))
        .noop_deploys_on("a")
        .noop_deploys_on("b");
    let fx = fixture(&hosts, transport, 1, 0);

    fx.deployer
        .run_deploy(hosts, vec!["svc".to_string()], restart_all())
        .await
        .unwrap();

    let lines = fx.recorder.lines();
    assert!(lines.contains(&"build.begin".to_string()));
    assert!(lines.contains(&"build.sync".to_string()));
    assert!(lines.contains(&"build.end".to_string()));

    // each fleet host ran exactly one command: the synthesized deploy
    assert_eq!(fx.recorder.count_of("host.command:a:"), 1);
    assert_eq!(fx.recorder.count_of("host.command:b:"), 1);
    assert!(lines.contains(&"host.command:a:deploy svc@D1".to_string()));

    // the code-host and buildhost are not deploy targets
    assert_eq!(fx.recorder.count_of("host.begin:code-01"), 0);
    assert_eq!(fx.recorder.count_of("host.begin:bh"), 0);

    let executed = fx.transport.executed();
    assert!(
        executed
            .iter()
            .any(|(addr, argv)| addr == "code-01" && argv[0] == "synchronize")
    );
    assert!(
        executed
            .iter()
            .any(|(addr, argv)| addr == "bh" && argv == &vec!["build", "svc@T1"])
    );
    // no restart or wait ever reached the fleet
    assert!(
        !executed
            .iter()
            .any(|(addr, argv)| (addr == "a" || addr == "b") && argv[0] != "deploy")
    );
}

#[tokio::test]
async fn sync_token_without_buildhost_deploys_directly() {
    let hosts = vec![host("a", "p")];
    let transport = MockTransport::new()
        .responding("synchronize", object(json!({"svc": {"token": "T1"}})));
    let fx = fixture(&hosts, transport, 1, 0);

    fx.deployer
        .run_deploy(hosts, vec!["svc".to_string()], Vec::new())
        .await
        .unwrap();

    // no restart command, so no synthesized wait either
    let executed = fx.transport.executed();
    assert!(
        executed
            .iter()
            .any(|(addr, argv)| addr == "a" && argv == &vec!["deploy", "svc@T1"])
    );
    assert!(!executed.iter().any(|(_, argv)| argv[0] == "build"));
    assert!(
        !executed
            .iter()
            .any(|(_, argv)| argv[0] == "wait-until-components-ready")
    );
}

#[tokio::test]
async fn missing_build_token_aborts_before_any_host() {
    let hosts = vec![host("a", "p")];
    let transport = MockTransport::new()
        .responding(
            "synchronize",
            object(json!({"svc": {"token": "T1", "buildhost": "bh"}})),
        )
        .responding("build", ResultMap::new());
    let fx = fixture(&hosts, transport, 1, 0);

    let error = fx
        .deployer
        .run_deploy(hosts, vec!["svc".to_string()], restart_all())
        .await
        .unwrap_err();

    assert!(matches!(
        &error,
        DeployError::ComponentNotBuilt { component } if component == "svc"
    ));
    assert_eq!(fx.recorder.count_of("host.begin"), 0);
    assert!(
        fx.recorder
            .lines()
            .contains(&"deploy.abort:svc: build token not generated".to_string())
    );
}

#[tokio::test]
async fn transport_error_on_dead_host_is_a_warning_not_an_abort() {
    let source = MockHostSource::new(2, 0).with_terminated(["app-01".to_string()]);
    let hosts = source.get_hosts().await.unwrap();

    let event_bus = Arc::new(EventBus::new());
    let recorder = Arc::new(Recorder::default());
    event_bus.register(Arc::clone(&recorder) as Arc<dyn Subscriber>);

    let deployer = Deployer::new(DeployerArgs {
        host_source: Arc::new(source),
        transport: Arc::new(MockTransport::new().refusing("app-01")),
        event_bus,
        parallel: 1,
        sleeptime: 0,
        execution_timeout: 0,
        dangerously_fast: false,
        code_host: "code-01".to_string(),
    });

    let states = deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap();

    let lines = recorder.lines();
    assert!(lines.contains(&"host.abort:app-01:false".to_string()));
    assert!(lines.contains(&"host.end:app-02:1".to_string()));
    assert_eq!(lines.last().unwrap(), "deploy.end");
    assert!(matches!(
        &states["app-01"],
        HostState::Complete {
            result: CompletionResult::Aborted,
            should_be_alive: Some(false),
            ..
        }
    ));
}

/// A subscriber that panics while a host command is announced.
struct PanicOnCommand;

#[async_trait]
impl Subscriber for PanicOnCommand {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
        if matches!(event, Event::HostCommand { .. }) {
            panic!("kaboom");
        }
        Ok(())
    }
}

#[tokio::test]
async fn unexpected_panic_aborts_the_whole_deploy() {
    let hosts = vec![host("a", "p"), host("b", "p"), host("c", "p")];
    let fx = fixture(&hosts, MockTransport::new(), 1, 0);
    fx.deployer.event_bus().register(Arc::new(PanicOnCommand));

    let error = fx
        .deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap_err();

    assert!(matches!(&error, DeployError::Aborted(reason) if reason == "kaboom"));
    assert_eq!(fx.recorder.count_of("deploy.enqueue"), 1);
    assert!(
        fx.recorder
            .lines()
            .contains(&"deploy.abort:kaboom".to_string())
    );
}

/// Aborts the deploy from the enqueue hook after a set number of hosts.
struct AbortAfterEnqueues {
    seen: AtomicUsize,
    limit: usize,
}

#[async_trait]
impl Subscriber for AbortAfterEnqueues {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
        if matches!(event, Event::DeployEnqueue { .. })
            && self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit
        {
            return Err(SubscriberError::Abort("user aborted deploy".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn subscriber_abort_stops_enqueues_but_lets_hosts_settle() {
    let hosts = vec![host("a", "p"), host("b", "p"), host("c", "p")];
    let fx = fixture(&hosts, MockTransport::new(), 1, 0);
    fx.deployer.event_bus().register(Arc::new(AbortAfterEnqueues {
        seen: AtomicUsize::new(0),
        limit: 2,
    }));

    let error = fx
        .deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap_err();

    assert!(matches!(&error, DeployError::Aborted(reason) if reason == "user aborted deploy"));
    assert_eq!(fx.recorder.count_of("deploy.enqueue"), 2);
    // both enqueued hosts ran to completion before the abort event
    assert_eq!(fx.recorder.count_of("host.end"), 2);
    let lines = fx.recorder.lines();
    assert_eq!(
        lines.last().unwrap(),
        "deploy.abort:user aborted deploy"
    );
}

/// Refuses the deploy outright at precheck.
struct RefusePrecheck;

#[async_trait]
impl Subscriber for RefusePrecheck {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
        if matches!(event, Event::DeployPrecheck) {
            return Err(SubscriberError::Abort("not during business hours".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn precheck_refusal_aborts_before_anything_happens() {
    let hosts = vec![host("a", "p")];
    let fx = fixture(&hosts, MockTransport::new(), 1, 0);
    fx.deployer.event_bus().register(Arc::new(RefusePrecheck));

    let error = fx
        .deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap_err();

    assert!(matches!(&error, DeployError::Aborted(_)));
    assert_eq!(
        fx.recorder.lines(),
        vec![
            "deploy.precheck",
            "deploy.abort:not during business hours"
        ]
    );
    assert!(fx.transport.executed().is_empty());
}

/// Tracks how many hosts are between `host.begin` and `host.end` at once.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Subscriber for ConcurrencyGauge {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
        match event {
            Event::HostBegin { .. } => {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
            }
            Event::HostEnd { .. } | Event::HostAbort { .. } => {
                self.current.fetch_sub(1, Ordering::SeqCst);
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn parallelism_is_bounded_by_the_semaphore() {
    let hosts: Vec<Host> = (1..=6).map(|i| host(&format!("h{i}"), "p")).collect();
    let transport = MockTransport::new().delaying("restart", Duration::from_millis(50));
    let fx = fixture(&hosts, transport, 2, 0);

    let gauge = Arc::new(ConcurrencyGauge::default());
    fx.deployer.event_bus().register(Arc::clone(&gauge) as Arc<dyn Subscriber>);

    fx.deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap();

    assert_eq!(fx.recorder.count_of("host.end"), 6);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    assert!(gauge.peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn parallel_one_is_strictly_sequential() {
    let hosts = vec![host("a", "p"), host("b", "p")];
    let fx = fixture(&hosts, MockTransport::new(), 1, 0);

    fx.deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap();

    let lines = fx.recorder.lines();
    let begin_b = lines.iter().position(|l| l == "host.begin:b").unwrap();
    let end_a = lines.iter().position(|l| l == "host.end:a:1").unwrap();
    assert!(end_a < begin_b, "host b began before host a finished");
}

#[tokio::test(start_paused = true)]
async fn sleeptime_counts_down_between_hosts() {
    let hosts = vec![host("a", "p"), host("b", "p")];
    let fx = fixture(&hosts, MockTransport::new(), 1, 2);

    fx.deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap();

    let lines = fx.recorder.lines();
    // no sleep before the first host, a 2..1 countdown before the second
    let sleeps: Vec<&String> = lines
        .iter()
        .filter(|l| l.starts_with("deploy.sleep"))
        .collect();
    assert_eq!(sleeps, vec!["deploy.sleep:b:2", "deploy.sleep:b:1"]);
    let last_sleep = lines
        .iter()
        .rposition(|l| l.starts_with("deploy.sleep"))
        .unwrap();
    let enqueue_b = lines.iter().position(|l| l == "deploy.enqueue:b").unwrap();
    assert!(last_sleep < enqueue_b);
}

#[tokio::test(start_paused = true)]
async fn execution_timeout_aborts_only_that_host() {
    let hosts = vec![host("a", "p"), host("b", "p")];
    let transport = MockTransport::new().delaying("restart", Duration::from_secs(5));
    let fx = fixture_with_timeout(&hosts, transport, 1, 0, 1);

    let states = fx
        .deployer
        .run_deploy(hosts, Vec::new(), restart_all())
        .await
        .unwrap();

    assert_eq!(fx.recorder.count_of("host.abort"), 2);
    assert_eq!(fx.recorder.lines().last().unwrap(), "deploy.end");
    assert!(matches!(
        &states["a"],
        HostState::Complete {
            result: CompletionResult::Aborted,
            should_be_alive: Some(true),
            ..
        }
    ));
}
