//! Operator pause strategies
//!
//! The engine stalls between host enqueues for as long as the front-end's
//! `deploy.enqueue` handler takes to return. These strategies decide when
//! that handler should stop and ask the operator what to do next: first a
//! single host, then one canary per pool, then whatever cadence the operator
//! picks from the menu.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crossterm::event::{Event as TerminalEvent, KeyCode};
use crossterm::style::Stylize;
use crossterm::terminal;

use rollout_core::AbortDeploy;
use rollout_inventory::Host;

/// Where one host is, as far as the front-end can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostPhase {
    Pending,
    Deploying,
    Complete,
}

/// The front-end's view of the whole plan, fed from lifecycle events.
#[derive(Debug, Clone)]
pub struct HostsState {
    entries: HashMap<String, (String, HostPhase)>,
}

impl HostsState {
    pub fn new(plan: &[Host]) -> Self {
        let entries = plan
            .iter()
            .map(|host| (host.name.clone(), (host.pool.clone(), HostPhase::Pending)))
            .collect();
        Self { entries }
    }

    pub fn mark_deploying(&mut self, name: &str) {
        if let Some((_, phase)) = self.entries.get_mut(name) {
            if *phase == HostPhase::Pending {
                *phase = HostPhase::Deploying;
            }
        }
    }

    pub fn mark_complete(&mut self, name: &str) {
        if let Some((_, phase)) = self.entries.get_mut(name) {
            *phase = HostPhase::Complete;
        }
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn completed(&self) -> usize {
        self.phase_count(HostPhase::Complete)
    }

    pub fn deploying(&self) -> usize {
        self.phase_count(HostPhase::Deploying)
    }

    pub fn pending(&self) -> usize {
        self.phase_count(HostPhase::Pending)
    }

    fn phase_count(&self, wanted: HostPhase) -> usize {
        self.entries
            .values()
            .filter(|(_, phase)| *phase == wanted)
            .count()
    }

    /// Has at least one host from every pool begun or completed?
    pub fn every_pool_touched(&self) -> bool {
        let mut touched: HashMap<&str, bool> = HashMap::new();
        for (pool, phase) in self.entries.values() {
            let entry = touched.entry(pool.as_str()).or_insert(false);
            *entry = *entry || *phase != HostPhase::Pending;
        }
        touched.values().all(|touched| *touched)
    }

    /// Whole percent of hosts complete
    pub fn completion_percent(&self) -> usize {
        if self.entries.is_empty() {
            return 100;
        }
        self.completed() * 100 / self.total()
    }
}

/// Operator input seam, so the strategies can be driven by a terminal or by
/// a test script.
#[async_trait]
pub trait Console: Send + Sync {
    fn message(&self, line: &str);
    async fn read_key(&self) -> io::Result<char>;
}

/// Real terminal: raw-mode single keystrokes.
#[derive(Default)]
pub struct TerminalConsole;

#[async_trait]
impl Console for TerminalConsole {
    fn message(&self, line: &str) {
        println!("{line}");
    }

    async fn read_key(&self) -> io::Result<char> {
        let key = tokio::task::spawn_blocking(|| {
            terminal::enable_raw_mode()?;
            let result = loop {
                match crossterm::event::read() {
                    Ok(TerminalEvent::Key(key)) => {
                        if let KeyCode::Char(c) = key.code {
                            break Ok(c);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => break Err(e),
                }
            };
            terminal::disable_raw_mode()?;
            result
        })
        .await
        .map_err(io::Error::other)?;
        key
    }
}

/// Canned keystrokes for tests and rehearsals.
#[derive(Clone, Default)]
pub struct ScriptedConsole {
    keys: Arc<Mutex<VecDeque<char>>>,
    messages: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConsole {
    pub fn new(keys: &[char]) -> Self {
        Self {
            keys: Arc::new(Mutex::new(keys.iter().copied().collect())),
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    fn message(&self, line: &str) {
        self.messages.lock().unwrap().push(line.to_string());
    }

    async fn read_key(&self) -> io::Result<char> {
        self.keys
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
    }
}

/// When to stop enqueuing and what to do then.
#[async_trait]
pub trait PauseStrategy: Send + Sync + std::fmt::Debug {
    /// Should the front-end pause now?
    fn is_complete(&self, state: &HostsState) -> bool;

    /// Ask the operator for the next strategy. Runs after every deploying
    /// host has settled.
    async fn next_strategy(
        &self,
        state: &HostsState,
        console: &dyn Console,
    ) -> Result<Box<dyn PauseStrategy>, AbortDeploy>;
}

/// Pick where to start: a single probe host when the plan spans pools,
/// otherwise straight to canary checking.
pub fn initial_strategy(plan: &[Host]) -> Box<dyn PauseStrategy> {
    let pools: std::collections::HashSet<&str> =
        plan.iter().map(|host| host.pool.as_str()).collect();
    if pools.len() > 1 {
        Box::new(FirstHost)
    } else {
        Box::new(Canary)
    }
}

async fn read_choice(console: &dyn Console) -> Result<char, AbortDeploy> {
    console
        .read_key()
        .await
        .map_err(|e| AbortDeploy::new(format!("console input closed: {e}")))
}

/// Pause after the very first host.
#[derive(Debug)]
pub struct FirstHost;

#[async_trait]
impl PauseStrategy for FirstHost {
    fn is_complete(&self, state: &HostsState) -> bool {
        state.total() - state.pending() >= 1
    }

    async fn next_strategy(
        &self,
        _state: &HostsState,
        console: &dyn Console,
    ) -> Result<Box<dyn PauseStrategy>, AbortDeploy> {
        console.message(
            &format!("{}", "*** first host is done: [c]ontinue to canaries, e[x]it".cyan().bold()),
        );
        loop {
            match read_choice(console).await? {
                'c' => return Ok(Box::new(Canary)),
                'x' => return Err(AbortDeploy::new("user aborted deploy")),
                _ => {}
            }
        }
    }
}

/// Pause once every pool has a host out.
#[derive(Debug)]
pub struct Canary;

#[async_trait]
impl PauseStrategy for Canary {
    fn is_complete(&self, state: &HostsState) -> bool {
        state.every_pool_touched()
    }

    async fn next_strategy(
        &self,
        state: &HostsState,
        console: &dyn Console,
    ) -> Result<Box<dyn PauseStrategy>, AbortDeploy> {
        console.message(&format!(
            "{}",
            "*** canaries are done: do they look healthy? [y]es, e[x]it"
                .cyan()
                .bold()
        ));
        loop {
            match read_choice(console).await? {
                'y' => return select_regular(state, console).await,
                'x' => return Err(AbortDeploy::new("user aborted deploy")),
                _ => {}
            }
        }
    }
}

/// Pause again after one more host completes.
#[derive(Debug)]
pub struct SingleHost {
    target: usize,
}

#[async_trait]
impl PauseStrategy for SingleHost {
    fn is_complete(&self, state: &HostsState) -> bool {
        state.completed() >= self.target
    }

    async fn next_strategy(
        &self,
        state: &HostsState,
        console: &dyn Console,
    ) -> Result<Box<dyn PauseStrategy>, AbortDeploy> {
        select_regular(state, console).await
    }
}

/// Pause when a completion percentage is reached. The requested target is
/// rounded up to the next achievable step, since only whole hosts complete.
#[derive(Debug)]
pub struct Percent {
    target_hosts: usize,
}

impl Percent {
    pub fn new(target_percent: usize, total_hosts: usize) -> Self {
        Self {
            target_hosts: (target_percent * total_hosts).div_ceil(100),
        }
    }

    pub fn target_hosts(&self) -> usize {
        self.target_hosts
    }
}

#[async_trait]
impl PauseStrategy for Percent {
    fn is_complete(&self, state: &HostsState) -> bool {
        state.completed() >= self.target_hosts
    }

    async fn next_strategy(
        &self,
        state: &HostsState,
        console: &dyn Console,
    ) -> Result<Box<dyn PauseStrategy>, AbortDeploy> {
        select_regular(state, console).await
    }
}

/// Never pause again.
#[derive(Debug)]
pub struct Free;

#[async_trait]
impl PauseStrategy for Free {
    fn is_complete(&self, _state: &HostsState) -> bool {
        false
    }

    async fn next_strategy(
        &self,
        state: &HostsState,
        console: &dyn Console,
    ) -> Result<Box<dyn PauseStrategy>, AbortDeploy> {
        select_regular(state, console).await
    }
}

/// The regular strategy menu. Percent targets that are already behind the
/// current completion are not offered.
pub async fn select_regular(
    state: &HostsState,
    console: &dyn Console,
) -> Result<Box<dyn PauseStrategy>, AbortDeploy> {
    let percent_now = state.completion_percent();
    let percent_options: Vec<usize> = [25, 50, 75]
        .into_iter()
        .filter(|target| *target > percent_now)
        .collect();

    let mut menu = String::from("*** waiting for input: e[x]it, [c]ontinue one host");
    for target in &percent_options {
        menu.push_str(&format!(", [{}] to {target}%", target / 10));
    }
    menu.push_str(", [a]ll remaining");
    console.message(&format!("{}", menu.as_str().cyan().bold()));

    loop {
        let key = read_choice(console).await?;
        match key {
            'x' => return Err(AbortDeploy::new("user aborted deploy")),
            'c' => {
                return Ok(Box::new(SingleHost {
                    target: state.completed() + 1,
                }));
            }
            'a' => return Ok(Box::new(Free)),
            digit @ '1'..='9' => {
                let tens = digit as usize - '0' as usize;
                if let Some(target) = percent_options.iter().copied().find(|t| t / 10 == tens) {
                    return Ok(Box::new(Percent::new(target, state.total())));
                }
            }
            _ => {}
        }
    }
}
