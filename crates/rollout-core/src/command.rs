//! Deploy command model

use rollout_exec::ResultMap;

/// What to do with the rest of a host's command sequence after one command
/// finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Continue,
    SkipRemaining,
}

/// The closed set of commands the engine understands, plus a generic escape
/// hatch for ad-hoc remote commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch source on the code-host; args are component names
    Synchronize { components: Vec<String> },
    /// Build artifacts on a buildhost; args are `component@sync-token` refs
    Build { build_refs: Vec<String> },
    /// Install artifacts on a host; args are `component@deploy-token` refs
    Deploy { deploy_refs: Vec<String> },
    /// Restart an application group
    Restart { target: String },
    /// Block until restarted components report healthy
    WaitUntilComponentsReady,
    /// Report which component versions a host is running
    Components,
    /// Anything else the remote binary knows how to do
    Generic { name: String, args: Vec<String> },
}

impl Command {
    /// The wire name of the command
    pub fn name(&self) -> &str {
        match self {
            Command::Synchronize { .. } => "synchronize",
            Command::Build { .. } => "build",
            Command::Deploy { .. } => "deploy",
            Command::Restart { .. } => "restart",
            Command::WaitUntilComponentsReady => "wait-until-components-ready",
            Command::Components => "components",
            Command::Generic { name, .. } => name,
        }
    }

    /// The full argv sent over the transport: `[name] ++ args`
    pub fn cmdline(&self) -> Vec<String> {
        let mut argv = vec![self.name().to_string()];
        match self {
            Command::Synchronize { components } => argv.extend(components.iter().cloned()),
            Command::Build { build_refs } => argv.extend(build_refs.iter().cloned()),
            Command::Deploy { deploy_refs } => argv.extend(deploy_refs.iter().cloned()),
            Command::Restart { target } => argv.push(target.clone()),
            Command::Generic { args, .. } => argv.extend(args.iter().cloned()),
            Command::WaitUntilComponentsReady | Command::Components => {}
        }
        argv
    }

    /// Turn a raw argv (e.g. from `-c` on the command line) into a command.
    /// Returns `None` for an empty argv.
    pub fn from_argv(argv: &[String]) -> Option<Command> {
        let (name, args) = argv.split_first()?;
        let command = match (name.as_str(), args) {
            ("synchronize", _) => Command::Synchronize {
                components: args.to_vec(),
            },
            ("build", _) => Command::Build {
                build_refs: args.to_vec(),
            },
            ("deploy", _) => Command::Deploy {
                deploy_refs: args.to_vec(),
            },
            ("restart", [target]) => Command::Restart {
                target: target.clone(),
            },
            ("wait-until-components-ready", []) => Command::WaitUntilComponentsReady,
            ("components", []) => Command::Components,
            _ => Command::Generic {
                name: name.clone(),
                args: args.to_vec(),
            },
        };
        Some(command)
    }

    /// Decide whether the rest of the host's sequence still makes sense.
    ///
    /// Only `deploy` has an opinion: if the host reported that no repository
    /// changed for any component, the follow-up restart/wait steps are
    /// skipped for that host. An empty result means an older remote binary
    /// that does not report per-component status, so we keep going.
    pub fn check_result(&self, result: &ResultMap) -> CheckResult {
        match self {
            Command::Deploy { .. } => {
                if !result.is_empty() && result.values().all(|v| v == "repo_unchanged") {
                    CheckResult::SkipRemaining
                } else {
                    CheckResult::Continue
                }
            }
            _ => CheckResult::Continue,
        }
    }
}

/// One command's outcome on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployResult {
    pub command: Command,
    /// Opaque JSON object returned by the remote command
    pub result: ResultMap,
}
