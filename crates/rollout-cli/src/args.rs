//! Command-line argument handling
//!
//! The first positional argument picks a profile; everything after it is
//! parsed against that profile's defaults. `canonical_commandline` renders
//! the fully resolved invocation back into a flag string whose re-parse
//! yields the same options, so sinks and logs always record an exact,
//! replayable command line.

use clap::{ArgAction, Parser};

use rollout_core::Command;

use crate::config::{Config, ConfigError};

/// First-stage parser: profile plus everything else.
#[derive(Parser, Debug)]
#[command(name = "rollout", about = "roll stuff to servers", disable_help_flag = true)]
pub struct ProfileArgs {
    /// profile to run against
    pub profile: String,

    /// arguments for the profile-aware parser
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<String>,
}

/// Second-stage parser, profile-aware.
#[derive(Parser, Debug, Default)]
#[command(name = "rollout", about = "roll stuff to servers", disable_help_flag = true)]
pub struct DeployArgs {
    /// display this help
    #[arg(long, action = ArgAction::HelpLong)]
    help: Option<bool>,

    /// host(s) or group(s) to execute commands on
    #[arg(short = 'h', num_args = 1.., value_name = "HOST")]
    pub host_refs: Vec<String>,

    /// number of hosts to work on simultaneously
    #[arg(long, value_name = "COUNT")]
    pub parallel: Option<usize>,

    /// time in seconds to sleep between hosts
    #[arg(long, value_name = "SECONDS")]
    pub sleeptime: Option<u64>,

    /// command execution timeout override, 0 for no timeout
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// skip forward to this host in the rollout order
    #[arg(long, value_name = "HOST")]
    pub startat: Option<String>,

    /// stop the rollout just before this host
    #[arg(long, value_name = "HOST")]
    pub stopbefore: Option<String>,

    /// print out the full command format instead of running
    #[arg(long)]
    pub test: bool,

    /// print a list of selected hosts and exit
    #[arg(long = "list")]
    pub list_hosts: bool,

    /// deploy to all servers immediately and don't wait on restarts
    #[arg(long)]
    pub dangerously_fast: bool,

    #[arg(long, hide = true)]
    pub no_harold: bool,

    /// spew verbose logging of command output to the console
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// deploy the specified components
    #[arg(short = 'd', num_args = 1.., value_name = "CMPNT")]
    pub components: Vec<String>,

    /// whom to restart
    #[arg(short = 'r', action = ArgAction::Append, value_name = "TARGET")]
    pub restart: Vec<String>,

    /// run a deploy command
    #[arg(short = 'c', num_args = 1.., action = ArgAction::Append, value_name = "COMMAND")]
    pub commands: Vec<Vec<String>>,
}

/// Arguments after profile defaults have been folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArgs {
    pub host_refs: Vec<String>,
    pub parallel: usize,
    pub sleeptime: u64,
    pub timeout: u64,
    pub startat: Option<String>,
    pub stopbefore: Option<String>,
    pub test: bool,
    pub list_hosts: bool,
    pub dangerously_fast: bool,
    pub verbose: bool,
    pub components: Vec<String>,
    pub commands: Vec<Command>,
}

/// Fold profile defaults into the parsed flags.
pub fn resolve(config: &Config, args: DeployArgs) -> Result<ResolvedArgs, ConfigError> {
    // logging is not up yet at parse time, so this goes straight to stderr
    if args.no_harold {
        eprintln!("--no-harold is deprecated and does nothing; profiles direct notifications now");
    }

    let host_refs = if args.host_refs.is_empty() {
        config.deploy.default_hosts.clone()
    } else {
        args.host_refs
    };
    if host_refs.is_empty() && !args.list_hosts {
        return Err(ConfigError::Invalid(
            "no hosts given and the profile has no default-hosts".to_string(),
        ));
    }

    let mut components = if args.components.is_empty() {
        config.deploy.default_components.clone()
    } else {
        args.components
    };
    if components == ["none"] {
        components = Vec::new();
    }

    let mut commands: Vec<Command> = args
        .commands
        .iter()
        .filter_map(|argv| Command::from_argv(argv))
        .collect();

    let restart = if args.restart.is_empty() {
        config.deploy.default_restart.clone()
    } else {
        args.restart
    };
    for target in restart {
        commands.push(Command::Restart { target });
    }

    Ok(ResolvedArgs {
        host_refs,
        parallel: args.parallel.unwrap_or(config.deploy.default_parallel),
        sleeptime: args.sleeptime.unwrap_or(config.deploy.default_sleeptime),
        timeout: args.timeout.unwrap_or(config.deploy.execution_timeout),
        startat: args.startat,
        stopbefore: args.stopbefore,
        test: args.test,
        list_hosts: args.list_hosts,
        dangerously_fast: args.dangerously_fast,
        verbose: args.verbose,
        components,
        commands,
    })
}

/// Render the resolved options back into a replayable flag string.
pub fn canonical_commandline(config: &Config, args: &ResolvedArgs) -> String {
    let mut parts = vec!["-h".to_string()];
    parts.extend(args.host_refs.iter().cloned());
    parts.push(format!("--parallel={}", args.parallel));

    if args.sleeptime != config.deploy.default_sleeptime {
        parts.push(format!("--sleeptime={}", args.sleeptime));
    }
    parts.push(format!("--timeout={}", args.timeout));

    if let Some(startat) = &args.startat {
        parts.push(format!("--startat={startat}"));
    }
    if let Some(stopbefore) = &args.stopbefore {
        parts.push(format!("--stopbefore={stopbefore}"));
    }
    if args.verbose {
        parts.push("--verbose".to_string());
    }
    if args.dangerously_fast {
        parts.push("--dangerously-fast".to_string());
    }

    if !args.components.is_empty() {
        parts.push("-d".to_string());
        parts.extend(args.components.iter().cloned());
    }

    for command in &args.commands {
        match command {
            Command::Restart { target } => {
                parts.push("-r".to_string());
                parts.push(target.clone());
            }
            other => {
                parts.push("-c".to_string());
                parts.extend(other.cmdline());
            }
        }
    }

    parts.join(" ")
}

/// Human preview of what the deploy is about to do.
pub fn action_summary(config: &Config, args: &ResolvedArgs) -> String {
    let expanded = format!("rollout {}", canonical_commandline(config, args));

    let mut points = Vec::new();
    for component in &args.components {
        points.push(format!("Deploy the `{component}` component."));
    }
    for command in &args.commands {
        match command {
            Command::Restart { target } => {
                points.push(format!("Restart `{target}` applications."));
            }
            other => points.push(format!("Run the `{}` command.", other.cmdline().join(" "))),
        }
    }

    let mut details = Vec::new();
    for host_ref in &args.host_refs {
        details.push(format!("on `{host_ref}` hosts"));
    }
    details.push(format!("{} at a time", args.parallel));
    if args.timeout > 0 {
        details.push(format!(
            "timing out if a host takes more than {} seconds",
            args.timeout
        ));
    }

    let mut lines = vec![expanded, String::new(), "This will:".to_string(), String::new()];
    lines.extend(points.iter().map(|p| format!("* {p}")));
    lines.push(String::new());
    lines.push(details.join(", "));
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_files;
    use std::io::Write;

    fn test_config() -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
            [deploy]
            log-directory = "/var/log/rollout"
            wordlist = "/usr/share/dict/words"
            code-host = "code-01"
            default-sleeptime = 5
            default-parallel = 2
            default-restart = ["all"]

            [hostsource]
            provider = "mock"

            [transport]
            provider = "mock"
            "#,
        )
        .unwrap();
        load_files(&[file.path().to_path_buf()], "test").unwrap()
    }

    fn parse(args: &[&str]) -> DeployArgs {
        DeployArgs::try_parse_from(std::iter::once("rollout").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_come_from_the_profile() {
        let config = test_config();
        let resolved = resolve(&config, parse(&["-h", "app-01"])).unwrap();
        assert_eq!(resolved.parallel, 2);
        assert_eq!(resolved.sleeptime, 5);
        assert_eq!(resolved.timeout, 0);
        // default-restart kicks in when no -r was given
        assert_eq!(
            resolved.commands,
            vec![Command::Restart {
                target: "all".to_string()
            }]
        );
    }

    #[test]
    fn explicit_restarts_replace_the_default() {
        let config = test_config();
        let resolved = resolve(&config, parse(&["-h", "app-01", "-r", "frontends"])).unwrap();
        assert_eq!(
            resolved.commands,
            vec![Command::Restart {
                target: "frontends".to_string()
            }]
        );
    }

    #[test]
    fn component_none_clears_the_default() {
        let config = test_config();
        let resolved = resolve(&config, parse(&["-h", "app-01", "-d", "none"])).unwrap();
        assert!(resolved.components.is_empty());
    }

    #[test]
    fn generic_commands_come_before_restarts() {
        let config = test_config();
        let resolved = resolve(
            &config,
            parse(&["-h", "app-01", "-c", "components", "-r", "all"]),
        )
        .unwrap();
        assert_eq!(
            resolved.commands,
            vec![
                Command::Components,
                Command::Restart {
                    target: "all".to_string()
                }
            ]
        );
    }

    #[test]
    fn no_hosts_anywhere_is_an_error() {
        let config = test_config();
        assert!(resolve(&config, parse(&["-d", "svc"])).is_err());
    }

    #[test]
    fn canonical_commandline_round_trips() {
        let config = test_config();
        let resolved = resolve(
            &config,
            parse(&[
                "-h",
                "app-01",
                "app-02",
                "--parallel",
                "4",
                "--sleeptime",
                "9",
                "--startat",
                "app-02",
                "-v",
                "-d",
                "svc",
                "web",
                "-c",
                "components",
                "-r",
                "all",
            ]),
        )
        .unwrap();

        let canonical = canonical_commandline(&config, &resolved);
        let words: Vec<&str> = canonical.split(' ').collect();
        let reparsed = resolve(&config, parse(&words)).unwrap();

        assert_eq!(reparsed, resolved);
        // and the rendering itself is stable
        assert_eq!(canonical_commandline(&config, &reparsed), canonical);
    }

    #[test]
    fn canonical_commandline_skips_profile_defaults() {
        let config = test_config();
        let resolved = resolve(&config, parse(&["-h", "app-01"])).unwrap();
        let canonical = canonical_commandline(&config, &resolved);
        assert!(!canonical.contains("--sleeptime"));
        assert!(canonical.contains("--parallel=2"));
        assert!(canonical.contains("--timeout=0"));
    }
}
