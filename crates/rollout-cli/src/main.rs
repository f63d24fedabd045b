//! rollout: roll stuff to servers
//!
//! Usage: `rollout <profile> [options]`. The profile picks the config; the
//! remaining flags choose hosts, components and commands. See `--help` after
//! a profile name for the full surface.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tracing::info;

use rollout_core::hostlist::plan_host_order;
use rollout_core::{Deployer, DeployerArgs, EventBus};

mod args;
mod config;
mod frontend;
mod logging;
mod providers;
mod util;
mod word;

use args::{DeployArgs, ProfileArgs};
use frontend::strategy::TerminalConsole;
use frontend::{HeadfulFrontend, HeadlessFrontend};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    if std::env::args().len() < 2 {
        println!("usage: rollout <profile> [options]");
        let profiles = config::available_profiles(Path::new(config::PROFILE_DIRECTORY));
        if !profiles.is_empty() {
            println!("available profiles: {}", profiles.join(", "));
        }
        return Ok(());
    }

    let profile_args = ProfileArgs::parse();
    let config = config::load(&profile_args.profile)?;

    let deploy_args = match DeployArgs::try_parse_from(
        std::iter::once("rollout".to_string()).chain(profile_args.rest.iter().cloned()),
    ) {
        Ok(parsed) => parsed,
        Err(e) => e.exit(),
    };
    let resolved = args::resolve(&config, deploy_args)?;

    if !resolved.list_hosts {
        println!("{}", args::action_summary(&config, &resolved));
    }
    if resolved.test {
        return Ok(());
    }

    let host_source = providers::build_host_source(&config.hostsource)?;
    let transport = providers::build_transport(&config.transport);

    let all_hosts = host_source
        .get_hosts()
        .await
        .map_err(|e| eyre!("could not fetch host list: {e}"))?;
    let hosts = plan_host_order(
        &resolved.host_refs,
        &all_hosts,
        &config.aliases,
        resolved.startat.as_deref(),
        resolved.stopbefore.as_deref(),
    )?;

    if resolved.list_hosts {
        for host in &hosts {
            println!("{} {}", host.name, host.address);
        }
        return Ok(());
    }

    let word = word::deploy_word(&config.deploy.wordlist);
    let log = logging::init(&config, &word, resolved.verbose)?;
    info!(word = %word, log = %log.log_path.display(), "deploy starting");

    let event_bus = Arc::new(EventBus::new());
    if !resolved.dangerously_fast && std::io::stdout().is_terminal() {
        event_bus.register(Arc::new(HeadfulFrontend::new(
            &hosts,
            Some(log.console),
            Arc::new(TerminalConsole),
        )));
    } else {
        event_bus.register(Arc::new(HeadlessFrontend::new(&hosts, Some(log.console))));
    }

    let deployer = Deployer::new(DeployerArgs {
        host_source,
        transport,
        event_bus,
        parallel: resolved.parallel,
        sleeptime: resolved.sleeptime,
        execution_timeout: resolved.timeout,
        dangerously_fast: resolved.dangerously_fast,
        code_host: config.deploy.code_host.clone(),
    });

    deployer
        .run_deploy(hosts, resolved.components, resolved.commands)
        .await
        .map_err(|e| eyre!("{e}"))?;

    Ok(())
}
