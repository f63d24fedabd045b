//! Logging assembly
//!
//! Two sinks: a console layer whose level can be flipped at runtime (the
//! front-end boosts it during the build phase) and a per-deploy DEBUG log
//! file named after the deploy word.

use std::path::PathBuf;

use chrono::Utc;
use tracing_subscriber::Registry;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layer as _, SubscriberExt};
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, ConfigError};

type ConsoleHandle = reload::Handle<LevelFilter, Registry>;

/// Runtime control over how chatty the console is.
#[derive(Clone)]
pub struct ConsoleVerbosity {
    handle: ConsoleHandle,
    verbose: bool,
}

impl ConsoleVerbosity {
    /// Show DEBUG output on the console
    pub fn boost(&self) {
        let _ = self.handle.reload(LevelFilter::DEBUG);
    }

    /// Back to the configured level
    pub fn restore(&self) {
        let level = if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let _ = self.handle.reload(level);
    }
}

pub struct LogSetup {
    pub log_path: PathBuf,
    pub console: ConsoleVerbosity,
}

/// Install the global subscriber and open the deploy log file.
pub fn init(config: &Config, word: &str, verbose: bool) -> Result<LogSetup, ConfigError> {
    let initial = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let (console_filter, handle) = reload::Layer::new(initial);

    let log_name = format!("{}-{}.log", Utc::now().format("%Y-%m-%d_%H:%M:%S"), word);
    let log_path = config.deploy.log_directory.join(log_name);
    let log_file = std::fs::File::create(&log_path).map_err(|e| ConfigError::Unwritable {
        path: log_path.clone(),
        reason: e.to_string(),
    })?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(console_filter);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::sync::Arc::new(log_file))
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(LogSetup {
        log_path,
        console: ConsoleVerbosity { handle, verbose },
    })
}
