//! Profile configuration
//!
//! Profiles are TOML files merged from the system config, the selected
//! profile, and the user's own overrides, in that order. Later files win
//! per key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use rollout_exec::SshConfig;
use rollout_inventory::HostEntry;

pub const SYSTEM_CONFIG: &str = "/etc/rollout.toml";
pub const PROFILE_DIRECTORY: &str = "/etc/rollout.d";
pub const USER_CONFIG: &str = ".rollout.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("could not parse {path}: {reason}")]
    Unparseable { path: PathBuf, reason: String },

    #[error("could not write {path}: {reason}")]
    Unwritable { path: PathBuf, reason: String },

    #[error("no configuration found for profile {profile:?}")]
    MissingProfile { profile: String },

    #[error("configuration invalid: {0}")]
    Invalid(String),
}

/// The whole merged profile.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub deploy: DeployConfig,
    pub hostsource: HostSourceConfig,
    pub transport: TransportConfig,
    /// alias -> fnmatch-style globs over host names
    #[serde(default)]
    pub aliases: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeployConfig {
    pub log_directory: PathBuf,
    pub wordlist: PathBuf,
    pub code_host: String,
    pub default_sleeptime: u64,
    pub default_parallel: usize,
    #[serde(default)]
    pub execution_timeout: u64,
    #[serde(default)]
    pub default_hosts: Vec<String>,
    #[serde(default)]
    pub default_components: Vec<String>,
    #[serde(default)]
    pub default_restart: Vec<String>,
}

/// Which fleet backend to use.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum HostSourceConfig {
    /// Fleet listed right in the profile
    Static { hosts: Vec<HostEntry> },
    /// Synthesized fleet for rehearsals
    Mock {
        #[serde(default = "default_mock_app_hosts", rename = "app-hosts")]
        app_hosts: usize,
        #[serde(default = "default_mock_job_hosts", rename = "job-hosts")]
        job_hosts: usize,
    },
}

fn default_mock_app_hosts() -> usize {
    12
}

fn default_mock_job_hosts() -> usize {
    4
}

/// Which command channel to use.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum TransportConfig {
    Ssh {
        #[serde(flatten)]
        ssh: SshConfig,
    },
    Mock,
}

impl Config {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.deploy.default_parallel == 0 {
            return Err(ConfigError::Invalid(
                "[deploy] default-parallel must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Merge `overlay` into `base`, table by table; scalar and array values from
/// the overlay replace the base outright.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Load and merge an explicit list of files; missing files are skipped.
pub fn load_files(paths: &[PathBuf], profile: &str) -> Result<Config, ConfigError> {
    let mut merged: Option<toml::Value> = None;

    for path in paths {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(ConfigError::Unreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let value: toml::Value =
            toml::from_str(&contents).map_err(|e| ConfigError::Unparseable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        match merged.as_mut() {
            Some(base) => merge_toml(base, value),
            None => merged = Some(value),
        }
    }

    let merged = merged.ok_or_else(|| ConfigError::MissingProfile {
        profile: profile.to_string(),
    })?;
    let config: Config = merged
        .try_into()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    config.validate()
}

/// The standard three-file merge for a named profile.
pub fn load(profile: &str) -> Result<Config, ConfigError> {
    let mut paths = vec![
        PathBuf::from(SYSTEM_CONFIG),
        Path::new(PROFILE_DIRECTORY).join(format!("{profile}.toml")),
    ];
    if let Some(home) = std::env::home_dir() {
        paths.push(home.join(USER_CONFIG));
    }
    load_files(&paths, profile)
}

/// Profile names available in a directory, for the usage message
pub fn available_profiles(directory: &Path) -> Vec<String> {
    let mut profiles: Vec<String> = std::fs::read_dir(directory)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == "toml") {
                        path.file_stem().map(|s| s.to_string_lossy().into_owned())
                    } else {
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    profiles.sort();
    profiles
}
