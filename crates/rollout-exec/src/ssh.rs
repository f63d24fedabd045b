//! SSH transport using the russh crate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::traits::{Connection, ResultMap, Transport};

/// SSH settings from the `[transport]` config table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SshConfig {
    /// Remote user to authenticate as
    pub user: String,
    /// Path to the private key
    pub key: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Remote binary that interprets deploy commands
    pub command: String,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Hosts churn constantly in the autoscaled fleet, so known_hosts
        // verification is not practical here.
        Ok(true)
    }
}

/// SSH transport.
///
/// Loads the private key once at `initialize`, then opens one session per
/// host. Remote commands are invoked as `sudo <command-binary> <argv...>` and
/// are expected to print a JSON object on stdout.
pub struct SshTransport {
    config: SshConfig,
    key: Mutex<Option<Arc<PrivateKey>>>,
}

impl SshTransport {
    /// Create an uninitialized transport
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            key: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        let key = load_secret_key(&self.config.key, None)
            .map_err(|e| TransportError::Key(e.to_string()))?;
        *self.key.lock().await = Some(Arc::new(key));
        Ok(())
    }

    async fn connect_to(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        let key = self
            .key
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::Key("transport not initialized".to_string()))?;

        let config = Arc::new(client::Config::default());
        let connect = client::connect(config, (address, self.config.port), SshClientHandler);
        let mut session = timeout(Duration::from_secs(self.config.connect_timeout), connect)
            .await
            .map_err(|_| {
                TransportError::Connection(format!(
                    "timed out connecting to {address} after {} seconds",
                    self.config.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &self.config.user,
                PrivateKeyWithHashAlg::new(key, hash_alg),
            )
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if !auth_res.success() {
            return Err(TransportError::Connection(format!(
                "unable to authenticate to {address}"
            )));
        }

        debug!(host = %address, "ssh session established");

        Ok(Box::new(SshConnection {
            address: address.to_string(),
            command_binary: self.config.command.clone(),
            session: Some(session),
        }))
    }
}

/// One SSH session to one host.
pub struct SshConnection {
    address: String,
    command_binary: String,
    session: Option<client::Handle<SshClientHandler>>,
}

impl SshConnection {
    async fn run_command(&mut self, command_line: &str) -> Result<ResultMap, TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::Channel("connection already closed".to_string()))?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        channel
            .exec(true, command_line)
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut exit_status = None;
        let mut exit_signal = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    for line in String::from_utf8_lossy(&data).lines() {
                        debug!(host = %self.address, "{line}");
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    exit_status = Some(status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    exit_signal = Some(format!("{signal_name:?}"));
                }
                Some(ChannelMsg::Eof) | None => break,
                _ => {}
            }
        }

        if let Some(signal) = exit_signal {
            return Err(TransportError::Signal(signal));
        }
        match exit_status {
            Some(0) | None => {}
            Some(status) => return Err(TransportError::NonZeroStatus(status)),
        }

        decode_result(&stdout)
    }
}

/// Remote commands answer with a JSON object on stdout; no output at all is
/// treated as an empty result.
fn decode_result(stdout: &[u8]) -> Result<ResultMap, TransportError> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Ok(ResultMap::new());
    }
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(TransportError::MalformedResponse(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(TransportError::MalformedResponse(e.to_string())),
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn execute(
        &mut self,
        command: &[String],
        timeout_secs: u64,
    ) -> Result<ResultMap, TransportError> {
        let args = shell_words::join(command.iter().map(String::as_str));
        let command_line = format!("sudo {} {}", self.command_binary, args);
        debug!(host = %self.address, command = %command_line, "executing");

        if timeout_secs == 0 {
            return self.run_command(&command_line).await;
        }

        match timeout(
            Duration::from_secs(timeout_secs),
            self.run_command(&command_line),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::ExecutionTimeout {
                command: command.join(" "),
                seconds: timeout_secs,
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(session) = self.session.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| TransportError::Channel(e.to_string()))?;
            info!(host = %self.address, "disconnected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::decode_result;
    use crate::error::TransportError;

    #[test]
    fn empty_output_is_an_empty_result() {
        let map = decode_result(b"  \n").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn object_output_is_decoded() {
        let map = decode_result(br#"{"svc": "repo_changed"}"#).unwrap();
        assert_eq!(map["svc"], "repo_changed");
    }

    #[test]
    fn non_object_output_is_malformed() {
        assert!(matches!(
            decode_result(b"[1, 2]"),
            Err(TransportError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_result(b"not json"),
            Err(TransportError::MalformedResponse(_))
        ));
    }
}
