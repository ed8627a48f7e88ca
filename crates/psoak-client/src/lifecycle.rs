//! ---
//! psoak_section: "07-controller-client"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Cluster lifecycle driven by operator-supplied shell commands."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use psoak_api::{ClusterLifecycle, HarnessError, HarnessResult, NodeId};
use psoak_common::ControllerConfig;
use reqwest::Client;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::http::directory_url;

/// Placeholder replaced with the node id in the node restart command.
pub const NODE_ID_PLACEHOLDER: &str = "{node_id}";

/// Stops, starts and probes the controller through configured shell commands.
///
/// Commands run under `sh -c` with stdio detached, so a start command may
/// leave a background process behind.
#[derive(Debug, Clone)]
pub struct CommandLifecycle {
    stop_command: Option<String>,
    start_command: Option<String>,
    node_restart_command: Option<String>,
    client: Client,
    ready_url: Url,
    ready_poll_interval: Duration,
    ready_timeout: Duration,
}

impl CommandLifecycle {
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let base = directory_url(&config.base_url)
            .with_context(|| format!("controller base_url '{}' is not a URL", config.base_url))?;
        let ready_url = base
            .join(config.ready_path.trim_start_matches('/'))
            .with_context(|| format!("ready_path '{}' cannot be joined", config.ready_path))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build readiness http client")?;
        Ok(Self {
            stop_command: config.stop_command.clone(),
            start_command: config.start_command.clone(),
            node_restart_command: config.node_restart_command.clone(),
            client,
            ready_url,
            ready_poll_interval: config.ready_poll_interval,
            ready_timeout: config.ready_timeout,
        })
    }

    pub fn ready_url(&self) -> &Url {
        &self.ready_url
    }

    async fn run(&self, action: &str, command: Option<&str>) -> HarnessResult<()> {
        let Some(command) = command else {
            return Err(lifecycle_error(action, "no command configured"));
        };
        debug!(action, command, "running lifecycle command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| lifecycle_error(action, format!("failed to spawn '{command}': {err}")))?;
        if !status.success() {
            warn!(action, command, %status, "lifecycle command failed");
            return Err(lifecycle_error(
                action,
                format!("'{command}' exited with {status}"),
            ));
        }
        info!(action, "lifecycle command completed");
        Ok(())
    }

    async fn probe_ready(&self) -> Result<bool, reqwest::Error> {
        let response = self.client.get(self.ready_url.clone()).send().await?;
        Ok(response.status().is_success())
    }
}

fn lifecycle_error(action: &str, message: impl Into<String>) -> HarnessError {
    HarnessError::Lifecycle {
        action: action.to_owned(),
        message: message.into(),
    }
}

/// Substitute the node id into a restart command template.
pub fn node_command(template: &str, node: NodeId) -> String {
    template.replace(NODE_ID_PLACEHOLDER, &node.to_string())
}

#[async_trait]
impl ClusterLifecycle for CommandLifecycle {
    async fn stop_controller(&self) -> HarnessResult<()> {
        self.run("stop_controller", self.stop_command.as_deref())
            .await
    }

    async fn start_controller(&self) -> HarnessResult<()> {
        self.run("start_controller", self.start_command.as_deref())
            .await
    }

    async fn wait_until_ready(&self) -> HarnessResult<Duration> {
        let started = Instant::now();
        loop {
            match self.probe_ready().await {
                Ok(true) => {
                    let elapsed = started.elapsed();
                    info!(elapsed_ms = elapsed.as_millis() as u64, "controller ready");
                    return Ok(elapsed);
                }
                Ok(false) => debug!(url = %self.ready_url, "controller not ready yet"),
                Err(err) => debug!(url = %self.ready_url, error = %err, "readiness probe failed"),
            }
            if started.elapsed() >= self.ready_timeout {
                return Err(lifecycle_error(
                    "wait_until_ready",
                    format!(
                        "{} did not answer 2xx within {:?}",
                        self.ready_url, self.ready_timeout
                    ),
                ));
            }
            sleep(self.ready_poll_interval).await;
        }
    }

    async fn restart_node(&self, node: NodeId) -> HarnessResult<()> {
        let command = self
            .node_restart_command
            .as_deref()
            .map(|template| node_command(template, node));
        self.run(&format!("restart node {node}"), command.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_node_placeholder() {
        assert_eq!(
            node_command("systemctl restart node@{node_id} && touch /tmp/{node_id}", NodeId(4)),
            "systemctl restart node@4 && touch /tmp/4"
        );
    }

    #[test]
    fn ready_url_uses_configured_path() {
        let config = ControllerConfig {
            base_url: "http://127.0.0.1:1234/".into(),
            ready_path: "/status/ready".into(),
            ..ControllerConfig::default()
        };
        let lifecycle = CommandLifecycle::new(&config).unwrap();
        assert_eq!(
            lifecycle.ready_url().as_str(),
            "http://127.0.0.1:1234/status/ready"
        );

        let prefixed = ControllerConfig {
            base_url: "http://127.0.0.1:1234/ctl".into(),
            ..config
        };
        assert_eq!(
            CommandLifecycle::new(&prefixed).unwrap().ready_url().as_str(),
            "http://127.0.0.1:1234/ctl/status/ready"
        );
    }

    #[tokio::test]
    async fn missing_command_is_a_lifecycle_error() {
        let lifecycle = CommandLifecycle::new(&ControllerConfig::default()).unwrap();
        let err = lifecycle.stop_controller().await.unwrap_err();
        assert_eq!(err.kind(), "lifecycle");
        assert!(err.to_string().contains("no command configured"));
    }
}
