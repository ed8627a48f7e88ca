//! ---
//! psoak_section: "01-core-functionality"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Harness configuration model and loader."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;

fn default_base_url() -> String {
    "http://127.0.0.1:1234".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_ready_path() -> String {
    "/ready".to_owned()
}

fn default_ready_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_resource_count() -> usize {
    4000
}

fn default_shards_per_resource() -> u8 {
    2
}

fn default_stripe_size() -> u32 {
    1024
}

fn default_api_concurrency() -> usize {
    135
}

fn default_mixed_ops_multiplier() -> usize {
    4
}

fn default_seed() -> u64 {
    1234
}

fn default_secondaries() -> usize {
    1
}

fn default_resource_config() -> BTreeMap<String, Value> {
    BTreeMap::from([("heatmap_period".to_owned(), Value::from("10s"))])
}

fn default_memory_per_shard_bytes() -> u64 {
    128 * 1024
}

fn default_idle_reconcile_bound() -> Duration {
    Duration::from_secs(1)
}

fn default_readiness_bound() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_balance_tolerance() -> f64 {
    0.05
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_file_filter() -> String {
    "debug".to_owned()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for a harness run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`HarnessConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedHarnessConfig {
    pub config: HarnessConfig,
    pub source: PathBuf,
}

impl HarnessConfig {
    pub const ENV_CONFIG_PATH: &'static str = "PSOAK_CONFIG";

    /// Load configuration from disk, respecting the `PSOAK_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedHarnessConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedHarnessConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedHarnessConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<HarnessConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        self.scenario.validate()?;
        self.lifecycle.validate()?;
        self.checks.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for HarnessConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: HarnessConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// How to reach and manage the controller under test.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request, if the controller requires one.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_ready_path")]
    pub ready_path: String,
    #[serde(default = "default_ready_poll_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub ready_poll_interval: Duration,
    #[serde(default = "default_ready_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub ready_timeout: Duration,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    /// Shell command restarting one storage node; `{node_id}` is substituted.
    #[serde(default)]
    pub node_restart_command: Option<String>,
    /// Controller log file scanned for unexpected errors after a run.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Regexes of controller log lines that are expected under stress.
    #[serde(default)]
    pub allowed_log_patterns: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout: default_request_timeout(),
            ready_path: default_ready_path(),
            ready_poll_interval: default_ready_poll_interval(),
            ready_timeout: default_ready_timeout(),
            stop_command: None,
            start_command: None,
            node_restart_command: None,
            log_file: None,
            allowed_log_patterns: Vec::new(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("controller base_url '{}' is not a URL", self.base_url))?;
        if !self.ready_path.starts_with('/') {
            return Err(anyhow!(
                "controller ready_path '{}' must start with '/'",
                self.ready_path
            ));
        }
        if self.ready_poll_interval.is_zero() {
            return Err(anyhow!("controller ready_poll_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Shape of the generated workload.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_resource_count")]
    pub resource_count: usize,
    #[serde(default = "default_shards_per_resource")]
    pub shards_per_resource: u8,
    #[serde(default = "default_stripe_size")]
    pub stripe_size: u32,
    /// Worker pool size; chosen above the controller's reconcile concurrency.
    #[serde(default = "default_api_concurrency")]
    pub api_concurrency: usize,
    /// Mixed-phase operation count is `api_concurrency * mixed_ops_multiplier`.
    #[serde(default = "default_mixed_ops_multiplier")]
    pub mixed_ops_multiplier: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Secondary locations requested per shard.
    #[serde(default = "default_secondaries")]
    pub secondaries: usize,
    #[serde(default = "default_resource_config")]
    pub resource_config: BTreeMap<String, Value>,
    #[serde(default = "default_memory_per_shard_bytes")]
    pub memory_per_shard_bytes: u64,
    #[serde(default = "default_idle_reconcile_bound")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub idle_reconcile_bound: Duration,
    #[serde(default = "default_readiness_bound")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub readiness_bound: Duration,
    #[serde(default = "default_true")]
    pub stop_on_finish: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            resource_count: default_resource_count(),
            shards_per_resource: default_shards_per_resource(),
            stripe_size: default_stripe_size(),
            api_concurrency: default_api_concurrency(),
            mixed_ops_multiplier: default_mixed_ops_multiplier(),
            seed: default_seed(),
            secondaries: default_secondaries(),
            resource_config: default_resource_config(),
            memory_per_shard_bytes: default_memory_per_shard_bytes(),
            idle_reconcile_bound: default_idle_reconcile_bound(),
            readiness_bound: default_readiness_bound(),
            stop_on_finish: true,
        }
    }
}

impl ScenarioConfig {
    /// Number of resources touched by the mixed operation phase.
    pub fn mixed_op_count(&self) -> usize {
        self.api_concurrency.saturating_mul(self.mixed_ops_multiplier)
    }

    /// Shards the scenario itself creates.
    pub fn created_shards(&self) -> usize {
        self.resource_count * usize::from(self.shards_per_resource.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.resource_count == 0 {
            return Err(anyhow!("scenario resource_count must be positive"));
        }
        if self.api_concurrency == 0 {
            return Err(anyhow!("scenario api_concurrency must be positive"));
        }
        if self.api_concurrency >= self.resource_count {
            return Err(anyhow!(
                "scenario api_concurrency ({}) must be smaller than resource_count ({})",
                self.api_concurrency,
                self.resource_count
            ));
        }
        if self.mixed_op_count() >= self.resource_count {
            return Err(anyhow!(
                "mixed operation count ({}) must be smaller than resource_count ({})",
                self.mixed_op_count(),
                self.resource_count
            ));
        }
        if self.memory_per_shard_bytes == 0 {
            return Err(anyhow!("scenario memory_per_shard_bytes must be positive"));
        }
        Ok(())
    }
}

/// Attempt budget for a retry or poll loop.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptBudget {
    pub max_attempts: usize,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub backoff: Duration,
}

impl AttemptBudget {
    pub const fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("lifecycle {name}.max_attempts must be positive"));
        }
        Ok(())
    }
}

fn default_node_retry() -> AttemptBudget {
    AttemptBudget::new(3, Duration::from_secs(2))
}

fn default_drain_poll() -> AttemptBudget {
    AttemptBudget::new(24, Duration::from_secs(5))
}

fn default_restart_poll() -> AttemptBudget {
    AttemptBudget::new(24, Duration::from_secs(1))
}

fn default_reconcile_poll() -> AttemptBudget {
    AttemptBudget::new(240, Duration::from_millis(500))
}

/// Attempt budgets for the per-node lifecycle phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_node_retry")]
    pub drain_retry: AttemptBudget,
    #[serde(default = "default_drain_poll")]
    pub drain_poll: AttemptBudget,
    #[serde(default = "default_restart_poll")]
    pub restart_poll: AttemptBudget,
    #[serde(default = "default_node_retry")]
    pub fill_retry: AttemptBudget,
    #[serde(default = "default_drain_poll")]
    pub fill_poll: AttemptBudget,
    /// Budget for waiting until `reconcile_all` reports no pending work.
    #[serde(default = "default_reconcile_poll")]
    pub reconcile_poll: AttemptBudget,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_retry: default_node_retry(),
            drain_poll: default_drain_poll(),
            restart_poll: default_restart_poll(),
            fill_retry: default_node_retry(),
            fill_poll: default_drain_poll(),
            reconcile_poll: default_reconcile_poll(),
        }
    }
}

impl LifecycleConfig {
    /// Every budget set to the same values; handy for fast test runs.
    pub fn uniform(budget: AttemptBudget) -> Self {
        Self {
            drain_retry: budget,
            drain_poll: budget,
            restart_poll: budget,
            fill_retry: budget,
            fill_poll: budget,
            reconcile_poll: budget,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.drain_retry.validate("drain_retry")?;
        self.drain_poll.validate("drain_poll")?;
        self.restart_poll.validate("restart_poll")?;
        self.fill_retry.validate("fill_retry")?;
        self.fill_poll.validate("fill_poll")?;
        self.reconcile_poll.validate("reconcile_poll")?;
        Ok(())
    }
}

/// Tolerances applied by the consistency checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// Allowed max-min spread as a fraction of the total shard count.
    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: f64,
    /// Fail when a shard reports more than one attached node.
    #[serde(default = "default_true")]
    pub reject_double_attachment: bool,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            balance_tolerance: default_balance_tolerance(),
            reject_double_attachment: true,
        }
    }
}

impl ChecksConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.balance_tolerance) {
            return Err(anyhow!(
                "checks balance_tolerance must be within [0, 1), got {}",
                self.balance_tolerance
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter for the per-run JSON log file, independent of the console filter.
    #[serde(default = "default_file_filter")]
    pub file_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_filter: default_file_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_scale_scenario() {
        let config = HarnessConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scenario.created_shards(), 8000);
        assert_eq!(config.scenario.mixed_op_count(), 540);
        assert_eq!(config.lifecycle.drain_poll.max_attempts, 24);
        assert_eq!(config.lifecycle.restart_poll.backoff, Duration::from_secs(1));
        assert_eq!(
            config.scenario.resource_config.get("heatmap_period"),
            Some(&Value::from("10s"))
        );
    }

    #[test]
    fn fractional_durations_parse() {
        let config: HarnessConfig = r#"
            [scenario]
            resource_count = 50
            api_concurrency = 4
            mixed_ops_multiplier = 2
            idle_reconcile_bound = 0.25

            [lifecycle.drain_retry]
            max_attempts = 5
            backoff = 0.01
        "#
        .parse()
        .unwrap();
        assert_eq!(config.scenario.idle_reconcile_bound, Duration::from_millis(250));
        assert_eq!(config.lifecycle.drain_retry.max_attempts, 5);
        assert_eq!(config.lifecycle.drain_retry.backoff, Duration::from_millis(10));
        assert_eq!(config.lifecycle.fill_retry.max_attempts, 3);
    }

    #[test]
    fn mixed_ops_must_leave_untouched_resources() {
        let err = r#"
            [scenario]
            resource_count = 10
            api_concurrency = 3
            mixed_ops_multiplier = 4
        "#
        .parse::<HarnessConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("mixed operation count"));
    }

    #[test]
    fn tolerance_out_of_range_is_rejected() {
        let err = "[checks]\nbalance_tolerance = 1.5\n"
            .parse::<HarnessConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("balance_tolerance"));
    }
}
