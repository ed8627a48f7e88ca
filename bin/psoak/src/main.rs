//! ---
//! psoak_section: "09-cli"
//! psoak_subsection: "binary"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Command line entrypoint for the soak harness."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use psoak_client::{AuditReport, CommandLifecycle, HttpController, LogAudit};
use psoak_common::{init_tracing, AttemptBudget, HarnessConfig, LifecycleConfig, LoggingConfig};
use psoak_metrics::{new_registry, HarnessMetrics};
use psoak_orchestrator::{ScenarioReport, WorkloadOrchestrator};
use psoak_resilience::ResilienceMetrics;
use psoak_sim::{SimulatedController, SimulationConfig, SimulatorServer};
use psoak_verify::{
    BalanceExpectation, CheckPolicy, ConsistencyChecker, NodeLoadTable, SnapshotCollector,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = ["psoak.toml", "configs/psoak.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Scale and lifecycle soak harness for placement controllers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the full scenario against a live controller")]
    Run {
        #[arg(long, value_name = "FILE", help = "Path to configuration file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Run the full scenario against the in-memory simulated controller")]
    Simulate {
        #[arg(long, value_name = "FILE", help = "Base configuration; defaults apply when omitted")]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 5, help = "Simulated node count")]
        nodes: u64,
        #[arg(long, default_value_t = 400, help = "Resources to create")]
        resources: usize,
        #[arg(long, help = "Override the scenario seed")]
        seed: Option<u64>,
    },
    #[command(about = "Check convergence and balance of a live controller once")]
    Check {
        #[arg(long, value_name = "FILE", help = "Path to configuration file")]
        config: Option<PathBuf>,
        #[arg(long, help = "Expected shard total; defaults to every listed shard")]
        expected_shards: Option<usize>,
    },
    #[command(about = "Serve the simulated controller over HTTP until Ctrl-C")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:1234", help = "Listen address")]
        listen: SocketAddr,
        #[arg(long, default_value_t = 5, help = "Simulated node count")]
        nodes: u64,
    },
}

#[derive(Debug, Serialize)]
struct RunOutput {
    report: ScenarioReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_audit: Option<AuditReport>,
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    expected_shards: usize,
    converged: usize,
    load: NodeLoadTable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => run(load_config(config, true)?).await,
        Commands::Simulate {
            config,
            nodes,
            resources,
            seed,
        } => {
            let base = match config {
                Some(path) => HarnessConfig::from_path(&path)?,
                None => HarnessConfig::default(),
            };
            simulate(base, nodes, resources, seed).await
        }
        Commands::Check {
            config,
            expected_shards,
        } => check(load_config(config, false)?, expected_shards).await,
        Commands::Serve { listen, nodes } => serve(listen, nodes).await,
    }
}

/// Load configuration and start tracing; scenario runs log to a file keyed by seed.
fn load_config(path: Option<PathBuf>, scenario_run: bool) -> Result<HarnessConfig> {
    let mut candidates: Vec<PathBuf> = path.into_iter().collect();
    candidates.extend(DEFAULT_CONFIG_CANDIDATES.iter().map(PathBuf::from));
    let loaded = HarnessConfig::load_with_source(&candidates)?;
    let seed = scenario_run.then_some(loaded.config.scenario.seed);
    let run_log = init_tracing("psoak", &loaded.config.logging, seed)?;
    info!(
        config = %loaded.source.display(),
        run_log = %run_log.display(),
        "configuration loaded"
    );
    Ok(loaded.config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

async fn run(config: HarnessConfig) -> Result<()> {
    let controller = Arc::new(HttpController::new(&config.controller)?);
    let lifecycle = Arc::new(CommandLifecycle::new(&config.controller)?);
    info!(controller = %controller.base_url(), "starting soak scenario");

    let report = execute(&config, controller, lifecycle).await?;
    let log_audit = match &config.controller.log_file {
        Some(path) => Some(
            LogAudit::new(&config.controller.allowed_log_patterns)?
                .scan_file(path)
                .await?,
        ),
        None => None,
    };
    let clean = log_audit.as_ref().map_or(true, AuditReport::is_clean);
    print_json(&RunOutput { report, log_audit })?;
    if !clean {
        bail!("controller log contains unexpected errors or warnings");
    }
    Ok(())
}

async fn execute(
    config: &HarnessConfig,
    controller: Arc<dyn psoak_api::PlacementController>,
    lifecycle: Arc<dyn psoak_api::ClusterLifecycle>,
) -> Result<ScenarioReport> {
    let registry = new_registry();
    let orchestrator = WorkloadOrchestrator::new(config, controller, lifecycle)?
        .with_metrics(HarnessMetrics::new(registry.clone())?)
        .with_resilience_metrics(ResilienceMetrics::new(registry.clone())?);
    let outcome = orchestrator.run().await;
    match psoak_metrics::encode_text(&registry) {
        Ok(exposition) => debug!(%exposition, "harness metrics"),
        Err(err) => warn!(error = %err, "unable to render harness metrics"),
    }
    outcome.map_err(|err| {
        error!(kind = err.kind(), error = %err, "soak scenario failed");
        anyhow::Error::new(err)
    })
}

async fn simulate(
    mut config: HarnessConfig,
    nodes: u64,
    resources: usize,
    seed: Option<u64>,
) -> Result<()> {
    config.scenario.resource_count = resources;
    config.scenario.api_concurrency = (resources / 8).max(1);
    config.scenario.mixed_ops_multiplier = 4;
    if let Some(seed) = seed {
        config.scenario.seed = seed;
    }
    config.lifecycle = LifecycleConfig::uniform(AttemptBudget::new(24, Duration::from_millis(5)));
    config.validate()?;
    init_tracing("psoak", &config.logging, Some(config.scenario.seed))?;

    let per_shard = config.scenario.memory_per_shard_bytes as f64;
    let sim = Arc::new(SimulatedController::new(
        SimulationConfig::default()
            .with_nodes(nodes)
            .with_memory(per_shard, per_shard / 4.0),
    ));
    info!(nodes, resources, seed = config.scenario.seed, "starting simulated soak scenario");
    let report = execute(&config, sim.clone(), sim).await?;
    print_json(&RunOutput {
        report,
        log_audit: None,
    })
}

async fn check(config: HarnessConfig, expected_shards: Option<usize>) -> Result<()> {
    let controller = Arc::new(HttpController::new(&config.controller)?);
    let collector = SnapshotCollector::new(controller);
    let checker = ConsistencyChecker::new(CheckPolicy::from(&config.checks));

    let snapshot = collector.collect().await?;
    let expected = expected_shards.unwrap_or(snapshot.len());
    let load = checker.expect_converged(&snapshot, expected)?;
    checker.expect_balanced(&load, expected, &BalanceExpectation::present())?;
    print_json(&CheckOutput {
        expected_shards: expected,
        converged: snapshot.converged_count(),
        load,
    })
}

async fn serve(listen: SocketAddr, nodes: u64) -> Result<()> {
    init_tracing("psoak", &LoggingConfig::default(), None)?;
    let sim = Arc::new(SimulatedController::new(
        SimulationConfig::default().with_nodes(nodes),
    ));
    let handle = SimulatorServer::new(sim, listen).spawn().await?;
    info!(address = %handle.local_addr(), "serving simulated controller; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    handle.shutdown().await
}
