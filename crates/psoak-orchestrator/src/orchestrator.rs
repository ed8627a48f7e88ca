//! ---
//! psoak_section: "06-orchestration"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Phase driver for the placement soak scenario."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use psoak_api::{
    ClusterLifecycle, CreateResourceRequest, HarnessError, HarnessResult, NodeId,
    NodeSchedulingPolicy, PlacementController, PlacementPolicy, ResourceId, ShardParameters,
    SubResourceId, RESIDENT_MEMORY_METRIC,
};
use psoak_common::{AttemptBudget, HarnessConfig, LifecycleConfig, ScenarioConfig};
use psoak_logging::{log_phase_event, psoak_info, psoak_warn, LogContext, PhaseOutcome};
use psoak_metrics::HarnessMetrics;
use psoak_resilience::{
    ConditionPoller, PollPolicy, ResilienceMetrics, RetryExecutor, RetryPolicy,
};
use psoak_verify::{
    BalanceExpectation, CheckPolicy, ConsistencyChecker, NodeLoadTable, SnapshotCollector,
};
use tokio::time::Instant;
use tracing::info;

use crate::chooser::{MixedOperation, OperationChooser};
use crate::pool::WorkerPool;
use crate::report::{NodeCycleReport, ScenarioReport};

pub const PHASE_BASELINE: &str = "baseline";
pub const PHASE_BULK_CREATE: &str = "bulk_create";
pub const PHASE_MIXED_OPERATIONS: &str = "mixed_operations";
pub const PHASE_POST_CHECK: &str = "post_phase_check";
pub const PHASE_IDLE_RECONCILE: &str = "idle_reconcile";
pub const PHASE_CONTROLLER_RESTART: &str = "controller_restart";
pub const PHASE_NODE_LIFECYCLE: &str = "node_lifecycle";
pub const PHASE_WRAP_UP: &str = "wrap_up";

const PENDING_RECONCILES: &str = "pending reconciles";
const SCHEDULING_POLICY: &str = "scheduling policy";

/// Drives the soak scenario against a controller and its lifecycle collaborator.
///
/// `run` executes every phase in order. Each phase is also public so tests can
/// drive them one at a time; later phases require [`WorkloadOrchestrator::baseline`]
/// to have run.
pub struct WorkloadOrchestrator {
    scenario: ScenarioConfig,
    budgets: LifecycleConfig,
    controller: Arc<dyn PlacementController>,
    lifecycle: Arc<dyn ClusterLifecycle>,
    collector: SnapshotCollector,
    checker: ConsistencyChecker,
    chooser: OperationChooser,
    pool: WorkerPool,
    metrics: Option<HarnessMetrics>,
    resilience: Option<ResilienceMetrics>,
    injected_ids: Option<Vec<ResourceId>>,
    created: Vec<ResourceId>,
    nodes: Vec<NodeId>,
    expected_total: Option<usize>,
    report: ScenarioReport,
}

impl WorkloadOrchestrator {
    pub fn new(
        config: &HarnessConfig,
        controller: Arc<dyn PlacementController>,
        lifecycle: Arc<dyn ClusterLifecycle>,
    ) -> HarnessResult<Self> {
        config
            .scenario
            .validate()
            .map_err(|err| HarnessError::InvalidScenario(format!("{err:#}")))?;
        config
            .lifecycle
            .validate()
            .map_err(|err| HarnessError::InvalidScenario(format!("{err:#}")))?;

        Ok(Self {
            scenario: config.scenario.clone(),
            budgets: config.lifecycle.clone(),
            collector: SnapshotCollector::new(controller.clone()),
            controller,
            lifecycle,
            checker: ConsistencyChecker::new(CheckPolicy::from(&config.checks)),
            chooser: OperationChooser::seeded(config.scenario.seed),
            pool: WorkerPool::new(config.scenario.api_concurrency),
            metrics: None,
            resilience: None,
            injected_ids: None,
            created: Vec::new(),
            nodes: Vec::new(),
            expected_total: None,
            report: ScenarioReport::default(),
        })
    }

    /// Replace the seeded chooser built from the scenario seed.
    pub fn with_chooser(mut self, chooser: OperationChooser) -> Self {
        self.chooser = chooser;
        self
    }

    /// Create these resources instead of generating identifiers.
    pub fn with_resource_ids(mut self, ids: Vec<ResourceId>) -> Self {
        self.injected_ids = Some(ids);
        self
    }

    pub fn with_metrics(mut self, metrics: HarnessMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_resilience_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        self.resilience = Some(metrics);
        self
    }

    pub fn report(&self) -> &ScenarioReport {
        &self.report
    }

    pub fn created_resources(&self) -> &[ResourceId] {
        &self.created
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Shards expected once creation finished: baseline plus created.
    pub fn expected_total(&self) -> HarnessResult<usize> {
        self.expected_total.ok_or_else(|| {
            HarnessError::InvalidScenario("baseline phase has not run".to_owned())
        })
    }

    /// Run every phase in order and return the report.
    pub async fn run(mut self) -> HarnessResult<ScenarioReport> {
        self.baseline().await?;
        self.bulk_create().await?;
        self.mixed_operations().await?;
        self.post_phase_check().await?;
        self.idle_reconcile().await?;
        self.restart_controller().await?;
        self.node_lifecycle().await?;
        self.wrap_up().await?;
        info!(
            resources = self.report.resources_created,
            shards = self.report.expected_shards,
            "scenario completed"
        );
        Ok(self.report)
    }

    /// Record the node set and the shards that existed before the scenario.
    pub async fn baseline(&mut self) -> HarnessResult<usize> {
        let started = Instant::now();
        let result: HarnessResult<usize> = async {
            let nodes = self.controller.list_nodes().await?;
            if nodes.is_empty() {
                return Err(HarnessError::InvalidScenario(
                    "controller reports no nodes".to_owned(),
                ));
            }
            self.nodes = nodes.iter().map(|node| node.id).collect();
            let baseline = self.collector.collect().await?.len();
            let expected = baseline + self.scenario.created_shards();
            self.expected_total = Some(expected);
            self.report.nodes = self.nodes.clone();
            self.report.baseline_shards = baseline;
            self.report.expected_shards = expected;
            if let Some(metrics) = &self.metrics {
                metrics.set_expected_shards(expected);
            }
            info!(nodes = self.nodes.len(), baseline, expected, "baseline recorded");
            Ok(expected)
        }
        .await;
        self.finish_phase(PHASE_BASELINE, started, result)
    }

    /// Create every resource concurrently and wait for all creations.
    pub async fn bulk_create(&mut self) -> HarnessResult<()> {
        let started = Instant::now();
        let result: HarnessResult<()> = async {
            let ids = match self.injected_ids.take() {
                Some(ids) if ids.len() != self.scenario.resource_count => {
                    return Err(HarnessError::InvalidScenario(format!(
                        "{} resource ids injected for a scenario of {}",
                        ids.len(),
                        self.scenario.resource_count
                    )));
                }
                Some(ids) => ids,
                None => (0..self.scenario.resource_count)
                    .map(|_| ResourceId::generate())
                    .collect(),
            };

            let controller = self.controller.clone();
            let metrics = self.metrics.clone();
            let shard_parameters = ShardParameters {
                count: self.scenario.shards_per_resource,
                stripe_size: self.scenario.stripe_size,
            };
            let placement_policy = PlacementPolicy::Attached(self.scenario.secondaries);
            let config = self.scenario.resource_config.clone();

            self.pool
                .run_all(ids.clone(), move |resource_id| {
                    let controller = controller.clone();
                    let metrics = metrics.clone();
                    let request = CreateResourceRequest {
                        resource_id,
                        shard_parameters,
                        placement_policy,
                        config: config.clone(),
                    };
                    async move {
                        let result = controller.create_resource(request).await;
                        if let Some(metrics) = &metrics {
                            metrics.record_operation("create", result.is_ok());
                        }
                        result
                    }
                })
                .await?;

            let seconds = started.elapsed().as_secs_f64();
            info!(
                created = ids.len(),
                seconds,
                rate = ids.len() as f64 / seconds.max(f64::EPSILON),
                "created resources"
            );
            self.report.resources_created = ids.len();
            self.created = ids;
            Ok(())
        }
        .await;
        self.finish_phase(PHASE_BULK_CREATE, started, result)
    }

    /// Issue one seeded operation per resource from the front of the creation order.
    pub async fn mixed_operations(&mut self) -> HarnessResult<()> {
        let started = Instant::now();
        let result: HarnessResult<()> = async {
            let count = self.scenario.mixed_op_count();
            if count >= self.created.len() {
                return Err(HarnessError::InvalidScenario(format!(
                    "mixed operation count {count} must be smaller than the {} created resources",
                    self.created.len()
                )));
            }

            let shard_count = self.scenario.shards_per_resource;
            let operations: Vec<MixedOperation> = self.created[..count]
                .iter()
                .map(|resource| self.chooser.choose(resource, shard_count, &self.nodes))
                .collect();
            for operation in &operations {
                *self.report.operations.entry(operation.kind()).or_insert(0) += 1;
            }
            info!(operations = ?self.report.operations, "dispatching mixed operations");

            let controller = self.controller.clone();
            let metrics = self.metrics.clone();
            self.pool
                .run_all(operations, move |operation| {
                    let controller = controller.clone();
                    let metrics = metrics.clone();
                    async move {
                        let kind = operation.kind();
                        let result = match operation {
                            MixedOperation::FanOutWrite { resource } => {
                                controller
                                    .create_sub_resource(resource, SubResourceId::generate())
                                    .await
                            }
                            MixedOperation::Migrate { shard, destination } => {
                                controller.migrate_shard(shard, destination).await
                            }
                            MixedOperation::PassthroughRead { resource } => {
                                controller.resource_status(resource).await.map(|_| ())
                            }
                        };
                        if let Some(metrics) = &metrics {
                            metrics.record_operation(kind.as_str(), result.is_ok());
                        }
                        result
                    }
                })
                .await?;
            Ok(())
        }
        .await;
        self.finish_phase(PHASE_MIXED_OPERATIONS, started, result)
    }

    /// Controller self-check and resident memory bound after the concurrent phases.
    pub async fn post_phase_check(&mut self) -> HarnessResult<()> {
        let started = Instant::now();
        let result: HarnessResult<()> = async {
            self.controller.consistency_check().await?;
            self.check_memory().await?;
            Ok(())
        }
        .await;
        self.finish_phase(PHASE_POST_CHECK, started, result)
    }

    /// Wait for reconciliation to go idle, then time one idle pass.
    pub async fn idle_reconcile(&mut self) -> HarnessResult<Duration> {
        let started = Instant::now();
        let result: HarnessResult<Duration> = async {
            self.reconcile_until_idle().await?;
            let call_started = Instant::now();
            let spawned = self.controller.reconcile_all().await?;
            let elapsed = call_started.elapsed();
            info!(seconds = elapsed.as_secs_f64(), spawned, "idle reconcile_all timed");
            if spawned != 0 {
                return Err(HarnessError::consistency(format!(
                    "reconcile_all spawned {spawned} reconciles on an idle controller"
                )));
            }
            if elapsed >= self.scenario.idle_reconcile_bound {
                return Err(HarnessError::LatencyBoundExceeded {
                    operation: "idle reconcile_all".to_owned(),
                    elapsed,
                    bound: self.scenario.idle_reconcile_bound,
                });
            }
            self.report.idle_reconcile_seconds = Some(elapsed.as_secs_f64());
            Ok(elapsed)
        }
        .await;
        self.finish_phase(PHASE_IDLE_RECONCILE, started, result)
    }

    /// Restart the controller and require a clean, fast recovery.
    pub async fn restart_controller(&mut self) -> HarnessResult<NodeLoadTable> {
        let started = Instant::now();
        let result: HarnessResult<NodeLoadTable> = async {
            let expected = self.expected_total()?;
            self.lifecycle.stop_controller().await?;
            self.lifecycle.start_controller().await?;
            let readiness = self.lifecycle.wait_until_ready().await?;
            info!(seconds = readiness.as_secs_f64(), "controller passed readiness check");
            if readiness >= self.scenario.readiness_bound {
                return Err(HarnessError::LatencyBoundExceeded {
                    operation: "controller readiness".to_owned(),
                    elapsed: readiness,
                    bound: self.scenario.readiness_bound,
                });
            }
            self.report.readiness_seconds = Some(readiness.as_secs_f64());

            let spawned = self.controller.reconcile_all().await?;
            if spawned != 0 {
                return Err(HarnessError::consistency(format!(
                    "controller restart left {spawned} reconciles to run"
                )));
            }
            self.controller.consistency_check().await?;
            self.check_memory().await?;
            let snapshot = self.collector.collect().await?;
            let table = self.checker.expect_converged(&snapshot, expected)?;
            info!(counts = ?table, "shard counts before rolling restart");
            Ok(table)
        }
        .await;
        self.finish_phase(PHASE_CONTROLLER_RESTART, started, result)
    }

    /// Drain, restart and fill every node, one node at a time.
    pub async fn node_lifecycle(&mut self) -> HarnessResult<()> {
        let started = Instant::now();
        let result: HarnessResult<()> = async {
            for node in self.nodes.clone() {
                let cycle = self.cycle_node(node).await?;
                self.report.node_cycles.push(cycle);
            }
            Ok(())
        }
        .await;
        self.finish_phase(PHASE_NODE_LIFECYCLE, started, result)
    }

    /// One node's drain/restart/fill cycle with its invariant checks.
    pub async fn cycle_node(&mut self, node: NodeId) -> HarnessResult<NodeCycleReport> {
        let expected = self.expected_total()?;
        let ctx = LogContext::new()
            .with_phase(PHASE_NODE_LIFECYCLE)
            .with_node(node.0);

        self.retry_executor(self.budgets.drain_retry)
            .retry("drain_node", node, |node| {
                let controller = self.controller.clone();
                async move { controller.drain_node(node).await }
            })
            .await?;
        self.await_policy(node, NodeSchedulingPolicy::PauseForRestart, self.budgets.drain_poll)
            .await?;

        let snapshot = self.collector.collect().await?;
        let after_drain = self.checker.expect_converged(&snapshot, expected)?;
        psoak_info!(context = ctx.clone(), "shard counts after drain: {:?}", after_drain);
        self.checker.expect_drained(&after_drain, node, expected)?;

        self.lifecycle.restart_node(node).await?;
        self.await_policy(node, NodeSchedulingPolicy::Active, self.budgets.restart_poll)
            .await?;

        self.retry_executor(self.budgets.fill_retry)
            .retry("fill_node", node, |node| {
                let controller = self.controller.clone();
                async move { controller.fill_node(node).await }
            })
            .await?;
        self.await_policy(node, NodeSchedulingPolicy::Active, self.budgets.fill_poll)
            .await?;

        let snapshot = self.collector.collect().await?;
        let after_fill = self.checker.expect_converged(&snapshot, expected)?;
        self.checker.expect_balanced(
            &after_fill,
            expected,
            &BalanceExpectation::all_loaded(self.nodes.iter().copied()),
        )?;
        psoak_info!(context = ctx.clone(), "shard counts after fill: {:?}", after_fill);

        self.reconcile_until_idle().await?;
        self.controller.consistency_check().await?;
        self.check_memory().await?;

        Ok(NodeCycleReport {
            node,
            after_drain,
            after_fill,
        })
    }

    /// Final self-check and memory check; stops the controller when configured to.
    pub async fn wrap_up(&mut self) -> HarnessResult<()> {
        let started = Instant::now();
        let result: HarnessResult<()> = async {
            self.controller.consistency_check().await?;
            self.check_memory().await?;
            if self.scenario.stop_on_finish {
                self.lifecycle.stop_controller().await?;
            }
            Ok(())
        }
        .await;
        self.finish_phase(PHASE_WRAP_UP, started, result)
    }

    /// Resident memory must stay below the per-shard budget for the created shards.
    pub async fn check_memory(&mut self) -> HarnessResult<f64> {
        let rss = self
            .controller
            .metric(RESIDENT_MEMORY_METRIC)
            .await?
            .ok_or_else(|| HarnessError::MetricUnavailable(RESIDENT_MEMORY_METRIC.to_owned()))?;
        let shards = self.scenario.created_shards();
        let limit = self.scenario.memory_per_shard_bytes as f64 * shards as f64;
        info!(
            rss,
            per_shard = rss / shards.max(1) as f64,
            limit,
            "resident memory"
        );
        self.report.resident_memory_bytes = Some(rss);
        if rss >= limit {
            return Err(HarnessError::ResourceLimitExceeded {
                resource: RESIDENT_MEMORY_METRIC.to_owned(),
                observed: rss,
                limit,
            });
        }
        Ok(rss)
    }

    /// Poll `reconcile_all` until it reports no spawned work.
    pub async fn reconcile_until_idle(&self) -> HarnessResult<()> {
        let controller = self.controller.clone();
        self.poller(self.budgets.reconcile_poll)
            .poll_until(PENDING_RECONCILES, "controller", &0usize, move |_| {
                let controller = controller.clone();
                async move { controller.reconcile_all().await }
            })
            .await
    }

    async fn await_policy(
        &self,
        node: NodeId,
        desired: NodeSchedulingPolicy,
        budget: AttemptBudget,
    ) -> HarnessResult<()> {
        let controller = self.controller.clone();
        let outcome = self
            .poller(budget)
            .poll_until(SCHEDULING_POLICY, node, &desired, move |node| {
                let controller = controller.clone();
                async move {
                    controller
                        .node_status(node)
                        .await
                        .map(|description| description.scheduling)
                }
            })
            .await;
        if let Err(err) = &outcome {
            let ctx = LogContext::new()
                .with_phase(PHASE_NODE_LIFECYCLE)
                .with_node(node.0);
            psoak_warn!(context = ctx, "node never reached {desired}: {err}");
        }
        outcome
    }

    fn retry_executor(&self, budget: AttemptBudget) -> RetryExecutor {
        let executor = RetryExecutor::new(RetryPolicy::from(budget));
        match &self.resilience {
            Some(metrics) => executor.with_metrics(metrics.clone()),
            None => executor,
        }
    }

    fn poller(&self, budget: AttemptBudget) -> ConditionPoller {
        let poller = ConditionPoller::new(PollPolicy::from(budget));
        match &self.resilience {
            Some(metrics) => poller.with_metrics(metrics.clone()),
            None => poller,
        }
    }

    fn finish_phase<T>(
        &mut self,
        phase: &str,
        started: Instant,
        result: HarnessResult<T>,
    ) -> HarnessResult<T> {
        let elapsed = started.elapsed();
        self.report.record_phase(phase, elapsed);
        if let Some(metrics) = &self.metrics {
            metrics.observe_phase(phase, elapsed);
        }
        let ctx = LogContext::new().with_phase(phase);
        match &result {
            Ok(_) => log_phase_event(
                Some(&ctx),
                phase,
                elapsed,
                "phase complete",
                PhaseOutcome::Success,
            ),
            Err(err) => log_phase_event(
                Some(&ctx),
                phase,
                elapsed,
                &format!("phase aborted ({}): {err}", err.kind()),
                PhaseOutcome::Fault,
            ),
        }
        result
    }
}
