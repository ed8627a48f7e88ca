//! ---
//! psoak_section: "08-simulation"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Simulated controller implementing the harness boundary traits."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use psoak_api::{
    ClusterLifecycle, CreateResourceRequest, HarnessError, HarnessResult, NodeDescription, NodeId,
    PlacementController, PlacementEntry, PlacementPolicy, ResourceId, ShardId, SubResourceId,
    RESIDENT_MEMORY_METRIC,
};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::{FaultPlan, SimulationConfig};
use crate::state::{rejected, ClusterState};

/// In-memory placement controller with injectable faults.
///
/// Placement is least-loaded, convergence is instant and every call is
/// answered from a single mutex-guarded state. While stopped, every
/// controller call fails with a transient remote error.
#[derive(Debug)]
pub struct SimulatedController {
    config: SimulationConfig,
    state: Mutex<ClusterState>,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl SimulatedController {
    pub fn new(config: SimulationConfig) -> Self {
        let mut state = ClusterState::new(config.nodes, config.transition_polls);
        if config.seed_unsharded_resource {
            let resource = ResourceId::generate();
            let shards = vec![ShardId::unsharded(resource.clone())];
            if let Err(err) = state.create_resource(resource, shards, 1) {
                debug!(error = %err, "unable to seed unsharded resource");
            }
            state.pending_reconciles = 0;
        }
        info!(nodes = config.nodes, seeded = state.shard_count(), "simulated controller ready");
        Self {
            config,
            state: Mutex::new(state),
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Replace the active fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        self.state.lock().faults = faults;
    }

    pub fn faults(&self) -> FaultPlan {
        self.state.lock().faults.clone()
    }

    /// How many times `operation` was invoked, including rejected calls.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn shard_count(&self) -> usize {
        self.state.lock().shard_count()
    }

    /// Attached shards currently held by `node`.
    pub fn node_load(&self, node: NodeId) -> usize {
        self.state.lock().load(node)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn resident_memory(&self, shards: usize) -> f64 {
        self.config.base_memory_bytes + self.config.memory_per_shard_bytes * shards as f64
    }

    /// Count the call, apply latency, and reject when stopped.
    async fn enter(&self, operation: &'static str) -> HarnessResult<()> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
        if !self.config.call_latency.is_zero() {
            sleep(self.config.call_latency).await;
        }
        if !self.state.lock().running {
            return Err(rejected(operation, 503, "controller is stopped"));
        }
        Ok(())
    }
}

fn take_fault(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl PlacementController for SimulatedController {
    async fn list_placements(&self) -> HarnessResult<Vec<PlacementEntry>> {
        self.enter("list_placements").await?;
        Ok(self.state.lock().placements())
    }

    async fn list_nodes(&self) -> HarnessResult<Vec<NodeDescription>> {
        self.enter("list_nodes").await?;
        Ok(self.state.lock().describe_nodes())
    }

    async fn create_resource(&self, request: CreateResourceRequest) -> HarnessResult<()> {
        const OP: &str = "create_resource";
        self.enter(OP).await?;
        let mut state = self.state.lock();
        if take_fault(&mut state.faults.create_failures) {
            return Err(rejected(OP, 503, "injected create failure"));
        }
        let secondaries = match request.placement_policy {
            PlacementPolicy::Attached(n) => n,
            PlacementPolicy::Secondary | PlacementPolicy::Detached => 0,
        };
        let shards = request.shard_ids();
        state.create_resource(request.resource_id, shards, secondaries)
    }

    async fn migrate_shard(&self, shard: ShardId, destination: NodeId) -> HarnessResult<()> {
        self.enter("migrate_shard").await?;
        self.state.lock().migrate(&shard, destination)
    }

    async fn drain_node(&self, node: NodeId) -> HarnessResult<()> {
        const OP: &str = "drain_node";
        self.enter(OP).await?;
        let mut state = self.state.lock();
        if take_fault(&mut state.faults.drain_failures) {
            return Err(rejected(OP, 503, "injected drain failure"));
        }
        let moved = state.drain(node)?;
        debug!(%node, moved, "drained node");
        Ok(())
    }

    async fn fill_node(&self, node: NodeId) -> HarnessResult<()> {
        const OP: &str = "fill_node";
        self.enter(OP).await?;
        let mut state = self.state.lock();
        if take_fault(&mut state.faults.fill_failures) {
            return Err(rejected(OP, 503, "injected fill failure"));
        }
        let moved = state.fill(node)?;
        debug!(%node, moved, "filled node");
        Ok(())
    }

    async fn node_status(&self, node: NodeId) -> HarnessResult<NodeDescription> {
        const OP: &str = "node_status";
        self.enter(OP).await?;
        let mut state = self.state.lock();
        if take_fault(&mut state.faults.status_failures) {
            return Err(rejected(OP, 503, "injected status failure"));
        }
        state.poll_status(node)
    }

    async fn reconcile_all(&self) -> HarnessResult<usize> {
        self.enter("reconcile_all").await?;
        let mut state = self.state.lock();
        let spawned = std::mem::take(&mut state.pending_reconciles);
        if spawned == 0 {
            state.pending_reconciles = std::mem::take(&mut state.faults.reconciles_after_idle);
        }
        Ok(spawned)
    }

    async fn consistency_check(&self) -> HarnessResult<()> {
        self.enter("consistency_check").await?;
        if self.state.lock().faults.inconsistent {
            return Err(HarnessError::consistency(
                "in-memory shard state differs from persisted state",
            ));
        }
        Ok(())
    }

    async fn metric(&self, name: &str) -> HarnessResult<Option<f64>> {
        self.enter("metric").await?;
        if name != RESIDENT_MEMORY_METRIC || !self.config.report_memory {
            return Ok(None);
        }
        let shards = self.state.lock().shard_count();
        Ok(Some(self.resident_memory(shards)))
    }

    async fn create_sub_resource(
        &self,
        resource: ResourceId,
        sub_resource: SubResourceId,
    ) -> HarnessResult<()> {
        self.enter("create_sub_resource").await?;
        self.state.lock().add_sub_resource(&resource, sub_resource)
    }

    async fn resource_status(&self, resource: ResourceId) -> HarnessResult<Value> {
        self.enter("resource_status").await?;
        self.state.lock().resource_status(&resource)
    }
}

#[async_trait]
impl ClusterLifecycle for SimulatedController {
    async fn stop_controller(&self) -> HarnessResult<()> {
        self.state.lock().running = false;
        info!("simulated controller stopped");
        Ok(())
    }

    async fn start_controller(&self) -> HarnessResult<()> {
        let mut state = self.state.lock();
        state.running = true;
        let leftover = state.faults.reconciles_after_restart;
        state.pending_reconciles += leftover;
        info!("simulated controller started");
        Ok(())
    }

    async fn wait_until_ready(&self) -> HarnessResult<Duration> {
        let started = Instant::now();
        if !self.state.lock().running {
            return Err(HarnessError::Lifecycle {
                action: "wait_until_ready".to_owned(),
                message: "controller is not running".to_owned(),
            });
        }
        sleep(self.config.readiness_delay).await;
        Ok(started.elapsed())
    }

    async fn restart_node(&self, node: NodeId) -> HarnessResult<()> {
        self.state.lock().restart(node).map_err(|err| HarnessError::Lifecycle {
            action: format!("restart node {node}"),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_controller_rejects_calls() {
        let sim = SimulatedController::new(SimulationConfig::default());
        sim.stop_controller().await.unwrap();
        let err = sim.list_nodes().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(sim.wait_until_ready().await.is_err());

        sim.start_controller().await.unwrap();
        assert_eq!(sim.list_nodes().await.unwrap().len(), 5);
        assert_eq!(sim.call_count("list_nodes"), 2);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_per_call() {
        let sim = SimulatedController::new(SimulationConfig::default());
        sim.set_faults(FaultPlan {
            drain_failures: 1,
            ..FaultPlan::default()
        });
        assert!(sim.drain_node(NodeId(1)).await.unwrap_err().is_retryable());
        sim.drain_node(NodeId(1)).await.unwrap();
        assert_eq!(sim.faults().drain_failures, 0);
        assert_eq!(sim.node_load(NodeId(1)), 0);
    }

    #[tokio::test]
    async fn reconciles_after_idle_surface_on_the_next_call() {
        let sim = SimulatedController::new(SimulationConfig::default());
        sim.set_faults(FaultPlan {
            reconciles_after_idle: 4,
            ..FaultPlan::default()
        });
        assert_eq!(sim.reconcile_all().await.unwrap(), 0);
        assert_eq!(sim.reconcile_all().await.unwrap(), 4);
        assert_eq!(sim.reconcile_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_scales_with_shards() {
        let sim = SimulatedController::new(SimulationConfig::default());
        let before = sim.metric(RESIDENT_MEMORY_METRIC).await.unwrap().unwrap();
        sim.create_resource(CreateResourceRequest {
            resource_id: ResourceId::generate(),
            shard_parameters: psoak_api::ShardParameters {
                count: 4,
                stripe_size: 1024,
            },
            placement_policy: PlacementPolicy::Attached(1),
            config: Default::default(),
        })
        .await
        .unwrap();
        let after = sim.metric(RESIDENT_MEMORY_METRIC).await.unwrap().unwrap();
        assert_eq!(after - before, 4.0 * sim.config().memory_per_shard_bytes);
        assert_eq!(sim.metric("unknown_metric").await.unwrap(), None);
    }
}
