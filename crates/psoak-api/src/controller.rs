//! ---
//! psoak_section: "02-controller-api"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Traits describing the controller surface the harness drives."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HarnessResult;
use crate::ids::{NodeId, ResourceId, ShardId, SubResourceId};
use crate::node::NodeDescription;
use crate::placement::{CreateResourceRequest, PlacementEntry};

/// Query/command API of the placement controller under test.
///
/// Implementations report transient failures (rejected or dropped calls) as
/// `HarnessError::RemoteOperation` so that retry loops can absorb them.
#[async_trait]
pub trait PlacementController: Send + Sync {
    /// Full shard listing with intent and observed state.
    async fn list_placements(&self) -> HarnessResult<Vec<PlacementEntry>>;

    /// Every node registered with the controller.
    async fn list_nodes(&self) -> HarnessResult<Vec<NodeDescription>>;

    async fn create_resource(&self, request: CreateResourceRequest) -> HarnessResult<()>;

    async fn migrate_shard(&self, shard: ShardId, destination: NodeId) -> HarnessResult<()>;

    async fn drain_node(&self, node: NodeId) -> HarnessResult<()>;

    async fn fill_node(&self, node: NodeId) -> HarnessResult<()>;

    async fn node_status(&self, node: NodeId) -> HarnessResult<NodeDescription>;

    /// Kick reconciliation for every shard; returns how many reconciles were spawned.
    async fn reconcile_all(&self) -> HarnessResult<usize>;

    /// Controller-side self check. Fails with `ConsistencyViolation`.
    async fn consistency_check(&self) -> HarnessResult<()>;

    /// Current value of a named process metric, if the controller reports it.
    async fn metric(&self, name: &str) -> HarnessResult<Option<f64>>;

    /// Fan-out write creating a sub-resource on every shard of `resource`.
    async fn create_sub_resource(
        &self,
        resource: ResourceId,
        sub_resource: SubResourceId,
    ) -> HarnessResult<()>;

    /// Passthrough read served by shard zero of `resource`.
    async fn resource_status(&self, resource: ResourceId) -> HarnessResult<Value>;
}

/// Process lifecycle of the controller and its storage nodes.
///
/// Provisioning lives outside the harness; this is the narrow surface the
/// lifecycle phases need.
#[async_trait]
pub trait ClusterLifecycle: Send + Sync {
    async fn stop_controller(&self) -> HarnessResult<()>;

    async fn start_controller(&self) -> HarnessResult<()>;

    /// Block until the controller passes its readiness check and return how long that took.
    async fn wait_until_ready(&self) -> HarnessResult<Duration>;

    async fn restart_node(&self, node: NodeId) -> HarnessResult<()>;
}
