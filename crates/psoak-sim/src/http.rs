//! ---
//! psoak_section: "08-simulation"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "HTTP facade serving the simulated controller's endpoints."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use psoak_api::{
    CreateResourceRequest, CreateSubResourceRequest, HarnessError, HarnessResult, MigrateRequest,
    NodeId, PlacementController, ResourceId, ShardId, RESIDENT_MEMORY_METRIC,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::SimulatedController;

type SimState = State<Arc<SimulatedController>>;

/// Serves a [`SimulatedController`] over the controller's HTTP endpoints.
pub struct SimulatorServer {
    controller: Arc<SimulatedController>,
    listen: SocketAddr,
}

impl SimulatorServer {
    pub fn new(controller: Arc<SimulatedController>, listen: SocketAddr) -> Self {
        Self { controller, listen }
    }

    /// Bind the listener and serve in a background task.
    pub async fn spawn(self) -> anyhow::Result<SimulatorHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "simulated controller listening");

        let router = router(self.controller);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "simulator server exited with error");
            }
        });

        Ok(SimulatorHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Running server returned by [`SimulatorServer::spawn`].
pub struct SimulatorHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl SimulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Base URL a controller client should be pointed at.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

fn router(controller: Arc<SimulatedController>) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/debug/v1/tenant", get(list_placements))
        .route("/debug/v1/reconcile_all", post(reconcile_all))
        .route("/debug/v1/consistency_check", post(consistency_check))
        .route("/control/v1/node", get(list_nodes))
        .route("/control/v1/node/:node_id", get(node_status))
        .route("/control/v1/node/:node_id/drain", put(drain_node))
        .route("/control/v1/node/:node_id/fill", put(fill_node))
        .route("/control/v1/tenant/:shard_id/migrate", put(migrate_shard))
        .route("/v1/tenant", post(create_resource))
        .route("/v1/tenant/:tenant_id", get(resource_status))
        .route("/v1/tenant/:tenant_id/timeline", post(create_sub_resource))
        .with_state(controller)
}

fn respond<T: Serialize>(status: StatusCode, result: HarnessResult<T>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: HarnessError) -> Response {
    debug!(error = %err, "simulated request failed");
    let (status, message) = match err {
        HarnessError::RemoteOperation(remote) => (
            remote
                .status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
            remote.message,
        ),
        HarnessError::InvalidScenario(message) => (StatusCode::BAD_REQUEST, message),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    };
    (status, Json(serde_json::json!({ "msg": message }))).into_response()
}

async fn ready(State(sim): SimState) -> StatusCode {
    if sim.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(sim): SimState) -> Response {
    match sim.metric(RESIDENT_MEMORY_METRIC).await {
        Ok(Some(value)) => (
            StatusCode::OK,
            format!("# TYPE {RESIDENT_MEMORY_METRIC} gauge\n{RESIDENT_MEMORY_METRIC} {value}\n"),
        )
            .into_response(),
        Ok(None) => (StatusCode::OK, String::new()).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_placements(State(sim): SimState) -> Response {
    respond(StatusCode::OK, sim.list_placements().await)
}

async fn reconcile_all(State(sim): SimState) -> Response {
    respond(StatusCode::OK, sim.reconcile_all().await)
}

async fn consistency_check(State(sim): SimState) -> Response {
    respond(StatusCode::OK, sim.consistency_check().await)
}

async fn list_nodes(State(sim): SimState) -> Response {
    respond(StatusCode::OK, sim.list_nodes().await)
}

async fn node_status(State(sim): SimState, Path(node): Path<NodeId>) -> Response {
    respond(StatusCode::OK, sim.node_status(node).await)
}

async fn drain_node(State(sim): SimState, Path(node): Path<NodeId>) -> Response {
    respond(StatusCode::OK, sim.drain_node(node).await)
}

async fn fill_node(State(sim): SimState, Path(node): Path<NodeId>) -> Response {
    respond(StatusCode::OK, sim.fill_node(node).await)
}

async fn migrate_shard(
    State(sim): SimState,
    Path(shard): Path<ShardId>,
    Json(request): Json<MigrateRequest>,
) -> Response {
    if request.tenant_shard_id != shard {
        return error_response(HarnessError::InvalidScenario(format!(
            "body names shard {} but path names {shard}",
            request.tenant_shard_id
        )));
    }
    respond(StatusCode::OK, sim.migrate_shard(shard, request.node_id).await)
}

async fn create_resource(
    State(sim): SimState,
    Json(request): Json<CreateResourceRequest>,
) -> Response {
    let shards = request.shard_ids();
    let result = sim.create_resource(request).await.map(|()| {
        serde_json::json!({
            "shards": shards.iter().map(ToString::to_string).collect::<Vec<_>>()
        })
    });
    respond(StatusCode::CREATED, result)
}

async fn resource_status(State(sim): SimState, Path(resource): Path<ResourceId>) -> Response {
    respond(StatusCode::OK, sim.resource_status(resource).await)
}

async fn create_sub_resource(
    State(sim): SimState,
    Path(resource): Path<ResourceId>,
    Json(request): Json<CreateSubResourceRequest>,
) -> Response {
    respond(
        StatusCode::CREATED,
        sim.create_sub_resource(resource, request.new_timeline_id)
            .await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FaultPlan, SimulationConfig};
    use psoak_api::{ClusterLifecycle, NodeDescription};

    async fn spawn(sim: &Arc<SimulatedController>) -> SimulatorHandle {
        SimulatorServer::new(sim.clone(), "127.0.0.1:0".parse().unwrap())
            .spawn()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn serves_node_listing_and_readiness() {
        let sim = Arc::new(SimulatedController::new(SimulationConfig::default()));
        let handle = spawn(&sim).await;
        let client = reqwest::Client::new();

        let nodes: Vec<NodeDescription> = client
            .get(format!("{}/control/v1/node", handle.base_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(nodes.len(), 5);

        let ready = client
            .get(format!("{}/ready", handle.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);

        sim.stop_controller().await.unwrap();
        let ready = client
            .get(format!("{}/ready", handle.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_keep_their_status() {
        let sim = Arc::new(SimulatedController::new(SimulationConfig::default()));
        sim.set_faults(FaultPlan {
            drain_failures: 1,
            ..FaultPlan::default()
        });
        let handle = spawn(&sim).await;
        let client = reqwest::Client::new();

        let response = client
            .put(format!("{}/control/v1/node/2/drain", handle.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["msg"], "injected drain failure");

        handle.shutdown().await.unwrap();
    }
}
