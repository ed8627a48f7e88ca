//! ---
//! psoak_section: "07-controller-client"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "reqwest-backed implementation of the placement controller API."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use async_trait::async_trait;
use psoak_api::{
    CreateResourceRequest, CreateSubResourceRequest, HarnessError, HarnessResult, MigrateRequest,
    NodeDescription, NodeId, PlacementController, PlacementEntry, RemoteOperationError,
    ResourceId, ShardId, SubResourceId,
};
use psoak_common::ControllerConfig;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

/// Error body shape the controller uses for rejected requests.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    msg: String,
}

/// Placement controller reached over its HTTP API.
#[derive(Debug, Clone)]
pub struct HttpController {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpController {
    /// Build a client from the controller section of the harness config.
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let base_url = directory_url(&config.base_url)
            .with_context(|| format!("controller base_url '{}' is not a URL", config.base_url))?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build controller http client")?;
        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(
        &self,
        operation: &str,
        method: Method,
        path: &str,
    ) -> HarnessResult<RequestBuilder> {
        let url = self.base_url.join(path.trim_start_matches('/')).map_err(|err| {
            HarnessError::InvalidScenario(format!("{operation}: bad request path {path}: {err}"))
        })?;
        trace!(operation, %method, %url, "controller request");
        let builder = self.client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    /// Send the request and turn transport failures and non-2xx answers into remote errors.
    async fn send(&self, operation: &str, request: RequestBuilder) -> HarnessResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|err| RemoteOperationError::new(operation, err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = error_message(response).await;
        debug!(operation, status = status.as_u16(), %message, "controller rejected request");
        Err(RemoteOperationError::new(operation, message)
            .with_status(status.as_u16())
            .into())
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str, path: &str) -> HarnessResult<T> {
        let request = self.request(operation, Method::GET, path)?;
        let response = self.send(operation, request).await?;
        decode(operation, response).await
    }

    async fn call<B: Serialize>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> HarnessResult<Response> {
        let mut request = self.request(operation, method, path)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(operation, request).await
    }
}

/// Parse `raw` so relative joins keep any path prefix (`http://host/ctl` -> `http://host/ctl/`).
pub(crate) fn directory_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn error_message(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.msg,
        Err(_) => text,
    }
}

async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> HarnessResult<T> {
    let body = response
        .bytes()
        .await
        .map_err(|err| RemoteOperationError::new(operation, err.to_string()))?;
    serde_json::from_slice(&body).map_err(|err| HarnessError::MalformedResponse {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}

#[async_trait]
impl PlacementController for HttpController {
    async fn list_placements(&self) -> HarnessResult<Vec<PlacementEntry>> {
        self.get("list_placements", "/debug/v1/tenant").await
    }

    async fn list_nodes(&self) -> HarnessResult<Vec<NodeDescription>> {
        self.get("list_nodes", "/control/v1/node").await
    }

    async fn create_resource(&self, request: CreateResourceRequest) -> HarnessResult<()> {
        self.call("create_resource", Method::POST, "/v1/tenant", Some(&request))
            .await
            .map(drop)
    }

    async fn migrate_shard(&self, shard: ShardId, destination: NodeId) -> HarnessResult<()> {
        let path = format!("/control/v1/tenant/{shard}/migrate");
        let body = MigrateRequest {
            tenant_shard_id: shard,
            node_id: destination,
        };
        self.call("migrate_shard", Method::PUT, &path, Some(&body))
            .await
            .map(drop)
    }

    async fn drain_node(&self, node: NodeId) -> HarnessResult<()> {
        let path = format!("/control/v1/node/{node}/drain");
        self.call::<()>("drain_node", Method::PUT, &path, None)
            .await
            .map(drop)
    }

    async fn fill_node(&self, node: NodeId) -> HarnessResult<()> {
        let path = format!("/control/v1/node/{node}/fill");
        self.call::<()>("fill_node", Method::PUT, &path, None)
            .await
            .map(drop)
    }

    async fn node_status(&self, node: NodeId) -> HarnessResult<NodeDescription> {
        self.get("node_status", &format!("/control/v1/node/{node}"))
            .await
    }

    async fn reconcile_all(&self) -> HarnessResult<usize> {
        const OP: &str = "reconcile_all";
        let response = self
            .call::<()>(OP, Method::POST, "/debug/v1/reconcile_all", None)
            .await?;
        decode(OP, response).await
    }

    async fn consistency_check(&self) -> HarnessResult<()> {
        const OP: &str = "consistency_check";
        let request = self.request(OP, Method::POST, "/debug/v1/consistency_check")?;
        match self.send(OP, request).await {
            Ok(_) => Ok(()),
            Err(HarnessError::RemoteOperation(RemoteOperationError {
                status: Some(status),
                message,
                ..
            })) => Err(HarnessError::consistency(format!(
                "controller self check failed (status {status}): {message}"
            ))),
            Err(err) => Err(err),
        }
    }

    async fn metric(&self, name: &str) -> HarnessResult<Option<f64>> {
        const OP: &str = "metric";
        let request = self.request(OP, Method::GET, "/metrics")?;
        let exposition = self
            .send(OP, request)
            .await?
            .text()
            .await
            .map_err(|err| RemoteOperationError::new(OP, err.to_string()))?;
        Ok(psoak_metrics::parse_sample(&exposition, name))
    }

    async fn create_sub_resource(
        &self,
        resource: ResourceId,
        sub_resource: SubResourceId,
    ) -> HarnessResult<()> {
        let path = format!("/v1/tenant/{resource}/timeline");
        let body = CreateSubResourceRequest {
            new_timeline_id: sub_resource,
        };
        self.call("create_sub_resource", Method::POST, &path, Some(&body))
            .await
            .map(drop)
    }

    async fn resource_status(&self, resource: ResourceId) -> HarnessResult<Value> {
        self.get("resource_status", &format!("/v1/tenant/{resource}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparsable_base_url() {
        let config = ControllerConfig {
            base_url: "not a url".into(),
            ..ControllerConfig::default()
        };
        assert!(HttpController::new(&config).is_err());
    }

    #[test]
    fn joins_paths_onto_base_url() {
        let config = ControllerConfig {
            base_url: "http://127.0.0.1:1234".into(),
            ..ControllerConfig::default()
        };
        let controller = HttpController::new(&config).unwrap();
        let request = controller
            .request("list_nodes", Method::GET, "/control/v1/node")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "http://127.0.0.1:1234/control/v1/node");
        assert!(request.headers().get("authorization").is_none());
    }

    #[test]
    fn keeps_base_url_path_prefix() {
        for base_url in ["http://127.0.0.1:1234/ctl", "http://127.0.0.1:1234/ctl/"] {
            let config = ControllerConfig {
                base_url: base_url.into(),
                ..ControllerConfig::default()
            };
            let controller = HttpController::new(&config).unwrap();
            let request = controller
                .request("drain_node", Method::PUT, "/control/v1/node/3/drain")
                .unwrap()
                .build()
                .unwrap();
            assert_eq!(
                request.url().as_str(),
                "http://127.0.0.1:1234/ctl/control/v1/node/3/drain"
            );
        }
    }

    #[test]
    fn attaches_bearer_token_when_configured() {
        let config = ControllerConfig {
            base_url: "http://127.0.0.1:1234".into(),
            token: Some("secret".into()),
            ..ControllerConfig::default()
        };
        let controller = HttpController::new(&config).unwrap();
        let request = controller
            .request("drain_node", Method::PUT, "/control/v1/node/3/drain")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer secret"
        );
    }
}
