//! ---
//! psoak_section: "05-verification"
//! psoak_subsection: "tests"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Convergence and drain checks over full-scale listings."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use psoak_api::{
    CreateResourceRequest, HarnessError, HarnessResult, IntentState, LocationMode,
    NodeDescription, NodeId, ObservedLocation, ObservedState, PlacementController,
    PlacementEntry, ResourceId, ShardId, SubResourceId,
};
use psoak_verify::{BalanceExpectation, ConsistencyChecker, SnapshotCollector};
use serde_json::Value;

const NODES: u64 = 5;

/// Listing-only controller serving a fixed set of entries.
struct FixedListing {
    entries: Vec<PlacementEntry>,
}

#[async_trait]
impl PlacementController for FixedListing {
    async fn list_placements(&self) -> HarnessResult<Vec<PlacementEntry>> {
        Ok(self.entries.clone())
    }

    async fn list_nodes(&self) -> HarnessResult<Vec<NodeDescription>> {
        Err(HarnessError::remote("list_nodes", "not served"))
    }

    async fn create_resource(&self, _request: CreateResourceRequest) -> HarnessResult<()> {
        Err(HarnessError::remote("create_resource", "not served"))
    }

    async fn migrate_shard(&self, _shard: ShardId, _destination: NodeId) -> HarnessResult<()> {
        Err(HarnessError::remote("migrate_shard", "not served"))
    }

    async fn drain_node(&self, _node: NodeId) -> HarnessResult<()> {
        Err(HarnessError::remote("drain_node", "not served"))
    }

    async fn fill_node(&self, _node: NodeId) -> HarnessResult<()> {
        Err(HarnessError::remote("fill_node", "not served"))
    }

    async fn node_status(&self, _node: NodeId) -> HarnessResult<NodeDescription> {
        Err(HarnessError::remote("node_status", "not served"))
    }

    async fn reconcile_all(&self) -> HarnessResult<usize> {
        Ok(0)
    }

    async fn consistency_check(&self) -> HarnessResult<()> {
        Ok(())
    }

    async fn metric(&self, _name: &str) -> HarnessResult<Option<f64>> {
        Ok(None)
    }

    async fn create_sub_resource(
        &self,
        _resource: ResourceId,
        _sub_resource: SubResourceId,
    ) -> HarnessResult<()> {
        Err(HarnessError::remote("create_sub_resource", "not served"))
    }

    async fn resource_status(&self, _resource: ResourceId) -> HarnessResult<Value> {
        Ok(Value::Null)
    }
}

fn converged_entry(shard: ShardId, attached: NodeId, secondary: NodeId) -> PlacementEntry {
    let mut observed = ObservedState::default();
    observed.locations.insert(
        attached,
        Some(ObservedLocation::with_mode(LocationMode::AttachedSingle)),
    );
    observed.locations.insert(
        secondary,
        Some(ObservedLocation::with_mode(LocationMode::Secondary)),
    );
    PlacementEntry {
        shard_id: shard,
        intent: IntentState {
            attached: Some(attached),
            secondary: Some(vec![secondary]),
        },
        observed,
    }
}

/// 4000 two-shard resources plus one unsharded resource, spread round-robin
/// over the nodes, skipping `excluded` when set.
fn scale_listing(excluded: Option<NodeId>) -> Vec<PlacementEntry> {
    let nodes: Vec<NodeId> = (1..=NODES)
        .map(NodeId)
        .filter(|node| Some(*node) != excluded)
        .collect();
    let mut shards: Vec<ShardId> = (0..4000)
        .flat_map(|_| ShardId::all_for(&ResourceId::generate(), 2))
        .collect();
    shards.push(ShardId::unsharded(ResourceId::generate()));

    shards
        .into_iter()
        .enumerate()
        .map(|(i, shard)| {
            let attached = nodes[i % nodes.len()];
            let secondary = nodes[(i + 1) % nodes.len()];
            converged_entry(shard, attached, secondary)
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_scale_listing_converges_and_balances() {
    let collector = SnapshotCollector::new(Arc::new(FixedListing {
        entries: scale_listing(None),
    }));
    let checker = ConsistencyChecker::default();

    let table = checker
        .check_consistent_balanced(&collector, 8001)
        .await
        .unwrap();
    assert_eq!(table.total(), 8001);
    checker
        .expect_balanced(
            &table,
            8001,
            &BalanceExpectation::all_loaded((1..=NODES).map(NodeId)),
        )
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drained_node_holds_nothing_and_total_is_kept() {
    let drained = NodeId(3);
    let collector = SnapshotCollector::new(Arc::new(FixedListing {
        entries: scale_listing(Some(drained)),
    }));
    let checker = ConsistencyChecker::default();

    let snapshot = collector.collect().await.unwrap();
    let table = checker.expect_converged(&snapshot, 8001).unwrap();
    assert_eq!(table.count(drained), 0);
    assert_eq!(table.total(), 8001);
    checker.expect_drained(&table, drained, 8001).unwrap();
}

#[tokio::test]
async fn unconverged_shards_are_named() {
    let mut entries = scale_listing(None);
    entries[0].intent.attached = Some(NodeId(99));
    let shard = entries[0].shard_id.clone();
    let collector = SnapshotCollector::new(Arc::new(FixedListing { entries }));

    let snapshot = collector.collect().await.unwrap();
    let err = ConsistencyChecker::default()
        .expect_converged(&snapshot, 8001)
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("8000 shards converged, expected 8001"));
    assert!(message.contains(&shard.to_string()));
}

#[tokio::test]
async fn double_attachment_is_rejected_by_default() {
    let mut entries = scale_listing(None);
    let extra = if entries[0].intent.attached == Some(NodeId(1)) {
        NodeId(2)
    } else {
        NodeId(1)
    };
    entries[0].observed.locations.insert(
        extra,
        Some(ObservedLocation::with_mode(LocationMode::AttachedStale)),
    );
    let collector = SnapshotCollector::new(Arc::new(FixedListing { entries }));
    let snapshot = collector.collect().await.unwrap();

    let err = ConsistencyChecker::default()
        .expect_converged(&snapshot, 8001)
        .unwrap_err();
    assert!(err.to_string().contains("more than one attached node"));
}
