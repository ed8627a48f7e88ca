//! ---
//! psoak_section: "08-simulation"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Placement state of the simulated cluster."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};

use psoak_api::{
    HarnessError, HarnessResult, IntentState, LocationMode, NodeDescription, NodeId,
    NodeSchedulingPolicy, ObservedLocation, ObservedState, PlacementEntry, RemoteOperationError,
    ResourceId, ShardId, SubResourceId,
};
use serde_json::{json, Value};

use crate::config::FaultPlan;

pub(crate) fn rejected(operation: &str, status: u16, message: impl Into<String>) -> HarnessError {
    RemoteOperationError::new(operation, message)
        .with_status(status)
        .into()
}

#[derive(Debug, Clone)]
struct NodeState {
    policy: NodeSchedulingPolicy,
    /// Polls left before `policy` settles into `settles_to`.
    polls_left: usize,
    settles_to: Option<NodeSchedulingPolicy>,
    shards: BTreeSet<ShardId>,
}

impl NodeState {
    fn active() -> Self {
        Self {
            policy: NodeSchedulingPolicy::Active,
            polls_left: 0,
            settles_to: None,
            shards: BTreeSet::new(),
        }
    }

    fn schedulable(&self) -> bool {
        matches!(
            self.policy,
            NodeSchedulingPolicy::Active | NodeSchedulingPolicy::Filling
        )
    }

    fn transition(
        &mut self,
        policy: NodeSchedulingPolicy,
        settles_to: NodeSchedulingPolicy,
        polls: usize,
    ) {
        if polls == 0 {
            self.policy = settles_to;
            self.settles_to = None;
        } else {
            self.policy = policy;
            self.settles_to = Some(settles_to);
        }
        self.polls_left = polls;
    }
}

#[derive(Debug, Clone)]
struct ShardState {
    attached: NodeId,
    secondaries: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct ResourceState {
    shards: Vec<ShardId>,
    sub_resources: Vec<SubResourceId>,
}

/// In-memory cluster: nodes, shards, and pending reconcile work.
#[derive(Debug)]
pub(crate) struct ClusterState {
    pub(crate) running: bool,
    pub(crate) faults: FaultPlan,
    pub(crate) pending_reconciles: usize,
    transition_polls: usize,
    nodes: BTreeMap<NodeId, NodeState>,
    shards: BTreeMap<ShardId, ShardState>,
    resources: BTreeMap<ResourceId, ResourceState>,
}

impl ClusterState {
    pub(crate) fn new(nodes: u64, transition_polls: usize) -> Self {
        Self {
            running: true,
            faults: FaultPlan::default(),
            pending_reconciles: 0,
            transition_polls,
            nodes: (1..=nodes).map(|id| (NodeId(id), NodeState::active())).collect(),
            shards: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn load(&self, node: NodeId) -> usize {
        self.nodes.get(&node).map(|n| n.shards.len()).unwrap_or(0)
    }

    fn node_mut(&mut self, operation: &str, node: NodeId) -> HarnessResult<&mut NodeState> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| rejected(operation, 404, format!("node {node} not found")))
    }

    /// Least-loaded schedulable node outside `exclude`.
    fn least_loaded(&self, exclude: &[NodeId]) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|(id, node)| node.schedulable() && !exclude.contains(*id))
            .min_by_key(|(id, node)| (node.shards.len(), **id))
            .map(|(id, _)| *id)
    }

    fn attach(&mut self, shard: &ShardId, to: NodeId) {
        let Some(state) = self.shards.get_mut(shard) else {
            return;
        };
        let from = state.attached;
        if from == to {
            return;
        }
        state.attached = to;
        if let Some(position) = state.secondaries.iter().position(|n| *n == to) {
            state.secondaries[position] = from;
        }
        if let Some(node) = self.nodes.get_mut(&from) {
            node.shards.remove(shard);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.shards.insert(shard.clone());
        }
        self.pending_reconciles += 1;
    }

    pub(crate) fn create_resource(
        &mut self,
        resource: ResourceId,
        shards: Vec<ShardId>,
        secondaries: usize,
    ) -> HarnessResult<()> {
        const OP: &str = "create_resource";
        if self.resources.contains_key(&resource) {
            return Err(rejected(OP, 409, format!("resource {resource} already exists")));
        }
        for shard in &shards {
            let attached = self
                .least_loaded(&[])
                .ok_or_else(|| rejected(OP, 503, "no schedulable nodes"))?;
            let mut placed = vec![attached];
            for _ in 0..secondaries {
                match self.least_loaded(&placed) {
                    Some(node) => placed.push(node),
                    None => break,
                }
            }
            self.shards.insert(
                shard.clone(),
                ShardState {
                    attached,
                    secondaries: placed[1..].to_vec(),
                },
            );
            if let Some(node) = self.nodes.get_mut(&attached) {
                node.shards.insert(shard.clone());
            }
        }
        self.pending_reconciles += shards.len();
        self.resources.insert(
            resource,
            ResourceState {
                shards,
                sub_resources: Vec::new(),
            },
        );
        Ok(())
    }

    pub(crate) fn migrate(&mut self, shard: &ShardId, destination: NodeId) -> HarnessResult<()> {
        const OP: &str = "migrate_shard";
        if !self.shards.contains_key(shard) {
            return Err(rejected(OP, 404, format!("shard {shard} not found")));
        }
        if !self.nodes.contains_key(&destination) {
            return Err(rejected(OP, 404, format!("node {destination} not found")));
        }
        self.attach(shard, destination);
        Ok(())
    }

    /// Drain every attachment off `node`. Rejected requests leave the cluster untouched.
    pub(crate) fn drain(&mut self, node: NodeId) -> HarnessResult<usize> {
        const OP: &str = "drain_node";
        let polls = self.transition_polls;
        let settles_to = if self.faults.stuck_draining {
            NodeSchedulingPolicy::Draining
        } else {
            NodeSchedulingPolicy::PauseForRestart
        };
        let moving: Vec<ShardId> = {
            let state = self.node_mut(OP, node)?;
            if state.policy != NodeSchedulingPolicy::Active {
                return Err(rejected(OP, 409, format!("node {node} is {}", state.policy)));
            }
            state.shards.iter().cloned().collect()
        };
        if !moving.is_empty() && self.least_loaded(&[node]).is_none() {
            return Err(rejected(OP, 409, "no other schedulable node"));
        }

        self.node_mut(OP, node)?
            .transition(NodeSchedulingPolicy::Draining, settles_to, polls);
        for shard in &moving {
            if let Some(destination) = self.least_loaded(&[node]) {
                self.attach(shard, destination);
            }
        }
        Ok(moving.len())
    }

    pub(crate) fn restart(&mut self, node: NodeId) -> HarnessResult<()> {
        let state = self.node_mut("restart_node", node)?;
        if state.policy == NodeSchedulingPolicy::PauseForRestart || state.settles_to.is_none() {
            state.policy = NodeSchedulingPolicy::Active;
            state.settles_to = None;
            state.polls_left = 0;
        }
        Ok(())
    }

    pub(crate) fn fill(&mut self, node: NodeId) -> HarnessResult<usize> {
        const OP: &str = "fill_node";
        let polls = self.transition_polls;
        let state = self.node_mut(OP, node)?;
        if state.policy != NodeSchedulingPolicy::Active {
            return Err(rejected(OP, 409, format!("node {node} is {}", state.policy)));
        }
        state.transition(
            NodeSchedulingPolicy::Filling,
            NodeSchedulingPolicy::Active,
            polls,
        );
        Ok(self.rebalance(node))
    }

    /// Move attachments from the busiest schedulable node to the idlest until
    /// their counts differ by at most one. `preferred` wins ties for the idlest.
    fn rebalance(&mut self, preferred: NodeId) -> usize {
        let mut moved = 0;
        loop {
            let schedulable: Vec<(NodeId, usize)> = self
                .nodes
                .iter()
                .filter(|(_, n)| n.schedulable())
                .map(|(id, n)| (*id, n.shards.len()))
                .collect();
            let Some(&(busiest, max)) = schedulable.iter().max_by_key(|(id, len)| (*len, *id))
            else {
                break;
            };
            let Some(&(idlest, min)) = schedulable
                .iter()
                .min_by_key(|(id, len)| (*len, *id != preferred, *id))
            else {
                break;
            };
            if max <= min + 1 {
                break;
            }
            let Some(shard) = self
                .nodes
                .get(&busiest)
                .and_then(|n| n.shards.iter().next().cloned())
            else {
                break;
            };
            self.attach(&shard, idlest);
            moved += 1;
        }
        moved
    }

    /// Node description for a status poll; advances pending transitions.
    pub(crate) fn poll_status(&mut self, node: NodeId) -> HarnessResult<NodeDescription> {
        let state = self.node_mut("node_status", node)?;
        if let Some(target) = state.settles_to.clone() {
            if state.polls_left > 0 {
                state.polls_left -= 1;
            } else if target != state.policy {
                state.policy = target;
                state.settles_to = None;
            }
        }
        Ok(NodeDescription::new(node, state.policy.clone()))
    }

    pub(crate) fn describe_nodes(&self) -> Vec<NodeDescription> {
        self.nodes
            .iter()
            .map(|(id, n)| NodeDescription::new(*id, n.policy.clone()))
            .collect()
    }

    pub(crate) fn placements(&self) -> Vec<PlacementEntry> {
        let mut entries: Vec<PlacementEntry> = self
            .shards
            .iter()
            .map(|(shard, state)| {
                let mut observed = ObservedState::default();
                observed.locations.insert(
                    state.attached,
                    Some(ObservedLocation::with_mode(LocationMode::AttachedSingle)),
                );
                for secondary in &state.secondaries {
                    observed.locations.insert(
                        *secondary,
                        Some(ObservedLocation::with_mode(LocationMode::Secondary)),
                    );
                }
                PlacementEntry {
                    shard_id: shard.clone(),
                    intent: IntentState {
                        attached: Some(state.attached),
                        secondary: Some(state.secondaries.clone()),
                    },
                    observed,
                }
            })
            .collect();

        if self.faults.double_attachment {
            if let Some(first) = entries.first_mut() {
                let attached = first.intent.attached;
                if let Some(other) = self.nodes.keys().find(|id| Some(**id) != attached) {
                    first.observed.locations.insert(
                        *other,
                        Some(ObservedLocation::with_mode(LocationMode::AttachedStale)),
                    );
                }
            }
        }
        entries
    }

    pub(crate) fn add_sub_resource(
        &mut self,
        resource: &ResourceId,
        sub_resource: SubResourceId,
    ) -> HarnessResult<()> {
        let state = self.resources.get_mut(resource).ok_or_else(|| {
            rejected("create_sub_resource", 404, format!("resource {resource} not found"))
        })?;
        state.sub_resources.push(sub_resource);
        Ok(())
    }

    pub(crate) fn resource_status(&self, resource: &ResourceId) -> HarnessResult<Value> {
        let state = self.resources.get(resource).ok_or_else(|| {
            rejected("resource_status", 404, format!("resource {resource} not found"))
        })?;
        let shard_zero = state
            .shards
            .first()
            .and_then(|shard| self.shards.get(shard))
            .map(|s| s.attached);
        let sub_resources: Vec<String> =
            state.sub_resources.iter().map(ToString::to_string).collect();
        Ok(json!({
            "id": resource,
            "shard_count": state.shards.len(),
            "sub_resources": sub_resources,
            "attached": shard_zero,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with(resources: usize) -> ClusterState {
        let mut cluster = ClusterState::new(3, 1);
        for _ in 0..resources {
            let id = ResourceId::generate();
            let shards = ShardId::all_for(&id, 2);
            cluster.create_resource(id, shards, 1).unwrap();
        }
        cluster
    }

    #[test]
    fn creation_spreads_shards_evenly() {
        let cluster = cluster_with(30);
        assert_eq!(cluster.shard_count(), 60);
        for node in 1..=3 {
            assert_eq!(cluster.load(NodeId(node)), 20);
        }
        for entry in cluster.placements() {
            let secondary = entry.intent.secondary.unwrap();
            assert_eq!(secondary.len(), 1);
            assert_ne!(Some(secondary[0]), entry.intent.attached);
        }
    }

    #[test]
    fn drain_then_fill_restores_balance() {
        let mut cluster = cluster_with(30);
        cluster.pending_reconciles = 0;
        let moved = cluster.drain(NodeId(2)).unwrap();
        assert_eq!(moved, 20);
        assert_eq!(cluster.load(NodeId(2)), 0);
        assert_eq!(cluster.load(NodeId(1)) + cluster.load(NodeId(3)), 60);
        assert_eq!(cluster.pending_reconciles, 20);

        assert_eq!(
            cluster.poll_status(NodeId(2)).unwrap().scheduling,
            NodeSchedulingPolicy::Draining
        );
        assert_eq!(
            cluster.poll_status(NodeId(2)).unwrap().scheduling,
            NodeSchedulingPolicy::PauseForRestart
        );
        assert!(cluster.fill(NodeId(2)).is_err());

        cluster.restart(NodeId(2)).unwrap();
        cluster.fill(NodeId(2)).unwrap();
        for node in 1..=3 {
            assert_eq!(cluster.load(NodeId(node)), 20);
        }
    }

    #[test]
    fn rejected_drain_leaves_node_untouched() {
        let mut cluster = ClusterState::new(1, 1);
        let id = ResourceId::generate();
        cluster.create_resource(id.clone(), ShardId::all_for(&id, 2), 0).unwrap();
        cluster.pending_reconciles = 0;

        let err = cluster.drain(NodeId(1)).unwrap_err();
        assert!(err.to_string().contains("no other schedulable node"));
        assert_eq!(cluster.load(NodeId(1)), 2);
        assert_eq!(cluster.pending_reconciles, 0);
        assert_eq!(
            cluster.poll_status(NodeId(1)).unwrap().scheduling,
            NodeSchedulingPolicy::Active
        );
    }

    #[test]
    fn migration_keeps_secondary_count() {
        let mut cluster = cluster_with(1);
        let entry = cluster.placements().remove(0);
        let from = entry.intent.attached.unwrap();
        let to = entry.intent.secondary.unwrap()[0];
        cluster.migrate(&entry.shard_id, to).unwrap();
        let after = cluster
            .placements()
            .into_iter()
            .find(|e| e.shard_id == entry.shard_id)
            .unwrap();
        assert_eq!(after.intent.attached, Some(to));
        assert_eq!(after.intent.secondary, Some(vec![from]));
    }
}
