//! ---
//! psoak_section: "06-orchestration"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Seeded selection of mixed-phase operations."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::fmt;

use psoak_api::{NodeId, ResourceId, ShardId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Operation kinds issued during the mixed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    FanOutWrite,
    Migrate,
    PassthroughRead,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::FanOutWrite => "fan_out_write",
            OperationKind::Migrate => "migrate",
            OperationKind::PassthroughRead => "passthrough_read",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation chosen for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixedOperation {
    /// Create a sub-resource on every shard of the resource.
    FanOutWrite { resource: ResourceId },
    /// Move one shard's attachment to `destination`.
    Migrate { shard: ShardId, destination: NodeId },
    /// Read served by shard zero.
    PassthroughRead { resource: ResourceId },
}

impl MixedOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            MixedOperation::FanOutWrite { .. } => OperationKind::FanOutWrite,
            MixedOperation::Migrate { .. } => OperationKind::Migrate,
            MixedOperation::PassthroughRead { .. } => OperationKind::PassthroughRead,
        }
    }
}

/// Picks mixed-phase operations from an explicit, seedable generator.
///
/// The sequence depends only on the seed and the order resources are offered.
#[derive(Debug, Clone)]
pub struct OperationChooser {
    rng: StdRng,
}

impl OperationChooser {
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Choose an operation for `resource`.
    ///
    /// `shard_count` of 0 denotes an unsharded resource; `nodes` must not be empty
    /// for a migration to be chosen, otherwise a passthrough read is issued.
    pub fn choose(
        &mut self,
        resource: &ResourceId,
        shard_count: u8,
        nodes: &[NodeId],
    ) -> MixedOperation {
        match self.rng.gen_range(0..3u8) {
            0 => MixedOperation::FanOutWrite {
                resource: resource.clone(),
            },
            1 => {
                let shard = if shard_count == 0 {
                    ShardId::unsharded(resource.clone())
                } else {
                    ShardId::new(resource.clone(), self.rng.gen_range(0..shard_count), shard_count)
                };
                match nodes.choose(&mut self.rng) {
                    Some(destination) => MixedOperation::Migrate {
                        shard,
                        destination: *destination,
                    },
                    None => MixedOperation::PassthroughRead {
                        resource: resource.clone(),
                    },
                }
            }
            _ => MixedOperation::PassthroughRead {
                resource: resource.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(seed: u64, resources: &[ResourceId]) -> Vec<MixedOperation> {
        let nodes = [NodeId(1), NodeId(2), NodeId(3)];
        let mut chooser = OperationChooser::seeded(seed);
        resources
            .iter()
            .map(|r| chooser.choose(r, 2, &nodes))
            .collect()
    }

    #[test]
    fn same_seed_and_order_give_same_plan() {
        let resources: Vec<ResourceId> = (0..64).map(|_| ResourceId::generate()).collect();
        assert_eq!(plan(1234, &resources), plan(1234, &resources));
        assert_ne!(plan(1234, &resources), plan(4321, &resources));
    }

    #[test]
    fn every_kind_is_reachable_and_migrations_stay_in_range() {
        let resources: Vec<ResourceId> = (0..200).map(|_| ResourceId::generate()).collect();
        let ops = plan(7, &resources);
        for kind in [
            OperationKind::FanOutWrite,
            OperationKind::Migrate,
            OperationKind::PassthroughRead,
        ] {
            assert!(ops.iter().any(|op| op.kind() == kind), "{kind} never chosen");
        }
        for op in &ops {
            if let MixedOperation::Migrate { shard, destination } = op {
                assert!(shard.number < 2);
                assert_eq!(shard.count, 2);
                assert!((1..=3).contains(&destination.0));
            }
        }
    }
}
