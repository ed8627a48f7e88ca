//! ---
//! psoak_section: "05-verification"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Placement snapshot collection and normalisation."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use psoak_api::{
    HarnessResult, LocationMode, NodeId, PlacementController, PlacementEntry, ShardId,
};
use serde::Serialize;
use tracing::{debug, info};

/// Placement the controller intends for a shard.
///
/// `None` means the controller has not asserted the field yet, which is not
/// the same as an empty secondary set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Intent {
    pub attached: Option<NodeId>,
    pub secondary: Option<Vec<NodeId>>,
}

/// Placement as last reported by the nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Observed {
    /// Mode per reporting node; `None` for a location without a known mode.
    pub by_node: BTreeMap<NodeId, Option<LocationMode>>,
    /// Nodes reporting a primary attachment, in listing order.
    pub attached_nodes: Vec<NodeId>,
    /// Nodes reporting a secondary location, in listing order.
    pub secondary: Vec<NodeId>,
}

/// Intent and observed placement of one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlacementRecord {
    pub intent: Intent,
    pub observed: Observed,
}

impl PlacementRecord {
    /// The observed attached node. With more than one reporting node this is
    /// the last one listed; see [`PlacementRecord::attached_nodes`].
    pub fn attached(&self) -> Option<NodeId> {
        self.observed.attached_nodes.last().copied()
    }

    pub fn attached_nodes(&self) -> &[NodeId] {
        &self.observed.attached_nodes
    }

    pub fn is_double_attached(&self) -> bool {
        self.observed.attached_nodes.len() > 1
    }

    /// Both sides are known and agree on the attached node.
    pub fn is_converged(&self) -> bool {
        matches!(
            (self.attached(), self.intent.attached),
            (Some(observed), Some(intended)) if observed == intended
        )
    }

    /// Fold one listing entry into this record.
    pub fn merge(&mut self, entry: &PlacementEntry) {
        if let Some(attached) = entry.intent.attached {
            self.intent.attached = Some(attached);
        }
        if let Some(secondary) = &entry.intent.secondary {
            self.intent.secondary = Some(secondary.clone());
        }

        for (node, location) in &entry.observed.locations {
            let mode = location.as_ref().and_then(|loc| loc.mode());
            self.observed.by_node.insert(*node, mode);
            self.observed.attached_nodes.retain(|n| n != node);
            self.observed.secondary.retain(|n| n != node);
            match mode {
                Some(mode) if mode.is_attached() => self.observed.attached_nodes.push(*node),
                Some(LocationMode::Secondary) => self.observed.secondary.push(*node),
                _ => {}
            }
        }
    }
}

/// Point-in-time view of every shard the controller lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PlacementSnapshot {
    records: BTreeMap<ShardId, PlacementRecord>,
}

impl PlacementSnapshot {
    /// Build a snapshot from a raw listing; repeated shard ids merge into one record.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a PlacementEntry>,
    {
        let mut records: BTreeMap<ShardId, PlacementRecord> = BTreeMap::new();
        for entry in entries {
            records
                .entry(entry.shard_id.clone())
                .or_default()
                .merge(entry);
        }
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, shard: &ShardId) -> Option<&PlacementRecord> {
        self.records.get(shard)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ShardId, &PlacementRecord)> {
        self.records.iter()
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &ShardId> {
        self.records.keys()
    }

    pub fn converged_count(&self) -> usize {
        self.records.values().filter(|r| r.is_converged()).count()
    }

    pub fn double_attached(&self) -> impl Iterator<Item = (&ShardId, &PlacementRecord)> {
        self.records.iter().filter(|(_, r)| r.is_double_attached())
    }
}

/// Fetches the controller's shard listing and normalises it.
#[derive(Clone)]
pub struct SnapshotCollector {
    controller: Arc<dyn PlacementController>,
}

impl SnapshotCollector {
    pub fn new(controller: Arc<dyn PlacementController>) -> Self {
        Self { controller }
    }

    /// Query the listing once and build a fresh snapshot.
    pub async fn collect(&self) -> HarnessResult<PlacementSnapshot> {
        let entries = self.controller.list_placements().await?;
        let snapshot = PlacementSnapshot::from_entries(&entries);
        info!(
            entries = entries.len(),
            shards = snapshot.len(),
            converged = snapshot.converged_count(),
            "collected placement snapshot"
        );
        debug!(snapshot = ?snapshot, "placement snapshot contents");
        Ok(snapshot)
    }
}

impl std::fmt::Debug for SnapshotCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCollector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use psoak_api::{IntentState, ObservedLocation, ObservedState, ResourceId};

    use super::*;

    fn entry(
        shard: &ShardId,
        intent: Option<u64>,
        locations: &[(u64, Option<LocationMode>)],
    ) -> PlacementEntry {
        PlacementEntry {
            shard_id: shard.clone(),
            intent: IntentState {
                attached: intent.map(NodeId),
                secondary: None,
            },
            observed: ObservedState {
                locations: locations
                    .iter()
                    .map(|(node, mode)| (NodeId(*node), mode.map(ObservedLocation::with_mode)))
                    .collect(),
            },
        }
    }

    #[test]
    fn classifies_locations_per_node() {
        let shard = ShardId::new(ResourceId::generate(), 0, 2);
        let raw = entry(
            &shard,
            Some(1),
            &[
                (1, Some(LocationMode::AttachedSingle)),
                (2, Some(LocationMode::Secondary)),
                (3, None),
            ],
        );
        let snapshot = PlacementSnapshot::from_entries([&raw]);
        let record = snapshot.get(&shard).unwrap();
        assert_eq!(record.attached(), Some(NodeId(1)));
        assert_eq!(record.observed.secondary, vec![NodeId(2)]);
        assert_eq!(record.observed.by_node[&NodeId(3)], None);
        assert!(record.is_converged());
        assert_eq!(record.intent.secondary, None);
    }

    #[test]
    fn surfaces_more_than_one_attached_node() {
        let shard = ShardId::new(ResourceId::generate(), 1, 2);
        let raw = entry(
            &shard,
            Some(2),
            &[
                (1, Some(LocationMode::AttachedStale)),
                (2, Some(LocationMode::AttachedMulti)),
            ],
        );
        let snapshot = PlacementSnapshot::from_entries([&raw]);
        let record = snapshot.get(&shard).unwrap();
        assert_eq!(record.attached_nodes(), &[NodeId(1), NodeId(2)]);
        assert_eq!(record.attached(), Some(NodeId(2)));
        assert_eq!(snapshot.double_attached().count(), 1);
    }

    #[test]
    fn last_listed_attachment_wins_over_node_order() {
        let shard = ShardId::new(ResourceId::generate(), 0, 1);
        let raw = entry(
            &shard,
            Some(2),
            &[
                (5, Some(LocationMode::AttachedStale)),
                (2, Some(LocationMode::AttachedSingle)),
            ],
        );
        let snapshot = PlacementSnapshot::from_entries([&raw]);
        let record = snapshot.get(&shard).unwrap();
        assert_eq!(record.attached_nodes(), &[NodeId(5), NodeId(2)]);
        assert_eq!(record.attached(), Some(NodeId(2)));
        assert!(record.is_converged());
    }

    #[test]
    fn repeated_shard_ids_merge_into_one_record() {
        let shard = ShardId::new(ResourceId::generate(), 0, 1);
        let first = entry(&shard, None, &[(4, Some(LocationMode::AttachedSingle))]);
        let second = entry(&shard, Some(4), &[(5, Some(LocationMode::Secondary))]);
        let snapshot = PlacementSnapshot::from_entries([&first, &second]);
        assert_eq!(snapshot.len(), 1);
        let record = snapshot.get(&shard).unwrap();
        assert_eq!(record.intent.attached, Some(NodeId(4)));
        assert_eq!(record.attached(), Some(NodeId(4)));
        assert_eq!(record.observed.secondary, vec![NodeId(5)]);
        assert!(!record.is_double_attached());
    }
}
