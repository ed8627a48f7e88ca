//! ---
//! psoak_section: "05-verification"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Per-node attached shard counts."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use psoak_api::NodeId;
use serde::Serialize;

/// Converged shard count per attached node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeLoadTable {
    counts: BTreeMap<NodeId, usize>,
}

impl NodeLoadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, node: NodeId) {
        *self.counts.entry(node).or_insert(0) += 1;
    }

    /// Count for `node`; zero when the node holds nothing.
    pub fn count(&self, node: NodeId) -> usize {
        self.counts.get(&node).copied().unwrap_or(0)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.counts.contains_key(&node)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.counts.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, usize)> + '_ {
        self.counts.iter().map(|(node, count)| (*node, *count))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Minimum and maximum over `nodes`, counting absent nodes as zero.
    pub fn min_max<I>(&self, nodes: I) -> Option<(usize, usize)>
    where
        I: IntoIterator<Item = NodeId>,
    {
        nodes
            .into_iter()
            .map(|node| self.count(node))
            .fold(None, |acc, count| match acc {
                None => Some((count, count)),
                Some((min, max)) => Some((min.min(count), max.max(count))),
            })
    }
}

impl FromIterator<(NodeId, usize)> for NodeLoadTable {
    fn from_iter<T: IntoIterator<Item = (NodeId, usize)>>(iter: T) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}
