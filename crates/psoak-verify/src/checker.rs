//! ---
//! psoak_section: "05-verification"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Convergence and balance assertions over placement snapshots."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::fmt::Write as _;

use psoak_api::{HarnessError, HarnessResult, NodeId};
use psoak_common::ChecksConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::load::NodeLoadTable;
use crate::snapshot::{PlacementSnapshot, SnapshotCollector};

/// How many offending shards a violation message lists.
const SAMPLE_LIMIT: usize = 8;

/// Treatment of a shard that reports more than one attached node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleAttachment {
    /// Fail the convergence check.
    #[default]
    Reject,
    /// Count the shard against the last listed node.
    LastWins,
}

/// Tunables for the consistency checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckPolicy {
    /// Allowed max-min spread as a fraction of the expected total. The slack
    /// absorbs scheduler lag after migrations, drains and fills.
    pub balance_tolerance: f64,
    pub double_attachment: DoubleAttachment,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            balance_tolerance: 0.05,
            double_attachment: DoubleAttachment::Reject,
        }
    }
}

impl From<&ChecksConfig> for CheckPolicy {
    fn from(config: &ChecksConfig) -> Self {
        Self {
            balance_tolerance: config.balance_tolerance,
            double_attachment: if config.reject_double_attachment {
                DoubleAttachment::Reject
            } else {
                DoubleAttachment::LastWins
            },
        }
    }
}

impl CheckPolicy {
    /// Largest max-min spread accepted for `expected_total` shards.
    pub fn slack(&self, expected_total: usize) -> usize {
        (expected_total as f64 * self.balance_tolerance).floor() as usize
    }
}

/// Which nodes a balance check covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceExpectation {
    /// Nodes expected to hold shards. Empty means "the nodes in the table".
    pub nodes: Vec<NodeId>,
    /// Fail when an expected node holds nothing at all.
    pub require_all_loaded: bool,
}

impl BalanceExpectation {
    /// Balance over exactly the nodes present in the table.
    pub fn present() -> Self {
        Self::default()
    }

    /// Balance over `nodes`, each of which must hold at least one shard.
    pub fn all_loaded(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            require_all_loaded: true,
        }
    }
}

/// Asserts convergence and load balance over placement snapshots.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyChecker {
    policy: CheckPolicy,
}

impl ConsistencyChecker {
    pub fn new(policy: CheckPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CheckPolicy {
        self.policy
    }

    /// Count converged shards per node and require exactly `expected_total` of them.
    pub fn expect_converged(
        &self,
        snapshot: &PlacementSnapshot,
        expected_total: usize,
    ) -> HarnessResult<NodeLoadTable> {
        if self.policy.double_attachment == DoubleAttachment::Reject {
            let doubles: Vec<_> = snapshot.double_attached().collect();
            if !doubles.is_empty() {
                let mut message = format!(
                    "{} shards report more than one attached node:",
                    doubles.len()
                );
                for (shard, record) in doubles.iter().take(SAMPLE_LIMIT) {
                    let _ = write!(message, " {shard} on {:?};", record.attached_nodes());
                }
                return Err(HarnessError::consistency(message));
            }
        }

        let mut table = NodeLoadTable::new();
        let mut unconverged = Vec::new();
        for (shard, record) in snapshot.iter() {
            if record.is_converged() {
                if let Some(node) = record.attached() {
                    table.increment(node);
                }
            } else {
                unconverged.push((shard, record));
            }
        }

        let converged = table.total();
        info!(converged, expected_total, nodes = ?table, "converged shard counts");
        if converged != expected_total {
            let mut message = format!(
                "{converged} shards converged, expected {expected_total} ({} unconverged)",
                unconverged.len()
            );
            for (shard, record) in unconverged.iter().take(SAMPLE_LIMIT) {
                let _ = write!(
                    message,
                    "; {shard}: intent {:?} observed {:?}",
                    record.intent.attached,
                    record.attached_nodes()
                );
            }
            warn!(converged, expected_total, "convergence check failed");
            return Err(HarnessError::consistency(message));
        }
        Ok(table)
    }

    /// Require the spread between the most and least loaded node to fit the slack.
    pub fn expect_balanced(
        &self,
        table: &NodeLoadTable,
        expected_total: usize,
        expectation: &BalanceExpectation,
    ) -> HarnessResult<()> {
        let nodes: Vec<NodeId> = if expectation.nodes.is_empty() {
            table.nodes().collect()
        } else {
            expectation.nodes.clone()
        };

        if expectation.require_all_loaded {
            let missing: Vec<NodeId> = nodes
                .iter()
                .copied()
                .filter(|node| table.count(*node) == 0)
                .collect();
            if !missing.is_empty() {
                return Err(HarnessError::consistency(format!(
                    "nodes {missing:?} hold no attached shards"
                )));
            }
        }

        let Some((min, max)) = table.min_max(nodes.iter().copied()) else {
            if expected_total == 0 {
                return Ok(());
            }
            return Err(HarnessError::consistency(format!(
                "no nodes to balance {expected_total} shards over"
            )));
        };

        let slack = self.policy.slack(expected_total);
        info!(min, max, slack, nodes = nodes.len(), "balance check");
        if max - min > slack {
            return Err(HarnessError::consistency(format!(
                "attachments are unbalanced: max {max} - min {min} exceeds {slack} \
                 (counts {table:?})"
            )));
        }
        Ok(())
    }

    /// Require `node` to hold nothing while the total stays at `expected_total`.
    pub fn expect_drained(
        &self,
        table: &NodeLoadTable,
        node: NodeId,
        expected_total: usize,
    ) -> HarnessResult<()> {
        let remaining = table.count(node);
        if remaining != 0 {
            return Err(HarnessError::consistency(format!(
                "node {node} still holds {remaining} attached shards after drain"
            )));
        }
        let total = table.total();
        if total != expected_total {
            return Err(HarnessError::consistency(format!(
                "drain of node {node} changed the attached total from {expected_total} to {total}"
            )));
        }
        Ok(())
    }

    /// Collect a snapshot, require convergence and balance over the loaded nodes.
    pub async fn check_consistent_balanced(
        &self,
        collector: &SnapshotCollector,
        expected_total: usize,
    ) -> HarnessResult<NodeLoadTable> {
        let snapshot = collector.collect().await?;
        let table = self.expect_converged(&snapshot, expected_total)?;
        self.expect_balanced(&table, expected_total, &BalanceExpectation::present())?;
        Ok(table)
    }
}
