//! ---
//! psoak_section: "02-controller-api"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Node description and scheduling policy types."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::NodeId;

/// Scheduling policy a node reports through the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeSchedulingPolicy {
    Active,
    Filling,
    Pause,
    PauseForRestart,
    Draining,
    /// A policy this harness does not know; kept verbatim for diagnostics.
    Other(String),
}

impl NodeSchedulingPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "Active",
            Self::Filling => "Filling",
            Self::Pause => "Pause",
            Self::PauseForRestart => "PauseForRestart",
            Self::Draining => "Draining",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for NodeSchedulingPolicy {
    fn from(raw: &str) -> Self {
        match raw {
            "Active" => Self::Active,
            "Filling" => Self::Filling,
            "Pause" => Self::Pause,
            "PauseForRestart" => Self::PauseForRestart,
            "Draining" => Self::Draining,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for NodeSchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeSchedulingPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeSchedulingPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Node as described by the controller's node endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: NodeId,
    pub scheduling: NodeSchedulingPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
}

impl NodeDescription {
    pub fn new(id: NodeId, scheduling: NodeSchedulingPolicy) -> Self {
        Self {
            id,
            scheduling,
            availability: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_policies_survive_round_trip() {
        let node: NodeDescription =
            serde_json::from_str(r#"{"id": 7, "scheduling": "Quarantined"}"#).unwrap();
        assert_eq!(
            node.scheduling,
            NodeSchedulingPolicy::Other("Quarantined".into())
        );
        assert_eq!(
            serde_json::to_value(&node).unwrap()["scheduling"],
            "Quarantined"
        );
    }
}
