//! ---
//! psoak_section: "02-controller-api"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Placement wire types reported by the controller."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use indexmap::IndexMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NodeId, ResourceId, ShardId, SubResourceId};

/// Mode a node reports for a shard location.
///
/// Absence (null location, null configuration, or a mode this harness does not
/// recognise) is modelled as `Option::None` by [`LocationMode::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationMode {
    AttachedSingle,
    AttachedMulti,
    AttachedStale,
    Secondary,
}

impl LocationMode {
    /// Map a reported mode string onto a known mode.
    pub fn classify(mode: &str) -> Option<Self> {
        match mode {
            "AttachedSingle" => Some(Self::AttachedSingle),
            "AttachedMulti" => Some(Self::AttachedMulti),
            "AttachedStale" => Some(Self::AttachedStale),
            "Secondary" => Some(Self::Secondary),
            _ => None,
        }
    }

    /// Whether the mode counts as a primary attachment for balance purposes.
    pub fn is_attached(self) -> bool {
        matches!(
            self,
            Self::AttachedSingle | Self::AttachedMulti | Self::AttachedStale
        )
    }

    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttachedSingle => "AttachedSingle",
            Self::AttachedMulti => "AttachedMulti",
            Self::AttachedStale => "AttachedStale",
            Self::Secondary => "Secondary",
        }
    }
}

impl fmt::Display for LocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location configuration as last reported by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConf {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u32>,
}

impl LocationConf {
    pub fn with_mode(mode: LocationMode) -> Self {
        Self {
            mode: mode.as_str().to_owned(),
            generation: None,
        }
    }
}

/// Per-node observed location of a shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedLocation {
    #[serde(default)]
    pub conf: Option<LocationConf>,
}

impl ObservedLocation {
    pub fn with_mode(mode: LocationMode) -> Self {
        Self {
            conf: Some(LocationConf::with_mode(mode)),
        }
    }

    /// Classified mode of this location, if any.
    pub fn mode(&self) -> Option<LocationMode> {
        self.conf
            .as_ref()
            .and_then(|conf| LocationMode::classify(&conf.mode))
    }
}

/// Controller's intended placement for a shard.
///
/// Missing fields mean "not asserted yet", which is distinct from empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Vec<NodeId>>,
}

/// Observed locations keyed by node, in the order the controller listed them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    #[serde(default)]
    pub locations: IndexMap<NodeId, Option<ObservedLocation>>,
}

/// One entry of the controller's shard listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementEntry {
    #[serde(rename = "tenant_shard_id")]
    pub shard_id: ShardId,
    #[serde(default)]
    pub intent: IntentState,
    #[serde(default)]
    pub observed: ObservedState,
}

/// How many locations the controller should maintain for a new resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementPolicy {
    /// One attached location plus the given number of secondaries.
    Attached(usize),
    Secondary,
    Detached,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::Attached(1)
    }
}

/// Sharding parameters for resource creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardParameters {
    pub count: u8,
    pub stripe_size: u32,
}

/// Request body for creating a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResourceRequest {
    #[serde(rename = "new_tenant_id")]
    pub resource_id: ResourceId,
    pub shard_parameters: ShardParameters,
    pub placement_policy: PlacementPolicy,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

impl CreateResourceRequest {
    /// Shard keys this request will create.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        ShardId::all_for(&self.resource_id, self.shard_parameters.count)
    }
}

/// Request body for moving a shard's attachment to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateRequest {
    pub tenant_shard_id: ShardId,
    pub node_id: NodeId,
}

/// Request body for creating a sub-resource on every shard of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubResourceRequest {
    pub new_timeline_id: SubResourceId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_parses_controller_listing() {
        let raw = r#"{
            "tenant_shard_id": "0a0b0c0d-0002",
            "intent": {"attached": 1, "secondary": [2]},
            "observed": {"locations": {
                "1": {"conf": {"mode": "AttachedSingle", "generation": 3}},
                "2": {"conf": {"mode": "Secondary"}},
                "3": null,
                "4": {"conf": null},
                "5": {"conf": {"mode": "Detached"}}
            }}
        }"#;
        let entry: PlacementEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.shard_id.number, 0);
        assert_eq!(entry.shard_id.count, 2);
        assert_eq!(entry.intent.attached, Some(NodeId(1)));
        let modes: Vec<_> = entry
            .observed
            .locations
            .values()
            .map(|loc| loc.as_ref().and_then(ObservedLocation::mode))
            .collect();
        assert_eq!(
            modes,
            vec![
                Some(LocationMode::AttachedSingle),
                Some(LocationMode::Secondary),
                None,
                None,
                None
            ]
        );
    }

    #[test]
    fn locations_keep_listing_order() {
        let raw = r#"{
            "tenant_shard_id": "0a0b0c0d",
            "observed": {"locations": {
                "5": {"conf": {"mode": "AttachedStale"}},
                "2": {"conf": {"mode": "AttachedSingle"}}
            }}
        }"#;
        let entry: PlacementEntry = serde_json::from_str(raw).unwrap();
        let nodes: Vec<_> = entry.observed.locations.keys().copied().collect();
        assert_eq!(nodes, vec![NodeId(5), NodeId(2)]);
    }

    #[test]
    fn missing_intent_fields_stay_unasserted() {
        let entry: PlacementEntry =
            serde_json::from_str(r#"{"tenant_shard_id": "abc", "intent": {}}"#).unwrap();
        assert_eq!(entry.intent.attached, None);
        assert_eq!(entry.intent.secondary, None);
        assert!(entry.observed.locations.is_empty());
    }

    #[test]
    fn create_request_uses_controller_field_names() {
        let request = CreateResourceRequest {
            resource_id: "abc".parse().unwrap(),
            shard_parameters: ShardParameters {
                count: 2,
                stripe_size: 1024,
            },
            placement_policy: PlacementPolicy::Attached(1),
            config: BTreeMap::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["new_tenant_id"], "abc");
        assert_eq!(value["placement_policy"]["Attached"], 1);
        assert_eq!(request.shard_ids().len(), 2);
    }
}
