//! ---
//! psoak_section: "02-controller-api"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Identifier types shared across the harness."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

/// Error returned when an identifier cannot be parsed from its text form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} identifier '{input}': {reason}")]
pub struct IdParseError {
    kind: &'static str,
    input: String,
    reason: &'static str,
}

impl IdParseError {
    fn new(kind: &'static str, input: &str, reason: &'static str) -> Self {
        Self {
            kind,
            input: input.to_owned(),
            reason,
        }
    }
}

/// Identifier of a logical resource (tenant) partitioned into shards.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct ResourceId(String);

impl ResourceId {
    /// Generate a fresh random identifier in the controller's 32-hex form.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdParseError::new("resource", s, "empty"));
        }
        if s.contains('-') {
            return Err(IdParseError::new("resource", s, "must not contain '-'"));
        }
        Ok(Self(s.to_owned()))
    }
}

/// Identifier of a sub-resource (timeline) created inside every shard of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubResourceId(String);

impl SubResourceId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for SubResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(NodeId)
            .map_err(|_| IdParseError::new("node", s, "not an unsigned integer"))
    }
}

/// Composite shard key: resource, shard index, and shard count.
///
/// The text form is `<resource>-<index:02x><count:02x>`. A resource created
/// without sharding (count 0) is written as the bare resource identifier.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct ShardId {
    /// Owning resource.
    pub resource: ResourceId,
    /// Index of this shard within the resource.
    pub number: u8,
    /// Total shard count of the resource (0 means unsharded).
    pub count: u8,
}

impl ShardId {
    /// Construct a shard key.
    pub fn new(resource: ResourceId, number: u8, count: u8) -> Self {
        Self {
            resource,
            number,
            count,
        }
    }

    /// Key of the single shard of an unsharded resource.
    pub fn unsharded(resource: ResourceId) -> Self {
        Self::new(resource, 0, 0)
    }

    /// All shard keys of a resource with the given shard count.
    pub fn all_for(resource: &ResourceId, count: u8) -> Vec<ShardId> {
        if count == 0 {
            return vec![Self::unsharded(resource.clone())];
        }
        (0..count)
            .map(|number| Self::new(resource.clone(), number, count))
            .collect()
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}-{:02x}{:02x}", self.resource, self.number, self.count)
        }
    }
}

impl FromStr for ShardId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((resource, suffix)) = s.rsplit_once('-') else {
            return Ok(Self::unsharded(s.parse()?));
        };
        if suffix.len() != 4 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdParseError::new(
                "shard",
                s,
                "suffix must be four hex digits",
            ));
        }
        let number = u8::from_str_radix(&suffix[..2], 16)
            .map_err(|_| IdParseError::new("shard", s, "bad shard number"))?;
        let count = u8::from_str_radix(&suffix[2..], 16)
            .map_err(|_| IdParseError::new("shard", s, "bad shard count"))?;
        if count > 0 && number >= count {
            return Err(IdParseError::new("shard", s, "shard number exceeds count"));
        }
        Ok(Self::new(resource.parse()?, number, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_id_text_form_matches_controller_convention() {
        let resource: ResourceId = "1f359dd625e519a1a4e8d7509690f6fc".parse().unwrap();
        let shard = ShardId::new(resource.clone(), 1, 2);
        assert_eq!(shard.to_string(), "1f359dd625e519a1a4e8d7509690f6fc-0102");
        assert_eq!(shard.to_string().parse::<ShardId>().unwrap(), shard);

        let bare = ShardId::unsharded(resource);
        assert_eq!(bare.to_string(), "1f359dd625e519a1a4e8d7509690f6fc");
        assert_eq!(bare.to_string().parse::<ShardId>().unwrap(), bare);
    }

    #[test]
    fn shard_id_rejects_out_of_range_number() {
        let err = "abcd-0302".parse::<ShardId>().unwrap_err();
        assert!(err.to_string().contains("exceeds count"));
        assert!("abcd-zz02".parse::<ShardId>().is_err());
    }

    #[test]
    fn all_for_enumerates_every_shard() {
        let resource = ResourceId::generate();
        let shards = ShardId::all_for(&resource, 4);
        assert_eq!(shards.len(), 4);
        assert!(shards.iter().enumerate().all(|(i, s)| s.number as usize == i));
        assert_eq!(ShardId::all_for(&resource, 0).len(), 1);
    }

    #[test]
    fn node_id_deserializes_from_quoted_map_key() {
        let map: std::collections::BTreeMap<NodeId, u32> =
            serde_json::from_str(r#"{"3": 1, "11": 2}"#).unwrap();
        assert_eq!(map.get(&NodeId(11)), Some(&2));
    }
}
