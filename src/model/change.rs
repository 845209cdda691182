//! Changelist entries
//!
//! [`Change`] is what the mutation engine consumes. [`ChangeDescriptor`] is
//! the loose, hex-encoded shape that arrives from RPC callers; it is checked
//! once at the boundary and turned into a `Change` carrying only the fields
//! its kind needs.

use super::{Hash, Side};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One mutation in a changelist
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// Add a new key; fails if the key already exists anywhere in the tree
    Insert { key: Vec<u8>, value: Vec<u8> },
    /// Add a new key on `side` of the node `reference`; fails if the key
    /// already exists
    InsertAt {
        reference: Hash,
        side: Side,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove an existing key
    Delete { key: Vec<u8> },
    /// Replace the value of `key` in place, or if absent hang a new leaf on
    /// `side` of the node `reference`
    UpsertAt {
        reference: Hash,
        side: Side,
        key: Vec<u8>,
        value: Vec<u8>,
    },
}

impl Change {
    pub fn insert(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Change::Insert {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn insert_at(
        reference: Hash,
        side: Side,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Change::InsertAt {
            reference,
            side,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Change::Delete { key: key.into() }
    }

    pub fn upsert_at(
        reference: Hash,
        side: Side,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Change::UpsertAt {
            reference,
            side,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Change::Insert { key, .. }
            | Change::InsertAt { key, .. }
            | Change::Delete { key }
            | Change::UpsertAt { key, .. } => key,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Change::Insert { .. } | Change::InsertAt { .. } => "insert",
            Change::Delete { .. } => "delete",
            Change::UpsertAt { .. } => "upsert",
        }
    }
}

/// `side` as callers send it: `0`/`1` or `"left"`/`"right"`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SideField {
    Index(u8),
    Name(Side),
}

impl SideField {
    fn resolve(self) -> Result<Side> {
        match self {
            SideField::Name(side) => Ok(side),
            SideField::Index(index) => Side::from_index(index)
                .ok_or_else(|| Error::MalformedChange(format!("invalid side index {}", index))),
        }
    }
}

/// A change as received from a request body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub action: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_node_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<SideField>,
}

impl ChangeDescriptor {
    /// Validate and decode into a [`Change`]
    pub fn into_change(self) -> Result<Change> {
        let key = decode_hex("key", &self.key)?;
        let value = self
            .value
            .as_deref()
            .map(|v| decode_hex("value", v))
            .transpose()?;
        let reference = self
            .reference_node_hash
            .as_deref()
            .map(|r| {
                Hash::from_hex(r).map_err(|e| {
                    Error::MalformedChange(format!("invalid reference_node_hash: {}", e))
                })
            })
            .transpose()?;
        let side = self.side.map(SideField::resolve).transpose()?;

        match self.action.as_str() {
            "insert" => {
                let value = value.ok_or_else(|| missing("insert", "value"))?;
                match (reference, side) {
                    (None, None) => Ok(Change::Insert { key, value }),
                    (Some(reference), Some(side)) => Ok(Change::InsertAt {
                        reference,
                        side,
                        key,
                        value,
                    }),
                    (Some(_), None) => Err(missing("insert", "side")),
                    (None, Some(_)) => Err(missing("insert", "reference_node_hash")),
                }
            }
            "upsert" => {
                let value = value.ok_or_else(|| missing("upsert", "value"))?;
                let reference = reference.ok_or_else(|| missing("upsert", "reference_node_hash"))?;
                let side = side.ok_or_else(|| missing("upsert", "side"))?;
                Ok(Change::UpsertAt {
                    reference,
                    side,
                    key,
                    value,
                })
            }
            "delete" => {
                if value.is_some() || reference.is_some() || side.is_some() {
                    return Err(Error::MalformedChange(
                        "delete only takes a key".into(),
                    ));
                }
                Ok(Change::Delete { key })
            }
            other => Err(Error::MalformedChange(format!("unknown action '{}'", other))),
        }
    }
}

impl TryFrom<ChangeDescriptor> for Change {
    type Error = Error;

    fn try_from(descriptor: ChangeDescriptor) -> Result<Self> {
        descriptor.into_change()
    }
}

impl From<&Change> for ChangeDescriptor {
    fn from(change: &Change) -> Self {
        let mut descriptor = ChangeDescriptor {
            action: change.action().to_string(),
            key: hex::encode(change.key()),
            value: None,
            reference_node_hash: None,
            side: None,
        };
        match change {
            Change::Insert { value, .. } => descriptor.value = Some(hex::encode(value)),
            Change::Delete { .. } => {}
            Change::InsertAt {
                reference,
                side,
                value,
                ..
            }
            | Change::UpsertAt {
                reference,
                side,
                value,
                ..
            } => {
                descriptor.value = Some(hex::encode(value));
                descriptor.reference_node_hash = Some(reference.to_hex());
                descriptor.side = Some(SideField::Index(side.as_index()));
            }
        }
        descriptor
    }
}

/// Parse a JSON array of change descriptors into a changelist
pub fn parse_changelist(json: &str) -> Result<Vec<Change>> {
    let descriptors: Vec<ChangeDescriptor> = serde_json::from_str(json)?;
    descriptors
        .into_iter()
        .enumerate()
        .map(|(index, d)| {
            d.into_change().map_err(|e| Error::ChangeFailed {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

/// Decode a hex field, with or without a `0x` prefix
pub fn decode_hex(field: &str, s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| Error::MalformedChange(format!("invalid {}: {}", field, e)))
}

fn missing(action: &str, field: &str) -> Error {
    Error::MalformedChange(format!("{} requires '{}'", action, field))
}
