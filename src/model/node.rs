//! Tree node types
//!
//! Nodes are immutable and addressed by [`Node::hash`]. The hash is computed
//! over a tagged, length-prefixed layout rather than the bincode encoding, so
//! it stays stable even if the storage encoding changes.

use super::Hash;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const LEAF_TAG: u8 = 0x01;
const INTERNAL_TAG: u8 = 0x02;

/// Which child slot of an internal node something occupies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Wire index used by RPC callers: 0 = left, 1 = right
    pub fn as_index(self) -> u8 {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Side> {
        match index {
            0 => Some(Side::Left),
            1 => Some(Side::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// A node of the Merkle tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    /// A key/value pair
    Leaf { key: Vec<u8>, value: Vec<u8> },
    /// Two subtrees, referenced by hash
    Internal { left: Hash, right: Hash },
}

impl Node {
    pub fn leaf(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Node::Leaf {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn internal(left: Hash, right: Hash) -> Self {
        Node::Internal { left, right }
    }

    /// Build an internal node holding `child` on `side` and `sibling` opposite
    pub fn with_child(side: Side, child: Hash, sibling: Hash) -> Self {
        match side {
            Side::Left => Node::internal(child, sibling),
            Side::Right => Node::internal(sibling, child),
        }
    }

    /// Compute the content hash of this node
    pub fn hash(&self) -> Hash {
        match self {
            Node::Leaf { key, value } => Hash::digest_many(&[
                &[LEAF_TAG],
                &(key.len() as u64).to_le_bytes(),
                key,
                value,
            ]),
            Node::Internal { left, right } => {
                Hash::digest_many(&[&[INTERNAL_TAG], left.as_bytes(), right.as_bytes()])
            }
        }
    }

    /// Serialize for storage
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Inverse of [`Node::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Node::Leaf { key, .. } => Some(key),
            Node::Internal { .. } => None,
        }
    }

    pub fn children(&self) -> Option<(Hash, Hash)> {
        match self {
            Node::Internal { left, right } => Some((*left, *right)),
            Node::Leaf { .. } => None,
        }
    }

    pub fn child(&self, side: Side) -> Option<Hash> {
        self.children().map(|(left, right)| match side {
            Side::Left => left,
            Side::Right => right,
        })
    }

    /// The side `child` occupies under this node, if it is a direct child
    pub fn side_of(&self, child: &Hash) -> Option<Side> {
        let (left, right) = self.children()?;
        if left == *child {
            Some(Side::Left)
        } else if right == *child {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Copy of this internal node with the child on `side` swapped out
    pub(crate) fn replace_child(&self, side: Side, child: Hash) -> Result<Node> {
        let (left, right) = self
            .children()
            .ok_or_else(|| Error::StorageCorruption("leaf used as a parent".into()))?;
        Ok(match side {
            Side::Left => Node::internal(child, right),
            Side::Right => Node::internal(left, child),
        })
    }
}
