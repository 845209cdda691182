//! Merkle inclusion proofs built from ancestor chains

use crate::model::{Hash, Node, Side};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One level of a proof: the sibling hash and which side it sits on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Hash,
    pub side: Side,
}

/// Proof that `key` maps to `value` under some root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Leaf to root
    pub steps: Vec<ProofStep>,
}

impl Proof {
    /// Build a proof for `leaf` from its ancestors, parent first
    pub fn from_ancestors(leaf: &Node, ancestors: &[Node]) -> Result<Self> {
        let (key, value) = match leaf {
            Node::Leaf { key, value } => (key.clone(), value.clone()),
            Node::Internal { .. } => {
                return Err(Error::NotFound("proofs start at a leaf".into()));
            }
        };

        let mut steps = Vec::with_capacity(ancestors.len());
        let mut current = leaf.hash();
        for ancestor in ancestors {
            let side = ancestor.side_of(&current).ok_or_else(|| {
                Error::StorageCorruption(format!(
                    "{} is not a child of its recorded parent",
                    current
                ))
            })?;
            let sibling_side = side.opposite();
            let sibling = ancestor
                .child(sibling_side)
                .ok_or_else(|| Error::StorageCorruption("leaf used as a parent".into()))?;
            steps.push(ProofStep {
                sibling,
                side: sibling_side,
            });
            current = ancestor.hash();
        }

        Ok(Proof { key, value, steps })
    }

    pub fn leaf_hash(&self) -> Hash {
        Node::leaf(self.key.clone(), self.value.clone()).hash()
    }

    /// Fold the steps back up to a root hash
    pub fn root(&self) -> Hash {
        self.steps.iter().fold(self.leaf_hash(), |current, step| {
            Node::with_child(step.side, step.sibling, current).hash()
        })
    }

    pub fn verify(&self, root: &Hash) -> bool {
        self.root() == *root
    }
}
