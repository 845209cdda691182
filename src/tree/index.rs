//! Materialized view of one tree version

use super::proof::Proof;
use crate::model::{Hash, Node};
use crate::store::ObjectStore;
use crate::{Error, Result};
use im::HashMap;

/// All nodes reachable from one root, with the lookups queries need.
///
/// Keys are unique in a tree, so every node hash occurs at most once and
/// the child → parent map is well defined. The maps are persistent, so a
/// clone shares structure with the original and costs O(1).
#[derive(Clone, Debug, Default)]
pub struct TreeIndex {
    pub(super) root: Hash,
    pub(super) nodes: HashMap<Hash, Node>,
    pub(super) parents: HashMap<Hash, Hash>,
    pub(super) leaves: HashMap<Vec<u8>, Hash>,
}

impl TreeIndex {
    /// An empty tree
    pub fn empty() -> Self {
        TreeIndex::default()
    }

    /// Load every node reachable from `root`
    pub fn load(store: &ObjectStore, root: Hash) -> Result<Self> {
        let mut tree = TreeIndex {
            root,
            ..TreeIndex::default()
        };
        if root.is_zero() {
            return Ok(tree);
        }

        let mut pending = vec![root];
        while let Some(hash) = pending.pop() {
            let node = store.get_node(&hash)?;
            match &node {
                Node::Leaf { key, .. } => {
                    if tree.leaves.insert(key.clone(), hash).is_some() {
                        return Err(Error::StorageCorruption(format!(
                            "key {} appears twice under root {}",
                            hex::encode(key),
                            root
                        )));
                    }
                }
                Node::Internal { left, right } => {
                    for child in [*left, *right] {
                        if tree.parents.insert(child, hash).is_some() {
                            return Err(Error::StorageCorruption(format!(
                                "node {} appears twice under root {}",
                                child, root
                            )));
                        }
                        pending.push(child);
                    }
                }
            }
            tree.nodes.insert(hash, node);
        }

        Ok(tree)
    }

    /// Root hash, [`Hash::ZERO`] for an empty tree
    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_zero()
    }

    /// Number of key/value pairs
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get_node(&self, hash: &Hash) -> Option<&Node> {
        self.nodes.get(hash)
    }

    pub(super) fn node(&self, hash: &Hash) -> Result<&Node> {
        self.nodes
            .get(hash)
            .ok_or_else(|| Error::NotFound(hash.to_hex()))
    }

    /// Hash of the leaf holding `key`
    pub fn leaf_hash(&self, key: &[u8]) -> Option<Hash> {
        self.leaves.get(key).copied()
    }

    pub fn get_value(&self, key: &[u8]) -> Option<&[u8]> {
        let hash = self.leaves.get(key)?;
        match self.nodes.get(hash)? {
            Node::Leaf { value, .. } => Some(value),
            Node::Internal { .. } => None,
        }
    }

    /// Every pair in left-to-right leaf order
    pub fn pairs(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::with_capacity(self.leaves.len());
        if self.is_empty() {
            return Ok(pairs);
        }

        let mut stack = vec![self.root];
        while let Some(hash) = stack.pop() {
            match self.node(&hash)? {
                Node::Leaf { key, value } => pairs.push((key.clone(), value.clone())),
                Node::Internal { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }
        Ok(pairs)
    }

    /// Nodes from the parent of `hash` up to and including the root.
    ///
    /// The root itself has no ancestors.
    pub fn ancestors(&self, hash: &Hash) -> Result<Vec<Node>> {
        if !self.nodes.contains_key(hash) {
            return Err(Error::NotFound(hash.to_hex()));
        }

        let mut ancestors = Vec::new();
        let mut current = *hash;
        while let Some(parent) = self.parents.get(&current) {
            ancestors.push(self.node(parent)?.clone());
            current = *parent;
        }
        Ok(ancestors)
    }

    /// Inclusion proof for `key` against this root
    pub fn proof(&self, key: &[u8]) -> Result<Proof> {
        let leaf_hash = self
            .leaf_hash(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_vec()))?;
        let leaf = self.node(&leaf_hash)?;
        Proof::from_ancestors(leaf, &self.ancestors(&leaf_hash)?)
    }

    /// Depth of the deepest leaf; 0 for a single leaf or an empty tree
    pub fn height(&self) -> usize {
        self.leaves
            .values()
            .map(|leaf| {
                let mut depth = 0;
                let mut current = leaf;
                while let Some(parent) = self.parents.get(current) {
                    depth += 1;
                    current = parent;
                }
                depth
            })
            .max()
            .unwrap_or(0)
    }

    /// Recheck every hash and link of the materialized tree
    pub fn verify(&self) -> Result<()> {
        for (hash, node) in &self.nodes {
            if node.hash() != *hash {
                return Err(Error::StorageCorruption(format!(
                    "node {} hashes to {}",
                    hash,
                    node.hash()
                )));
            }
            if let Node::Internal { left, right } = node {
                for child in [left, right] {
                    if self.parents.get(child) != Some(hash) {
                        return Err(Error::StorageCorruption(format!(
                            "child {} is not linked to parent {}",
                            child, hash
                        )));
                    }
                }
            }
        }

        let reachable = if self.is_empty() {
            0
        } else {
            let mut count = 0;
            let mut stack = vec![self.root];
            while let Some(hash) = stack.pop() {
                count += 1;
                if let Some((left, right)) = self.node(&hash)?.children() {
                    stack.push(left);
                    stack.push(right);
                }
            }
            count
        };
        if reachable != self.nodes.len() || self.parents.contains_key(&self.root) {
            return Err(Error::StorageCorruption(format!(
                "{} nodes indexed but {} reachable from {}",
                self.nodes.len(),
                reachable,
                self.root
            )));
        }
        Ok(())
    }
}
