//! Changelist application
//!
//! A [`WorkingTree`] is a private copy of a [`TreeIndex`]; the copy shares
//! structure with its base, so starting one is O(1). Changes rewrite
//! the path from the touched node to the root (path copying), so node hashes
//! are always current and later changes can reference nodes made by earlier
//! ones. Nothing reaches the [`ObjectStore`] until [`WorkingTree::persist`];
//! dropping a working tree is the rollback.

use super::TreeIndex;
use crate::model::{Change, Hash, Node, Side};
use crate::store::ObjectStore;
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::debug;

/// In-progress copy of a tree
#[derive(Debug)]
pub struct WorkingTree {
    tree: TreeIndex,
    /// Nodes made by this working tree that may not be in the store yet
    created: HashSet<Hash>,
}

impl WorkingTree {
    pub fn new(base: &TreeIndex) -> Self {
        WorkingTree {
            tree: base.clone(),
            created: HashSet::new(),
        }
    }

    pub fn tree(&self) -> &TreeIndex {
        &self.tree
    }

    pub fn root(&self) -> Hash {
        self.tree.root
    }

    /// Apply changes in order, stopping at the first failure.
    ///
    /// On error the working tree is left partially modified and should be
    /// dropped.
    pub fn apply_all(&mut self, changes: &[Change]) -> Result<()> {
        for (index, change) in changes.iter().enumerate() {
            self.apply(change).map_err(|e| Error::ChangeFailed {
                index,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }

    pub fn apply(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::Insert { key, value } => self.insert(key, value),
            Change::InsertAt {
                reference,
                side,
                key,
                value,
            } => self.insert_at(reference, *side, key, value),
            Change::Delete { key } => self.delete(key),
            Change::UpsertAt {
                reference,
                side,
                key,
                value,
            } => self.upsert_at(reference, *side, key, value),
        }
    }

    /// Add a new key at a position derived from the key's hash.
    ///
    /// Bit `d` of BLAKE3(key) picks the branch at depth `d`; the leaf reached
    /// is split with the next bit choosing the new leaf's side. Depth stays
    /// logarithmic in expectation whatever order keys arrive in.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.tree.leaves.contains_key(key) {
            return Err(Error::KeyExists(key.to_vec()));
        }

        let leaf = self.add(Node::leaf(key, value));
        if self.tree.is_empty() {
            self.tree.root = leaf;
            return Ok(());
        }

        let path = Hash::digest(key);
        let mut depth = 0;
        let mut current = self.tree.root;
        while let Some((left, right)) = self.tree.node(&current)?.children() {
            current = if path.bit(depth) { right } else { left };
            depth += 1;
        }

        let side = if path.bit(depth) { Side::Right } else { Side::Left };
        self.splice(current, side, leaf)
    }

    /// Add a new key on `side` of `reference`
    pub fn insert_at(
        &mut self,
        reference: &Hash,
        side: Side,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        if self.tree.leaves.contains_key(key) {
            return Err(Error::KeyExists(key.to_vec()));
        }
        if !self.tree.contains(reference) {
            return Err(Error::NotFound(reference.to_hex()));
        }
        let leaf = self.add(Node::leaf(key, value));
        self.splice(*reference, side, leaf)
    }

    /// Remove a key, collapsing its parent into the sibling
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let leaf = self
            .tree
            .leaf_hash(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_vec()))?;
        self.replace(leaf, None)?;
        self.discard(&leaf);
        Ok(())
    }

    /// Update `key` in place, or hang a new leaf on `side` of `reference`
    pub fn upsert_at(
        &mut self,
        reference: &Hash,
        side: Side,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        if let Some(existing) = self.tree.leaf_hash(key) {
            let leaf = self.add(Node::leaf(key, value));
            if leaf != existing {
                self.replace(existing, Some(leaf))?;
                self.discard(&existing);
            }
            return Ok(());
        }

        if !self.tree.contains(reference) {
            return Err(Error::NotFound(reference.to_hex()));
        }
        let leaf = self.add(Node::leaf(key, value));
        self.splice(*reference, side, leaf)
    }

    /// Write every new node still in the tree, returning how many were new
    pub fn persist(&self, store: &ObjectStore) -> Result<usize> {
        let mut written = 0;
        for hash in &self.created {
            if let Some(node) = self.tree.nodes.get(hash) {
                if !store.contains_node(hash) {
                    store.put_node(node)?;
                    written += 1;
                }
            }
        }
        debug!(root = %self.tree.root.short(), written, "persisted working tree");
        Ok(written)
    }

    pub fn into_tree(self) -> TreeIndex {
        self.tree
    }

    // === Internal helpers ===

    /// Index a node and link its children to it
    fn add(&mut self, node: Node) -> Hash {
        let hash = node.hash();
        match &node {
            Node::Leaf { key, .. } => {
                self.tree.leaves.insert(key.clone(), hash);
            }
            Node::Internal { left, right } => {
                self.tree.parents.insert(*left, hash);
                self.tree.parents.insert(*right, hash);
            }
        }
        self.tree.nodes.insert(hash, node);
        self.created.insert(hash);
        hash
    }

    /// Drop a node that is no longer part of the tree
    fn discard(&mut self, hash: &Hash) {
        if let Some(node) = self.tree.nodes.remove(hash) {
            if let Node::Leaf { key, .. } = node {
                if self.tree.leaves.get(&key) == Some(hash) {
                    self.tree.leaves.remove(&key);
                }
            }
        }
        self.tree.parents.remove(hash);
        self.created.remove(hash);
    }

    /// Replace `target` by a new internal node holding `leaf` on `side` and
    /// `target` on the other side
    fn splice(&mut self, target: Hash, side: Side, leaf: Hash) -> Result<()> {
        let parent = self.tree.parents.get(&target).copied();
        let joined = self.add(Node::with_child(side, leaf, target));
        self.replace_under(parent, target, Some(joined))
    }

    fn replace(&mut self, old: Hash, new: Option<Hash>) -> Result<()> {
        let parent = self.tree.parents.get(&old).copied();
        self.replace_under(parent, old, new)
    }

    /// Put `new` where `old` sat under `parent` and rebuild the path to the
    /// root. `None` removes `old` and collapses `parent` into the sibling.
    fn replace_under(&mut self, parent: Option<Hash>, old: Hash, new: Option<Hash>) -> Result<()> {
        if new == Some(old) {
            return Ok(());
        }

        let Some(parent) = parent else {
            self.tree.root = new.unwrap_or(Hash::ZERO);
            if let Some(new) = new {
                self.tree.parents.remove(&new);
            }
            return Ok(());
        };

        let parent_node = self.tree.node(&parent)?.clone();
        let side = parent_node.side_of(&old).ok_or_else(|| {
            Error::StorageCorruption(format!("{} is not a child of {}", old, parent))
        })?;
        let replacement = match new {
            Some(new) => self.add(parent_node.replace_child(side, new)?),
            None => parent_node
                .child(side.opposite())
                .ok_or_else(|| Error::StorageCorruption("leaf used as a parent".into()))?,
        };

        let grandparent = self.tree.parents.get(&parent).copied();
        self.replace_under(grandparent, parent, Some(replacement))?;
        self.discard(&parent);
        Ok(())
    }
}
