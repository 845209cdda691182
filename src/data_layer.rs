//! High-level data layer API
//!
//! [`DataLayer`] is the entry point RPC handlers call into. It owns the
//! [`ObjectStore`], serializes changelists per store, and keeps the current
//! tree of recently used stores materialized so reads do not touch disk.

use crate::config::Config;
use crate::model::{Change, ChangeDescriptor, Hash, Node, NodeHash, StoreId};
use crate::ops::{diff_roots, Diff};
use crate::store::ObjectStore;
use crate::tree::{Proof, TreeIndex, WorkingTree};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a committed changelist
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct InsertResult {
    pub store_id: StoreId,
    pub previous_root: Hash,
    pub root: Hash,
    /// Generation of `root` in the store's history
    pub generation: u64,
}

/// The data layer engine
///
/// All methods take `&self`; share it across threads behind an `Arc`.
pub struct DataLayer {
    store: ObjectStore,
    config: Config,
    /// Current tree per store, keyed by store; stale entries are detected by
    /// comparing roots
    trees: RwLock<HashMap<StoreId, Arc<TreeIndex>>>,
    /// One writer at a time per store
    writers: Mutex<HashMap<StoreId, Arc<Mutex<()>>>>,
}

impl DataLayer {
    /// Create a new database at the given path
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::load(path.as_ref())?;
        let store = ObjectStore::create(path)?;
        Ok(Self::with_store(store, config))
    }

    /// Open an existing database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::load(path.as_ref())?;
        let store = ObjectStore::open(path)?;
        Ok(Self::with_store(store, config))
    }

    /// Open or create a database
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::load(path.as_ref())?;
        Self::open_with_config(path, config)
    }

    /// Open or create a database with an explicit config
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let store = ObjectStore::open_or_create(path)?;
        Ok(Self::with_store(store, config))
    }

    fn with_store(store: ObjectStore, config: Config) -> Self {
        DataLayer {
            store: store.with_compression_level(config.compression_level),
            config,
            trees: RwLock::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn object_store(&self) -> &ObjectStore {
        &self.store
    }

    // === Store lifecycle ===

    /// Create a new, empty key/value store
    pub fn create_store(&self) -> Result<StoreId> {
        let store_id = loop {
            let candidate = StoreId::generate();
            if self.store.create_root(candidate)? {
                break candidate;
            }
            warn!(store = %candidate, "generated store id already taken, retrying");
        };

        self.cache_tree(store_id, Arc::new(TreeIndex::empty()));
        info!(store = %store_id, "created store");
        Ok(store_id)
    }

    pub fn list_stores(&self) -> Vec<StoreId> {
        self.store.list_stores()
    }

    /// Current root hash, [`Hash::ZERO`] for an empty store
    pub fn get_root(&self, store_id: &StoreId) -> Result<Hash> {
        self.store.get_root(store_id)
    }

    /// Every root the store has had; index = generation
    pub fn get_root_history(&self, store_id: &StoreId) -> Result<Vec<Hash>> {
        self.store.root_history(store_id)
    }

    // === Queries ===

    /// Value stored under `key`, `None` if absent
    pub fn get_value(&self, store_id: &StoreId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot(store_id)?.get_value(key).map(<[u8]>::to_vec))
    }

    /// Every pair in left-to-right leaf order
    pub fn get_pairs(&self, store_id: &StoreId) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.snapshot(store_id)?.pairs()
    }

    /// Pairs as of an earlier generation
    pub fn get_pairs_at(
        &self,
        store_id: &StoreId,
        generation: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let history = self.store.root_history(store_id)?;
        let root = usize::try_from(generation)
            .ok()
            .and_then(|g| history.get(g))
            .copied()
            .ok_or(Error::UnknownGeneration {
                store_id: *store_id,
                generation,
            })?;
        TreeIndex::load(&self.store, root)?.pairs()
    }

    /// Ancestors of `node_hash` in the store's current tree, parent first,
    /// ending with the root
    pub fn get_ancestors(&self, node_hash: &NodeHash, store_id: &StoreId) -> Result<Vec<Node>> {
        self.snapshot(store_id)?.ancestors(node_hash)
    }

    /// Inclusion proof for `key` against the current root
    pub fn get_proof(&self, store_id: &StoreId, key: &[u8]) -> Result<Proof> {
        self.snapshot(store_id)?.proof(key)
    }

    /// Key/value changes between two roots from the store's history
    pub fn get_kv_diff(&self, store_id: &StoreId, from: Hash, to: Hash) -> Result<Diff> {
        let history = self.store.root_history(store_id)?;
        for root in [from, to] {
            if !history.contains(&root) {
                return Err(Error::NotFound(format!(
                    "root {} is not in the history of store {}",
                    root, store_id
                )));
            }
        }
        diff_roots(&self.store, from, to)
    }

    /// The store's current tree, shared with other readers
    pub fn snapshot(&self, store_id: &StoreId) -> Result<Arc<TreeIndex>> {
        let root = self.store.get_root(store_id)?;
        if let Some(tree) = self.trees.read().get(store_id) {
            if tree.root() == root {
                return Ok(Arc::clone(tree));
            }
        }

        debug!(store = %store_id, root = %root.short(), "materializing tree");
        let tree = Arc::new(TreeIndex::load(&self.store, root)?);
        self.cache_tree(*store_id, Arc::clone(&tree));
        Ok(tree)
    }

    // === Mutation ===

    /// Apply a changelist atomically and commit the resulting root
    pub fn insert(&self, store_id: &StoreId, changes: &[Change]) -> Result<InsertResult> {
        if changes.is_empty() {
            return Err(Error::MalformedChange("changelist is empty".into()));
        }
        if !self.store.contains_store(store_id) {
            return Err(Error::UnknownStore(*store_id));
        }

        let writer = self.writer_lock(store_id);
        let _guard = writer.lock();

        let base = self.snapshot(store_id)?;
        let previous_root = base.root();

        let mut work = WorkingTree::new(&base);
        if let Err(e) = work.apply_all(changes) {
            warn!(store = %store_id, error = %e, "changelist rejected");
            return Err(e);
        }

        let root = work.root();
        if root == previous_root {
            let generation = (self.store.root_history(store_id)?.len() - 1) as u64;
            debug!(store = %store_id, "changelist left the root unchanged");
            return Ok(InsertResult {
                store_id: *store_id,
                previous_root,
                root,
                generation,
            });
        }

        let written = work.persist(&self.store)?;
        let generation = self.store.set_root(store_id, root)?;
        self.cache_tree(*store_id, Arc::new(work.into_tree()));

        info!(
            store = %store_id,
            root = %root.short(),
            generation,
            changes = changes.len(),
            written,
            "applied changelist"
        );

        Ok(InsertResult {
            store_id: *store_id,
            previous_root,
            root,
            generation,
        })
    }

    /// Validate request-shaped changes and apply them
    pub fn insert_descriptors(
        &self,
        store_id: &StoreId,
        descriptors: Vec<ChangeDescriptor>,
    ) -> Result<InsertResult> {
        let changes = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, d)| {
                d.into_change().map_err(|e| Error::ChangeFailed {
                    index,
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.insert(store_id, &changes)
    }

    /// Checkpoint to disk
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    // === Internal helpers ===

    fn writer_lock(&self, store_id: &StoreId) -> Arc<Mutex<()>> {
        Arc::clone(self.writers.lock().entry(*store_id).or_default())
    }

    fn cache_tree(&self, store_id: StoreId, tree: Arc<TreeIndex>) {
        let mut trees = self.trees.write();
        if !trees.contains_key(&store_id) && trees.len() >= self.config.tree_cache_capacity {
            let victim = trees.keys().find(|id| **id != store_id).copied();
            if let Some(victim) = victim {
                trees.remove(&victim);
            }
        }
        trees.insert(store_id, tree);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Side;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, DataLayer) {
        let dir = tempdir().unwrap();
        let layer = DataLayer::create(dir.path().join("test.dl")).unwrap();
        (dir, layer)
    }

    fn set(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> std::collections::BTreeMap<Vec<u8>, Vec<u8>> {
        pairs.into_iter().collect()
    }

    #[test]
    fn test_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DataLayer>();
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dl");

        let id = {
            let layer = DataLayer::create(&path).unwrap();
            layer.create_store().unwrap()
        };

        let layer = DataLayer::open(&path).unwrap();
        assert_eq!(layer.list_stores(), vec![id]);
        assert!(layer.get_pairs(&id).unwrap().is_empty());
    }

    #[test]
    fn test_new_store_is_empty() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        assert!(layer.get_pairs(&id).unwrap().is_empty());
        assert_eq!(layer.get_root(&id).unwrap(), Hash::ZERO);
    }

    #[test]
    fn test_two_stores_are_distinct() {
        let (_dir, layer) = setup();
        let a = layer.create_store().unwrap();
        let b = layer.create_store().unwrap();
        assert_ne!(a, b);

        layer.insert(&a, &[Change::insert(b"k".to_vec(), b"v".to_vec())]).unwrap();
        assert_eq!(layer.get_value(&b, b"k").unwrap(), None);
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        let result = layer
            .insert(
                &id,
                &[
                    Change::insert(b"k1".to_vec(), b"v1".to_vec()),
                    Change::insert(b"k2".to_vec(), b"v2".to_vec()),
                ],
            )
            .unwrap();

        assert_eq!(result.previous_root, Hash::ZERO);
        assert_eq!(result.generation, 1);
        assert_eq!(layer.get_root(&id).unwrap(), result.root);
        assert_eq!(layer.get_value(&id, b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(layer.get_value(&id, b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(layer.get_value(&id, b"k3").unwrap(), None);
    }

    #[test]
    fn test_insert_then_delete() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        layer.insert(&id, &[Change::insert(b"k1".to_vec(), b"v1".to_vec())]).unwrap();
        layer.insert(&id, &[Change::delete(b"k1".to_vec())]).unwrap();

        assert_eq!(layer.get_value(&id, b"k1").unwrap(), None);
        assert_eq!(layer.get_root(&id).unwrap(), Hash::ZERO);
        assert_eq!(layer.get_root_history(&id).unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        layer.insert(&id, &[Change::insert(b"k".to_vec(), b"v".to_vec())]).unwrap();
        let err = layer
            .insert(&id, &[Change::insert(b"k".to_vec(), b"w".to_vec())])
            .unwrap_err();
        assert!(matches!(err.root_cause(), Error::KeyExists(_)));
    }

    #[test]
    fn test_failed_changelist_changes_nothing() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        layer.insert(&id, &[Change::insert(b"a".to_vec(), b"1".to_vec())]).unwrap();
        let root = layer.get_root(&id).unwrap();
        let nodes = layer.object_store().node_count();

        let err = layer
            .insert(
                &id,
                &[
                    Change::insert(b"b".to_vec(), b"2".to_vec()),
                    Change::delete(b"a".to_vec()),
                    Change::insert(b"b".to_vec(), b"3".to_vec()),
                ],
            )
            .unwrap_err();

        assert!(matches!(err, Error::ChangeFailed { index: 2, .. }));
        assert_eq!(layer.get_root(&id).unwrap(), root);
        assert_eq!(layer.object_store().node_count(), nodes);
        assert_eq!(
            layer.get_pairs(&id).unwrap(),
            vec![(b"a".to_vec(), b"1".to_vec())]
        );
    }

    #[test]
    fn test_unknown_store() {
        let (_dir, layer) = setup();
        let ghost = StoreId::generate();
        assert!(matches!(layer.get_pairs(&ghost), Err(Error::UnknownStore(_))));
        assert!(matches!(
            layer.insert(&ghost, &[Change::insert(b"k".to_vec(), b"v".to_vec())]),
            Err(Error::UnknownStore(_))
        ));
    }

    #[test]
    fn test_empty_changelist_rejected() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        assert!(matches!(
            layer.insert(&id, &[]),
            Err(Error::MalformedChange(_))
        ));
    }

    #[test]
    fn test_upsert_references_node_from_same_changelist() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        let first = Node::leaf(b"a".to_vec(), b"1".to_vec()).hash();

        layer
            .insert(
                &id,
                &[
                    Change::insert(b"a".to_vec(), b"1".to_vec()),
                    Change::upsert_at(first, Side::Right, b"b".to_vec(), b"2".to_vec()),
                ],
            )
            .unwrap();

        assert_eq!(
            layer.get_pairs(&id).unwrap(),
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec())
            ]
        );
    }

    #[test]
    fn test_noop_changelist_keeps_generation() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        let first = layer
            .insert(&id, &[Change::insert(b"a".to_vec(), b"1".to_vec())])
            .unwrap();
        let again = layer
            .insert(
                &id,
                &[Change::upsert_at(first.root, Side::Left, b"a".to_vec(), b"1".to_vec())],
            )
            .unwrap();
        assert_eq!(again.root, first.root);
        assert_eq!(again.generation, first.generation);
        assert_eq!(layer.get_root_history(&id).unwrap().len(), 2);
    }

    #[test]
    fn test_ancestors_rebuild_root() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        let changes: Vec<_> = (0u8..16)
            .map(|i| Change::insert(vec![i], vec![i, i]))
            .collect();
        let result = layer.insert(&id, &changes).unwrap();

        let tree = layer.snapshot(&id).unwrap();
        for i in 0u8..16 {
            let leaf = tree.leaf_hash(&[i]).unwrap();
            let ancestors = layer.get_ancestors(&leaf, &id).unwrap();
            assert_eq!(ancestors.last().unwrap().hash(), result.root);

            let proof = layer.get_proof(&id, &[i]).unwrap();
            assert!(proof.verify(&result.root));
        }

        assert!(matches!(
            layer.get_ancestors(&Hash::digest(b"stranger"), &id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_history_and_diff() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        let r1 = layer
            .insert(&id, &[Change::insert(b"a".to_vec(), b"1".to_vec())])
            .unwrap();
        let r2 = layer
            .insert(
                &id,
                &[
                    Change::insert(b"b".to_vec(), b"2".to_vec()),
                    Change::delete(b"a".to_vec()),
                ],
            )
            .unwrap();

        assert_eq!(
            set(layer.get_pairs_at(&id, 1).unwrap()),
            set(vec![(b"a".to_vec(), b"1".to_vec())])
        );
        assert!(layer.get_pairs_at(&id, 0).unwrap().is_empty());
        assert!(matches!(
            layer.get_pairs_at(&id, 9),
            Err(Error::UnknownGeneration { generation: 9, .. })
        ));

        let diff = layer.get_kv_diff(&id, r1.root, r2.root).unwrap();
        assert_eq!(diff.added_count(), 1);
        assert_eq!(diff.removed_count(), 1);

        assert!(matches!(
            layer.get_kv_diff(&id, r1.root, Hash::digest(b"elsewhere")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_insert_descriptors() {
        let (_dir, layer) = setup();
        let id = layer.create_store().unwrap();
        let descriptors: Vec<ChangeDescriptor> = serde_json::from_value(serde_json::json!([
            {"action": "insert", "key": "6b", "value": "76"},
            {"action": "delete", "key": "6b", "side": 0},
        ]))
        .unwrap();

        let err = layer.insert_descriptors(&id, descriptors).unwrap_err();
        assert!(matches!(err, Error::ChangeFailed { index: 1, .. }));
        assert!(layer.get_pairs(&id).unwrap().is_empty());
    }

    #[test]
    fn test_cache_capacity_bounds_trees() {
        let dir = tempdir().unwrap();
        let config = Config {
            tree_cache_capacity: 2,
            ..Config::default()
        };
        let layer = DataLayer::open_with_config(dir.path().join("test.dl"), config).unwrap();

        let ids: Vec<_> = (0..5).map(|_| layer.create_store().unwrap()).collect();
        for id in &ids {
            layer.insert(id, &[Change::insert(b"k".to_vec(), id.as_bytes().to_vec())]).unwrap();
        }
        assert!(layer.trees.read().len() <= 2);
        for id in &ids {
            assert_eq!(layer.get_value(id, b"k").unwrap(), Some(id.as_bytes().to_vec()));
        }
    }
}
