//! Key/value diff between two tree versions

use crate::model::Hash;
use crate::store::ObjectStore;
use crate::tree::TreeIndex;
use crate::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Type of change in a diff
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiffEntry {
    Added {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Removed {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Modified {
        key: Vec<u8>,
        old_value: Vec<u8>,
        new_value: Vec<u8>,
    },
}

impl DiffEntry {
    pub fn key(&self) -> &[u8] {
        match self {
            DiffEntry::Added { key, .. }
            | DiffEntry::Removed { key, .. }
            | DiffEntry::Modified { key, .. } => key,
        }
    }
}

/// A diff between two tree states, sorted by key
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn new(entries: Vec<DiffEntry>) -> Self {
        Diff { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Added { .. }))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Removed { .. }))
            .count()
    }

    pub fn modified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Modified { .. }))
            .count()
    }
}

/// Diff two materialized trees
pub fn diff_trees(old: &TreeIndex, new: &TreeIndex) -> Result<Diff> {
    if old.root() == new.root() {
        return Ok(Diff::default());
    }

    let old_pairs: BTreeMap<_, _> = old.pairs()?.into_iter().collect();
    let new_pairs: BTreeMap<_, _> = new.pairs()?.into_iter().collect();
    let keys: BTreeSet<_> = old_pairs.keys().chain(new_pairs.keys()).collect();

    let mut entries = Vec::new();
    for key in keys {
        match (old_pairs.get(key), new_pairs.get(key)) {
            (None, Some(value)) => entries.push(DiffEntry::Added {
                key: key.clone(),
                value: value.clone(),
            }),
            (Some(value), None) => entries.push(DiffEntry::Removed {
                key: key.clone(),
                value: value.clone(),
            }),
            (Some(old_value), Some(new_value)) if old_value != new_value => {
                entries.push(DiffEntry::Modified {
                    key: key.clone(),
                    old_value: old_value.clone(),
                    new_value: new_value.clone(),
                })
            }
            _ => {}
        }
    }

    Ok(Diff::new(entries))
}

/// Load both roots from the store and diff them
pub fn diff_roots(store: &ObjectStore, old_root: Hash, new_root: Hash) -> Result<Diff> {
    if old_root == new_root {
        return Ok(Diff::default());
    }
    let old = TreeIndex::load(store, old_root)?;
    let new = TreeIndex::load(store, new_root)?;
    diff_trees(&old, &new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WorkingTree;

    fn tree(pairs: &[(&str, &str)]) -> TreeIndex {
        let mut work = WorkingTree::new(&TreeIndex::empty());
        for (k, v) in pairs {
            work.insert(k.as_bytes(), v.as_bytes()).unwrap();
        }
        work.into_tree()
    }

    #[test]
    fn test_diff_empty_to_non_empty() {
        let diff = diff_trees(&TreeIndex::empty(), &tree(&[("a", "1")])).unwrap();
        assert_eq!(diff.added_count(), 1);
        assert_eq!(diff.removed_count(), 0);
        assert_eq!(diff.modified_count(), 0);
    }

    #[test]
    fn test_diff_mixed() {
        let old = tree(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let new = tree(&[("a", "1"), ("b", "20"), ("d", "4")]);
        let diff = diff_trees(&old, &new).unwrap();

        assert_eq!(
            diff.entries,
            vec![
                DiffEntry::Modified {
                    key: b"b".to_vec(),
                    old_value: b"2".to_vec(),
                    new_value: b"20".to_vec(),
                },
                DiffEntry::Removed {
                    key: b"c".to_vec(),
                    value: b"3".to_vec(),
                },
                DiffEntry::Added {
                    key: b"d".to_vec(),
                    value: b"4".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn test_diff_same_trees() {
        let t = tree(&[("a", "1")]);
        assert!(diff_trees(&t, &t).unwrap().is_empty());
    }
}
