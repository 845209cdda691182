//! # datalayer
//!
//! A versioned, content-addressed key/value store built on a binary Merkle
//! tree.
//!
//! Every store is identified by a [`StoreId`] and owns a history of root
//! hashes. Writers submit changelists that are applied atomically: either
//! every change lands and a new root is committed, or nothing changes.
//! Readers can fetch values, enumerate pairs, and pull ancestor paths or
//! inclusion proofs that let a third party check a value against a root.
//!
//! ## Core Concepts
//!
//! - **Nodes**: leaves hold a key/value pair, internal nodes hold two child
//!   hashes; a node's hash is a pure function of its content
//! - **Stores**: named trees with an append-only root history
//! - **Changelists**: ordered insert/delete/upsert batches, all or nothing
//!
//! ## Example
//!
//! ```ignore
//! use datalayer::{Change, DataLayer};
//!
//! let layer = DataLayer::open_or_create("datalayer.db")?;
//! let store = layer.create_store()?;
//! layer.insert(&store, &[Change::insert(b"k1".to_vec(), b"v1".to_vec())])?;
//! assert_eq!(layer.get_value(&store, b"k1")?, Some(b"v1".to_vec()));
//! ```

pub mod config;
pub mod model;
pub mod ops;
pub mod store;
pub mod tree;

mod data_layer;
mod error;

pub use config::Config;
pub use data_layer::{DataLayer, InsertResult};
pub use error::{Error, Result};
pub use model::{decode_hex, parse_changelist, Change, ChangeDescriptor, Hash, Node, NodeHash, Side, StoreId};
pub use ops::{Diff, DiffEntry};
pub use store::ObjectStore;
pub use tree::{Proof, ProofStep, TreeIndex, WorkingTree};

/// Database version for format compatibility
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"DLAYERDB";
