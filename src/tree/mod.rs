//! Merkle tree engine
//!
//! - [`TreeIndex`]: every node of one root held in memory, with key and
//!   parent lookups for queries
//! - [`WorkingTree`]: a private copy that applies changelists by path copying
//! - [`Proof`]: inclusion proofs derived from ancestor chains

mod index;
mod mutation;
mod proof;

pub use index::TreeIndex;
pub use mutation::WorkingTree;
pub use proof::{Proof, ProofStep};
