//! Content-addressed node store
//!
//! Tree nodes are stored under their own hash, compressed with zstd, in a
//! single append-only file that also holds each store's root history.

mod blob;
mod file_store;

pub use blob::{Blob, BlobType};
pub use file_store::{ObjectStore, DEFAULT_COMPRESSION_LEVEL};
