//! Operations across tree versions

mod diff;

pub use diff::{diff_roots, diff_trees, Diff, DiffEntry};
