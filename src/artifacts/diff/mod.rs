//! Diff algorithms and tree comparison
//!
//! - `myers`: shortest-edit-script line diff
//! - `diff3`: three-way line merge built on two Myers diffs
//! - `tree_diff`: tree-level diffing for detecting file changes

pub mod diff3;
pub mod myers;
pub mod tree_diff;
