//! Merge algorithms
//!
//! - `common_ancestors`: best-common-ancestor discovery over the commit graph
//! - `inputs`: resolves the two sides of a merge and their base set
//! - `resolve`: the three-way tree and content merge
//! - `pending_commit`: the on-disk state of an interrupted merge

pub mod common_ancestors;
pub mod inputs;
pub mod pending_commit;
pub mod resolve;
