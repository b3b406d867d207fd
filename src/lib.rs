//! The durable core of a Git-compatible version control system.
//!
//! This crate implements the subsystems a command layer is built on:
//!
//! - a content-addressed object store with loose and packed backends
//! - the staging index with per-path conflict stages
//! - an atomically updated reference store
//! - a revision-graph walker with inclusion/exclusion and path filtering
//! - a three-way merge resolver with common-ancestor discovery
//! - the pack-file codec with binary delta compression
//!
//! Command dispatch, argument parsing, pagers, color and network transport
//! live outside this crate; see [`areas::repository::Repository`] for the
//! main entry point.

pub mod areas;
pub mod artifacts;
