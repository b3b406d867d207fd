//! Pack writer bookkeeping
//!
//! One [`Entry`] per candidate object: its type, size and path hint for the
//! delta-clustering sort, plus the delta link and write offset filled in as
//! the pack is produced. Entries reference their delta base by index into
//! the writer's entry list.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pack::{OFS_DELTA, REF_DELTA};
use std::path::PathBuf;

/// A delta chosen for an entry: the base entry plus the encoded stream
#[derive(Debug, Clone)]
pub struct DeltaLink {
    pub base: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub oid: ObjectId,
    /// Base pack type code (1 commit, 2 tree, 3 blob)
    pub kind: u8,
    /// Uncompressed payload size
    pub size: u64,
    pub path: Option<PathBuf>,
    pub delta: Option<DeltaLink>,
    pub depth: u32,
    /// Stream offset once written
    pub offset: Option<u64>,
}

impl Entry {
    pub fn new(oid: ObjectId, kind: u8, size: u64, path: Option<PathBuf>) -> Self {
        Entry {
            oid,
            kind,
            size,
            path,
            delta: None,
            depth: 0,
            offset: None,
        }
    }

    /// Clustering key: same-typed, similarly-named, similarly-sized objects
    /// end up adjacent so the delta window sees good candidates
    pub fn sort_key(&self) -> (u8, Option<String>, Option<String>, u64) {
        let basename = self
            .path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string());
        let dirname = self
            .path
            .as_ref()
            .and_then(|p| p.parent())
            .map(|p| p.to_string_lossy().to_string());

        (self.kind, basename, dirname, self.size)
    }

    /// The type code written to the stream for this entry
    pub fn packed_kind(&self, allow_ofs: bool) -> u8 {
        if self.delta.is_some() {
            if allow_ofs { OFS_DELTA } else { REF_DELTA }
        } else {
            self.kind
        }
    }

    /// Payload size as it will appear in the record header
    pub fn packed_size(&self) -> u64 {
        match &self.delta {
            Some(delta) => delta.data.len() as u64,
            None => self.size,
        }
    }

    pub fn assign_delta(&mut self, delta: DeltaLink, depth: u32) {
        self.delta = Some(delta);
        self.depth = depth;
    }
}
