//! Change detection between trees, index and workspace
//!
//! The index's stat cache keeps this cheap: when all four timestamps agree
//! the entry is assumed clean with no content re-hash; otherwise the
//! workspace blob is hashed and compared to the entry's OID.

use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::index::index_entry::{EntryMetadata, IndexEntry};
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::object::Object;
use crate::artifacts::status::file_change::{IndexChangeType, WorkspaceChangeType};
use derive_new::new;
use std::path::Path;

#[derive(new)]
pub struct Inspector<'r> {
    repository: &'r Repository,
}

impl Inspector<'_> {
    /// Compare an index entry against a fresh workspace stat
    pub fn check_index_against_workspace(
        &self,
        entry: Option<&IndexEntry>,
        stat: Option<&EntryMetadata>,
    ) -> anyhow::Result<WorkspaceChangeType> {
        match (entry, stat) {
            (None, None) => Ok(WorkspaceChangeType::None),
            (None, Some(_)) => Ok(WorkspaceChangeType::Untracked),
            (Some(_), None) => Ok(WorkspaceChangeType::Deleted),
            (Some(entry), Some(stat)) => {
                if !entry.stat_match(stat) {
                    return Ok(WorkspaceChangeType::Modified);
                }
                if entry.times_match(stat) {
                    return Ok(WorkspaceChangeType::None);
                }

                let data = self.repository.workspace().read_file(&entry.name)?;
                let oid = Blob::from_bytes(data).object_id()?;

                if oid == entry.oid {
                    Ok(WorkspaceChangeType::None)
                } else {
                    Ok(WorkspaceChangeType::Modified)
                }
            }
        }
    }

    /// Compare an index entry against a committed tree entry
    pub fn check_index_against_tree(
        &self,
        entry: Option<&IndexEntry>,
        item: Option<&DatabaseEntry>,
    ) -> IndexChangeType {
        match (entry, item) {
            (None, None) => IndexChangeType::None,
            (Some(_), None) => IndexChangeType::Added,
            (None, Some(_)) => IndexChangeType::Deleted,
            (Some(entry), Some(item)) => {
                if entry.metadata.mode == item.mode && entry.oid == item.oid {
                    IndexChangeType::None
                } else {
                    IndexChangeType::Modified
                }
            }
        }
    }

    /// Whether a path holds content the index does not know about
    ///
    /// A file is trackable when untracked; a directory when it contains any
    /// trackable file, however deep.
    pub fn trackable_file(
        &self,
        index: &Index,
        path: &Path,
        stat: &EntryMetadata,
    ) -> anyhow::Result<bool> {
        if !stat.mode.is_tree() {
            return Ok(!index.tracked_file(path));
        }

        let items = self.repository.workspace().list_dir(Some(path))?;

        // Files first, then directories
        for want_dir in [false, true] {
            for (item_path, item_stat) in &items {
                if item_stat.mode.is_tree() != want_dir {
                    continue;
                }
                if self.trackable_file(index, item_path, item_stat)? {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}
