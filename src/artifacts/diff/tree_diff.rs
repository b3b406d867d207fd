//! Tree diffing
//!
//! Recursive comparison of two tree objects, producing a map from path to
//! `(old entry, new entry)` pairs. Subtrees whose `(mode, oid)` are equal on
//! both sides short-circuit without being loaded.

use crate::areas::database::Database;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::log::path_filter::PathFilter;
use crate::artifacts::objects::object::ObjectBox;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::Tree;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A single changed path: entry before and after
///
/// `old` is `None` for additions, `new` is `None` for deletions.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub old: Option<DatabaseEntry>,
    pub new: Option<DatabaseEntry>,
}

impl Change {
    /// Build a change, returning `None` when the entries are equal
    pub fn from_entries(old: Option<DatabaseEntry>, new: Option<DatabaseEntry>) -> Option<Self> {
        match (old, new) {
            (None, None) => None,
            (old, new) if old == new => None,
            (old, new) => Some(Change { old, new }),
        }
    }
}

/// Set of changes detected between two trees
pub type ChangeSet = BTreeMap<PathBuf, Change>;

/// Map of tree entries (name -> database entry)
pub type TreeEntryMap = BTreeMap<String, DatabaseEntry>;

/// Tree diff engine
///
/// Compares two tree objects and produces a changeset of added, deleted,
/// and modified files, optionally restricted by a path filter.
#[derive(Debug)]
pub struct TreeDiff<'r> {
    database: &'r Database,
    change_set: ChangeSet,
}

impl<'r> TreeDiff<'r> {
    pub fn new(database: &'r Database) -> Self {
        TreeDiff {
            database,
            change_set: BTreeMap::new(),
        }
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.change_set
    }

    pub fn into_changes(self) -> ChangeSet {
        self.change_set
    }

    pub fn get_entries(&self, path: &Path) -> (Option<&DatabaseEntry>, Option<&DatabaseEntry>) {
        if let Some(change) = self.change_set.get(path) {
            (change.old.as_ref(), change.new.as_ref())
        } else {
            (None, None)
        }
    }

    /// Compare the trees named by two OIDs
    ///
    /// Either side may be a commit (its tree is used) or `None` (an empty
    /// tree).
    pub fn compare_oids(
        &mut self,
        old: Option<&ObjectId>,
        new: Option<&ObjectId>,
        path_filter: &PathFilter,
    ) -> anyhow::Result<()> {
        if old == new {
            return Ok(());
        }

        let old_tree_entries = self.inflate_oid_to_tree_entries(old)?;
        let new_tree_entries = self.inflate_oid_to_tree_entries(new)?;

        self.detect_deletions(&old_tree_entries, &new_tree_entries, path_filter)?;
        self.detect_additions(&old_tree_entries, &new_tree_entries, path_filter)?;

        Ok(())
    }

    fn inflate_oid_to_tree_entries(&self, oid: Option<&ObjectId>) -> anyhow::Result<TreeEntryMap> {
        match oid {
            None => Ok(BTreeMap::new()),
            Some(oid) => Ok(self
                .inflate_oid_to_tree(oid)?
                .into_entries()
                .collect::<BTreeMap<_, _>>()),
        }
    }

    fn inflate_oid_to_tree(&self, oid: &ObjectId) -> anyhow::Result<Tree> {
        let object = self.database.parse_object(oid)?;

        match object {
            ObjectBox::Tree(tree) => Ok(*tree),
            ObjectBox::Commit(commit) => {
                let tree_oid = commit.tree_oid().clone();
                self.inflate_oid_to_tree(&tree_oid)
            }
            _ => Err(anyhow::anyhow!("Invalid tree object {}", oid.to_string())),
        }
    }

    fn detect_deletions(
        &mut self,
        old: &TreeEntryMap,
        new: &TreeEntryMap,
        path_filter: &PathFilter,
    ) -> anyhow::Result<()> {
        for (name, entry) in path_filter.filter_matching_entries(old.iter()) {
            let subpath_filter = path_filter.join_subpath_filter(name);
            let path = subpath_filter.path().to_path_buf();
            let other = new.get(name);

            if let Some(other) = other
                && other == entry
            {
                continue;
            }

            let tree_a_oid = if entry.is_tree() {
                Some(&entry.oid)
            } else {
                None
            };
            let tree_b_oid = if let Some(other) = other
                && other.is_tree()
            {
                Some(&other.oid)
            } else {
                None
            };

            self.compare_oids(tree_a_oid, tree_b_oid, &subpath_filter)?;

            let blob_a = if entry.is_tree() {
                None
            } else {
                Some(entry.clone())
            };
            let blob_b = match other {
                Some(other) if !other.is_tree() => Some(other.clone()),
                _ => None,
            };

            if let Some(change) = Change::from_entries(blob_a, blob_b) {
                self.change_set.insert(path, change);
            }
        }

        Ok(())
    }

    fn detect_additions(
        &mut self,
        old: &TreeEntryMap,
        new: &TreeEntryMap,
        path_filter: &PathFilter,
    ) -> anyhow::Result<()> {
        for (name, entry) in path_filter.filter_matching_entries(new.iter()) {
            let subpath_filter = path_filter.join_subpath_filter(name);
            let path = subpath_filter.path().to_path_buf();
            let other = old.get(name);

            if other.is_some() {
                continue;
            }

            if entry.is_tree() {
                self.compare_oids(None, Some(&entry.oid), &subpath_filter)?;
            } else {
                // A newly added blob
                self.change_set.insert(
                    path,
                    Change {
                        old: None,
                        new: Some(entry.clone()),
                    },
                );
            }
        }

        Ok(())
    }
}
