//! Three-way tree and content merge
//!
//! Applies the incoming side's changes on top of HEAD relative to their
//! common base. Paths changed on only one side apply cleanly; paths changed
//! on both sides go through a per-file three-way merge of content and mode,
//! recording stages 1-3 in the index when either fails. A file on one side
//! colliding with a directory on the other demotes the file to an untracked
//! `<name>~<side>` copy in the workspace.

use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::checkout::migration::Migration;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::diff::diff3;
use crate::artifacts::diff::tree_diff::{Change, ChangeSet};
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::merge::inputs::Inputs;
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::index::index_entry::parent_dirs_of;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct Resolve<'r> {
    repository: &'r Repository,
    index: &'r mut Index,
    inputs: &'r Inputs,
    left_diff: ChangeSet,
    right_diff: ChangeSet,
    clean_diff: ChangeSet,
    conflicts: BTreeMap<PathBuf, [Option<DatabaseEntry>; 3]>,
    untracked: BTreeMap<PathBuf, DatabaseEntry>,
    log: Vec<String>,
}

impl<'r> Resolve<'r> {
    pub fn new(repository: &'r Repository, index: &'r mut Index, inputs: &'r Inputs) -> Self {
        Resolve {
            repository,
            index,
            inputs,
            left_diff: ChangeSet::new(),
            right_diff: ChangeSet::new(),
            clean_diff: ChangeSet::new(),
            conflicts: BTreeMap::new(),
            untracked: BTreeMap::new(),
            log: Vec::new(),
        }
    }

    /// Run the merge: plan, migrate the workspace, record conflicts
    pub fn execute(&mut self) -> anyhow::Result<()> {
        self.prepare_tree_diffs()?;

        let mut migration =
            Migration::new(self.repository, &mut *self.index, self.clean_diff.clone());
        migration.apply_changes()?;

        self.add_conflicts_to_index();
        self.write_untracked_files()?;

        Ok(())
    }

    /// Whether the merge left any conflicted path behind
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Messages a command layer would print while merging
    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    fn prepare_tree_diffs(&mut self) -> anyhow::Result<()> {
        let base_oid = self.inputs.base_oid();

        self.left_diff = self
            .repository
            .database()
            .tree_diff_all(base_oid, Some(&self.inputs.left_oid))?;
        self.right_diff = self
            .repository
            .database()
            .tree_diff_all(base_oid, Some(&self.inputs.right_oid))?;

        let right_diff = self.right_diff.clone();
        for (path, change) in &right_diff {
            if change.new.is_some() {
                self.file_dir_conflict(path, true)?;
            }
            self.same_path_conflict(path, change.old.clone(), change.new.clone())?;
        }

        let left_diff = self.left_diff.clone();
        for (path, change) in &left_diff {
            if change.new.is_some() {
                self.file_dir_conflict(path, false)?;
            }
        }

        Ok(())
    }

    /// Merge a path changed on the right against the left side's version
    fn same_path_conflict(
        &mut self,
        path: &Path,
        base: Option<DatabaseEntry>,
        right: Option<DatabaseEntry>,
    ) -> anyhow::Result<()> {
        if self.conflicts.contains_key(path) {
            return Ok(());
        }

        let Some(left_change) = self.left_diff.get(path) else {
            // Only the right side touched this path
            self.clean_diff
                .insert(path.to_path_buf(), Change { old: base, new: right });
            return Ok(());
        };

        let left = left_change.new.clone();
        if left == right {
            return Ok(());
        }

        if left.is_some() && right.is_some() {
            self.log.push(format!("Auto-merging {}", path.display()));
        }

        let (oid_ok, oid) = self.merge_blobs(
            base.as_ref().map(|e| &e.oid),
            left.as_ref().map(|e| &e.oid),
            right.as_ref().map(|e| &e.oid),
        )?;
        let (mode_ok, mode) = Self::merge_modes(
            base.as_ref().map(|e| e.mode),
            left.as_ref().map(|e| e.mode),
            right.as_ref().map(|e| e.mode),
        );

        self.clean_diff.insert(
            path.to_path_buf(),
            Change {
                old: left.clone(),
                new: Some(DatabaseEntry::new(oid, mode)),
            },
        );

        if oid_ok && mode_ok {
            return Ok(());
        }

        self.conflicts
            .insert(path.to_path_buf(), [base, left, right]);
        self.log_conflict(path, None);

        Ok(())
    }

    /// Detect a file on one side colliding with a directory on the other
    ///
    /// `from_right` says which diff the file at `path` came from; the other
    /// side's diff is scanned for its ancestor directories.
    fn file_dir_conflict(&mut self, path: &Path, from_right: bool) -> anyhow::Result<()> {
        let (other_diff, side_name) = if from_right {
            (self.left_diff.clone(), self.inputs.left_name.clone())
        } else {
            (self.right_diff.clone(), self.inputs.right_name.clone())
        };

        for parent in parent_dirs_of(path) {
            let Some(other_change) = other_diff.get(parent) else {
                continue;
            };
            let Some(new_item) = other_change.new.clone() else {
                continue;
            };
            let old_item = other_change.old.clone();

            let conflict = if side_name == self.inputs.left_name {
                [old_item, Some(new_item.clone()), None]
            } else {
                [old_item, None, Some(new_item.clone())]
            };
            self.conflicts.insert(parent.to_path_buf(), conflict);

            self.clean_diff.remove(parent);
            let rename = PathBuf::from(format!("{}~{}", parent.display(), side_name));
            self.untracked.insert(rename.clone(), new_item);

            if !from_right && !self.right_diff.contains_key(path) {
                self.log.push(format!("Adding {}", path.display()));
            }
            self.log_conflict(parent, Some(rename));
        }

        Ok(())
    }

    /// Three-way merge of blob contents
    ///
    /// Returns `(clean, oid)`; a dirty merge stores the marker-interleaved
    /// blob and reports the conflict through the return flag.
    fn merge_blobs(
        &self,
        base_oid: Option<&ObjectId>,
        left_oid: Option<&ObjectId>,
        right_oid: Option<&ObjectId>,
    ) -> anyhow::Result<(bool, ObjectId)> {
        match (left_oid, right_oid) {
            (None, Some(right)) => Ok((false, right.clone())),
            (Some(left), None) => Ok((false, left.clone())),
            (Some(left), Some(right)) => {
                if Some(left) == base_oid || left == right {
                    return Ok((true, right.clone()));
                }
                if Some(right) == base_oid {
                    return Ok((true, left.clone()));
                }

                let base_text = self.load_blob_text(base_oid)?;
                let left_text = self.load_blob_text(Some(left))?;
                let right_text = self.load_blob_text(Some(right))?;

                let merged = diff3::merge(&base_text, &left_text, &right_text);
                let rendered =
                    merged.to_text(&self.inputs.left_name, &self.inputs.right_name);

                let blob = Blob::from_bytes(rendered.into_bytes());
                let oid = self.repository.database().store(&blob)?;

                Ok((merged.is_clean(), oid))
            }
            (None, None) => anyhow::bail!("merge_blobs called with both sides absent"),
        }
    }

    /// Three-way merge over the mode integers; no textual fallback
    fn merge_modes(
        base: Option<EntryMode>,
        left: Option<EntryMode>,
        right: Option<EntryMode>,
    ) -> (bool, EntryMode) {
        match (left, right) {
            (None, Some(right)) => (false, right),
            (Some(left), None) => (false, left),
            (Some(left), Some(right)) => {
                if Some(left) == base || left == right {
                    (true, right)
                } else if Some(right) == base {
                    (true, left)
                } else {
                    (false, left)
                }
            }
            (None, None) => (false, EntryMode::default()),
        }
    }

    fn load_blob_text(&self, oid: Option<&ObjectId>) -> anyhow::Result<String> {
        let Some(oid) = oid else {
            return Ok(String::new());
        };

        let blob = self
            .repository
            .database()
            .parse_object_as_blob(oid)?
            .ok_or_else(|| anyhow::anyhow!("object {} is not a blob", oid))?;

        Ok(String::from_utf8_lossy(blob.data()).to_string())
    }

    fn add_conflicts_to_index(&mut self) {
        for (path, items) in &self.conflicts {
            self.index.add_conflict_set(path, items.clone());
        }
    }

    fn write_untracked_files(&mut self) -> anyhow::Result<()> {
        for (path, entry) in &self.untracked {
            let blob = self
                .repository
                .database()
                .parse_object_as_blob(&entry.oid)?
                .ok_or_else(|| anyhow::anyhow!("object {} is not a blob", entry.oid))?;

            self.repository
                .workspace()
                .write_file(path, blob.data(), None, false)?;
        }

        Ok(())
    }

    fn log_conflict(&mut self, path: &Path, rename: Option<PathBuf>) {
        let [_, left, right] = &self.conflicts[path];

        if left.is_some() && right.is_some() {
            self.log.push(format!(
                "CONFLICT (content): Merge conflict in {}",
                path.display()
            ));
            return;
        }

        let (deleted, modified) = if left.is_some() {
            (&self.inputs.right_name, &self.inputs.left_name)
        } else {
            (&self.inputs.left_name, &self.inputs.right_name)
        };

        match rename {
            Some(rename) => self.log.push(format!(
                "CONFLICT (file/directory): There is a directory with name {} in {}. Adding {} as {}",
                path.display(),
                deleted,
                path.display(),
                rename.display()
            )),
            None => self.log.push(format!(
                "CONFLICT (modify/delete): {} deleted in {} and modified in {}. Version {} of {} left in tree.",
                path.display(),
                deleted,
                modified,
                modified,
                path.display()
            )),
        }
    }
}
