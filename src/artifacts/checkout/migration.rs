//! Workspace migration
//!
//! Turns a tree diff into a filesystem transition: plan the creates,
//! updates and deletes, detect conflicts with local changes before touching
//! anything, then execute in a safe order (deletes, directory removals in
//! reverse depth, directory creations, updates, creates). The index is
//! updated in lockstep; a failure on any step surfaces before the index
//! lock is committed, so the index is never written partially.

use crate::areas::index::Index;
use crate::areas::repository::Repository;
use crate::artifacts::checkout::conflict::{ConflictMessage, ConflictType};
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::diff::tree_diff::{Change, ChangeSet};
use crate::artifacts::index::index_entry::parent_dirs_of;
use crate::artifacts::status::file_change::{IndexChangeType, WorkspaceChangeType};
use crate::artifacts::status::inspector::Inspector;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Type of file system action required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Create new file
    Create,
    /// Delete file
    Delete,
    /// Overwrite existing file
    Update,
}

/// Set of planned actions grouped by type
pub type ActionsSet = HashMap<ActionType, Vec<(PathBuf, Option<DatabaseEntry>)>>;

/// Set of detected conflicts grouped by type
pub type ConflictsSet = HashMap<ConflictType, Vec<PathBuf>>;

/// Migration planner and executor
///
/// All operations are planned before execution, allowing conflicts to be
/// detected and reported before any change is made.
pub struct Migration<'r> {
    repository: &'r Repository,
    index: &'r mut Index,
    changes: ChangeSet,
    /// Planned file system actions
    actions: ActionsSet,
    /// Detected conflicts
    conflicts: ConflictsSet,
    /// Directories to create
    mkdirs: BTreeSet<PathBuf>,
    /// Directories to remove
    rmdirs: BTreeSet<PathBuf>,
}

impl<'r> Migration<'r> {
    pub fn new(repository: &'r Repository, index: &'r mut Index, changes: ChangeSet) -> Self {
        let actions = HashMap::from([
            (ActionType::Create, Vec::new()),
            (ActionType::Delete, Vec::new()),
            (ActionType::Update, Vec::new()),
        ]);

        let conflicts = HashMap::from([
            (ConflictType::StaleFile, Vec::new()),
            (ConflictType::StaleDirectory, Vec::new()),
            (ConflictType::UntrackedOverwritten, Vec::new()),
            (ConflictType::UntrackedRemoved, Vec::new()),
        ]);

        Self {
            repository,
            index,
            changes,
            actions,
            conflicts,
            mkdirs: BTreeSet::new(),
            rmdirs: BTreeSet::new(),
        }
    }

    pub fn actions(&self) -> &ActionsSet {
        &self.actions
    }

    pub fn mkdirs(&self) -> &BTreeSet<PathBuf> {
        &self.mkdirs
    }

    pub fn rmdirs(&self) -> &BTreeSet<PathBuf> {
        &self.rmdirs
    }

    /// Plan, verify and execute the migration
    pub fn apply_changes(&mut self) -> anyhow::Result<()> {
        self.plan_changes()?;
        self.update_workspace()?;
        self.update_index()?;

        Ok(())
    }

    fn plan_changes(&mut self) -> anyhow::Result<()> {
        let changes: Vec<(PathBuf, Change)> = self
            .changes
            .iter()
            .map(|(path, change)| (path.clone(), change.clone()))
            .collect();

        for (path, change) in &changes {
            self.check_for_conflict(path, change)?;
            self.record_change(path, change);
        }

        let errors = self.collect_errors();
        if !errors.is_empty() {
            let errors = errors
                .iter()
                .map(|e| format!("error: {}", e))
                .collect::<Vec<_>>()
                .join("\n\n");
            anyhow::bail!("\n{}\n\nAborting", errors);
        }

        Ok(())
    }

    fn check_for_conflict(&mut self, path: &Path, change: &Change) -> anyhow::Result<()> {
        let inspector = Inspector::new(self.repository);
        let entry = self.index.entry_for_path(path).cloned();

        if self.index_differs_from_trees(
            &inspector,
            entry.as_ref(),
            change.old.as_ref(),
            change.new.as_ref(),
        ) {
            self.conflicts
                .entry(ConflictType::StaleFile)
                .or_default()
                .push(path.into());
            return Ok(());
        }

        let stat = self.repository.workspace().stat_file(path).ok();
        let conflict_type = ConflictType::get_conflict_type(
            stat.as_ref().map(|s| s.mode.is_tree()),
            entry.is_some(),
            change.new.is_some(),
        );

        match stat {
            None => {
                if let Some(parent) = self.untracked_parent(&inspector, path)? {
                    self.conflicts
                        .entry(conflict_type)
                        .or_default()
                        .push(if entry.is_some() {
                            path.into()
                        } else {
                            parent
                        });
                }
            }
            Some(stat) if stat.mode.is_tree() => {
                if inspector.trackable_file(self.index, path, &stat)? {
                    self.conflicts
                        .entry(conflict_type)
                        .or_default()
                        .push(path.into());
                }
            }
            Some(stat) => {
                let changed = inspector
                    .check_index_against_workspace(entry.as_ref(), Some(&stat))?;
                if changed != WorkspaceChangeType::None {
                    self.conflicts
                        .entry(conflict_type)
                        .or_default()
                        .push(path.into());
                }
            }
        }

        Ok(())
    }

    /// Find an untracked file standing in for an ancestor directory
    fn untracked_parent(
        &self,
        inspector: &Inspector,
        path: &Path,
    ) -> anyhow::Result<Option<PathBuf>> {
        for parent in parent_dirs_of(path).into_iter().rev() {
            let Ok(parent_stat) = self.repository.workspace().stat_file(parent) else {
                continue;
            };
            if parent_stat.mode.is_tree() {
                continue;
            }
            if inspector.trackable_file(self.index, parent, &parent_stat)? {
                return Ok(Some(parent.to_path_buf()));
            }
        }

        Ok(None)
    }

    fn index_differs_from_trees(
        &self,
        inspector: &Inspector,
        entry: Option<&crate::artifacts::index::index_entry::IndexEntry>,
        old_item: Option<&DatabaseEntry>,
        new_item: Option<&DatabaseEntry>,
    ) -> bool {
        inspector.check_index_against_tree(entry, old_item) != IndexChangeType::None
            && inspector.check_index_against_tree(entry, new_item) != IndexChangeType::None
    }

    fn record_change(&mut self, path: &Path, change: &Change) {
        match (&change.old, &change.new) {
            (Some(_), None) => {
                for ancestor in parent_dirs_of(path) {
                    self.rmdirs.insert(ancestor.to_path_buf());
                }
                self.actions
                    .entry(ActionType::Delete)
                    .or_default()
                    .push((path.into(), None));
            }
            (None, new @ Some(_)) => {
                for ancestor in parent_dirs_of(path) {
                    self.mkdirs.insert(ancestor.to_path_buf());
                }
                self.actions
                    .entry(ActionType::Create)
                    .or_default()
                    .push((path.into(), new.clone()));
            }
            (Some(_), new @ Some(_)) => {
                for ancestor in parent_dirs_of(path) {
                    self.mkdirs.insert(ancestor.to_path_buf());
                }
                self.actions
                    .entry(ActionType::Update)
                    .or_default()
                    .push((path.into(), new.clone()));
            }
            (None, None) => {}
        }
    }

    fn collect_errors(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .filter_map(|(conflict_type, paths)| {
                if paths.is_empty() {
                    return None;
                }

                let paths = paths
                    .iter()
                    .map(|p| format!("\t{}", p.display()))
                    .collect::<Vec<String>>();

                let ConflictMessage { header, footer } = conflict_type.into();
                Some(format!("{}\n{}\n{}", header, paths.join("\n"), footer))
            })
            .collect::<Vec<_>>()
    }

    fn update_workspace(&self) -> anyhow::Result<()> {
        self.repository.workspace().apply_migration(self)
    }

    /// Blob payload for a planned write
    pub fn blob_data(&self, oid: &crate::artifacts::objects::object_id::ObjectId) -> anyhow::Result<bytes::Bytes> {
        let blob = self
            .repository
            .database()
            .parse_object_as_blob(oid)?
            .ok_or_else(|| anyhow::anyhow!("object {} is not a blob", oid))?;

        Ok(blob.data().clone())
    }

    fn update_index(&mut self) -> anyhow::Result<()> {
        for (path, _) in &self.actions[&ActionType::Delete] {
            self.index.remove(path);
        }

        for action_type in [ActionType::Create, ActionType::Update] {
            for (path, entry) in self.actions[&action_type].clone() {
                let entry = entry
                    .ok_or_else(|| anyhow::anyhow!("Entry must be provided for {:?}", action_type))?;
                let stat = self.repository.workspace().stat_file(&path)?;
                self.index.add(path, entry.oid, stat);
            }
        }

        Ok(())
    }
}
