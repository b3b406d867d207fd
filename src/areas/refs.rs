//! References (branches, HEAD, remote-tracking refs)
//!
//! This module manages references: human-readable names pointing to commits.
//! References can be:
//! - Direct: Containing a commit SHA-1
//! - Symbolic: Pointing to another reference (e.g., HEAD -> refs/heads/main)
//!
//! ## File Format
//!
//! References are stored as text files containing either:
//! - A 40-character SHA-1 hash followed by a newline (direct reference)
//! - `ref: <path>\n` for symbolic references
//!
//! ## Atomicity
//!
//! Every write stages into `<name>.lock` and publishes by rename. A
//! symbolic update walks the chain and writes only the terminal file.
//! `compare_and_swap` holds the lock across the read of the current value
//! and the write, so the check and the store are serialized against
//! competing writers.

use crate::artifacts::branch::branch_name::{BranchName, SymRefName};
use crate::artifacts::lock::lockfile::Lockfile;
use crate::artifacts::objects::object_id::ObjectId;
use anyhow::Context;
use derive_new::new;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Regex pattern for parsing symbolic references
const SYMREF_REGEX: &str = r"^ref: (.+)$";

/// Name of the HEAD reference
pub const HEAD_REF_NAME: &str = "HEAD";

/// Name of the snapshot reference written by destructive operations
pub const ORIG_HEAD_REF_NAME: &str = "ORIG_HEAD";

/// Compare-and-swap failure: the on-disk value changed underneath the caller
#[derive(Debug, Error)]
#[error("reference {name} changed concurrently; expected value is stale")]
pub struct StaleValue {
    pub name: String,
}

/// Reference store
///
/// Handles reading and writing references rooted at the `.git` directory.
#[derive(Debug, new)]
pub struct Refs {
    /// Path to the directory holding `HEAD` and `refs/` (typically `.git`)
    path: Box<Path>,
}

/// Internal representation of a reference value
#[derive(Debug, Clone)]
enum SymRefOrOid {
    /// Symbolic reference pointing to another ref
    SymRef { sym_ref_name: SymRefName },
    /// Direct object ID
    Oid(ObjectId),
}

impl SymRefOrOid {
    fn read_symref_or_oid(path: &Path) -> anyhow::Result<Option<SymRefOrOid>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let content = content.trim();

        if content.is_empty() {
            return Ok(None);
        }

        let symref_match = regex::Regex::new(SYMREF_REGEX)?.captures(content);
        if let Some(symref_match) = symref_match {
            Ok(Some(SymRefOrOid::SymRef {
                sym_ref_name: SymRefName::new(symref_match[1].to_string()),
            }))
        } else {
            Ok(Some(SymRefOrOid::Oid(ObjectId::try_parse(
                content.to_string(),
            )?)))
        }
    }

    fn parse_bytes(content: &[u8]) -> anyhow::Result<Option<SymRefOrOid>> {
        let content = std::str::from_utf8(content)?.trim();
        if content.is_empty() {
            return Ok(None);
        }
        if let Some(target) = content.strip_prefix("ref: ") {
            return Ok(Some(SymRefOrOid::SymRef {
                sym_ref_name: SymRefName::new(target.to_string()),
            }));
        }
        Ok(Some(SymRefOrOid::Oid(ObjectId::try_parse(
            content.to_string(),
        )?)))
    }
}

impl Refs {
    /// Check if a branch is the currently checked-out branch
    pub fn is_current_branch(&self, branch_name: &BranchName) -> anyhow::Result<bool> {
        let current_ref = self.current_ref(None)?;

        Ok(branch_name == &BranchName::try_parse_sym_ref_name(&current_ref)?)
    }

    /// Read the object ID that a symbolic reference points to
    ///
    /// Follows symbolic references transparently until reaching a direct OID.
    pub fn read_oid(&self, sym_ref_name: &SymRefName) -> anyhow::Result<Option<ObjectId>> {
        self.read_symref(self.path.join(sym_ref_name.as_ref_path()).as_path())
    }

    /// Get the deepest symbolic reference reachable from `source`
    ///
    /// Follows symbolic references without collapsing to the OID; used for
    /// status display. Defaults to HEAD.
    pub fn current_ref(&self, source: Option<SymRefName>) -> anyhow::Result<SymRefName> {
        let source = source.unwrap_or_else(SymRefName::head);

        let ref_content =
            SymRefOrOid::read_symref_or_oid(self.path.join(source.as_ref_path()).as_path())?;

        match ref_content {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => Ok(self.current_ref(Some(sym_ref_name))?),
            Some(_) | None => Ok(source),
        }
    }

    fn read_symref(&self, path: &Path) -> anyhow::Result<Option<ObjectId>> {
        let ref_content = SymRefOrOid::read_symref_or_oid(path)?;

        match ref_content {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => {
                self.read_symref(self.path.join(sym_ref_name.as_ref_path()).as_path())
            }
            Some(SymRefOrOid::Oid(oid)) => Ok(Some(oid)),
            None => Ok(None),
        }
    }

    /// Update a reference, following any symbolic chain to the terminal file
    fn update_symref(&self, path: &Path, oid: &ObjectId) -> anyhow::Result<()> {
        let mut lock = Lockfile::new(path);
        lock.hold_for_update()?;

        let current = lock
            .read_committed()?
            .map(|bytes| SymRefOrOid::parse_bytes(&bytes))
            .transpose()?
            .flatten();

        match current {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => {
                lock.rollback()?;
                let target_path = self.path.join(sym_ref_name.as_ref_path());
                self.update_symref(target_path.as_path(), oid)
            }
            Some(SymRefOrOid::Oid(_)) | None => {
                lock.write(format!("{}\n", oid.as_ref()).as_bytes())?;
                lock.commit()?;
                Ok(())
            }
        }
    }

    /// Point HEAD at a branch if it exists, or at the raw value otherwise
    pub fn set_head(&self, revision: &str, raw_ref: String) -> anyhow::Result<()> {
        let revision_path = self.heads_path().join(revision).into_boxed_path();

        if revision_path.exists() {
            self.update_ref_file(
                self.head_path(),
                format!("ref: refs/heads/{}\n", revision),
            )
        } else {
            self.update_ref_file(self.head_path(), raw_ref)
        }
    }

    pub fn update_head(&self, oid: &ObjectId) -> anyhow::Result<()> {
        self.update_symref(self.head_path().as_ref(), oid)
    }

    /// Point a reference at a commit, following any symbolic chain
    pub fn update_ref(&self, name: &SymRefName, oid: &ObjectId) -> anyhow::Result<()> {
        let path = self.path.join(name.as_ref_path());
        std::fs::create_dir_all(
            path.parent()
                .with_context(|| format!("invalid ref path {:?}", path))?,
        )?;

        self.update_symref(&path, oid)
    }

    pub fn read_head(&self) -> anyhow::Result<Option<ObjectId>> {
        self.read_symref(&self.head_path())
    }

    /// Snapshot the previous HEAD value before a destructive operation
    pub fn update_orig_head(&self, oid: &ObjectId) -> anyhow::Result<()> {
        self.update_ref_file(
            self.path.join(ORIG_HEAD_REF_NAME).into_boxed_path(),
            format!("{}\n", oid.as_ref()),
        )
    }

    /// Write a reference file under lock, creating parent directories
    pub fn update_ref_file(&self, path: Box<Path>, raw_ref: String) -> anyhow::Result<()> {
        std::fs::create_dir_all(path.parent().with_context(|| {
            format!(
                "failed to create parent directories for ref file at {:?}",
                path
            )
        })?)?;

        let mut lock = Lockfile::new(path.to_path_buf());
        lock.hold_for_update()?;
        lock.write(raw_ref.as_bytes())?;
        lock.commit()?;

        Ok(())
    }

    /// Atomically update a reference iff its current value is the expected one
    ///
    /// `expected = None` means the reference must not exist; `new = None`
    /// deletes it. Fails with [`StaleValue`] when the on-disk value differs
    /// from `expected`.
    pub fn compare_and_swap(
        &self,
        name: &SymRefName,
        expected: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> anyhow::Result<()> {
        let terminal = self.terminal_ref_path(self.path.join(name.as_ref_path()).as_path())?;

        if let Some(parent) = terminal.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut lock = Lockfile::new(terminal.clone());
        lock.hold_for_update()?;

        let current = lock
            .read_committed()?
            .map(|bytes| SymRefOrOid::parse_bytes(&bytes))
            .transpose()?
            .flatten()
            .and_then(|value| match value {
                SymRefOrOid::Oid(oid) => Some(oid),
                SymRefOrOid::SymRef { .. } => None,
            });

        if current.as_ref() != expected {
            lock.rollback()?;
            return Err(StaleValue {
                name: name.to_string(),
            }
            .into());
        }

        match new {
            Some(oid) => {
                lock.write(format!("{}\n", oid.as_ref()).as_bytes())?;
                lock.commit()?;
            }
            None => {
                lock.delete_target()?;
                self.prune_branch_empty_parent_dirs(&terminal)?;
            }
        }

        Ok(())
    }

    /// Resolve a ref path through symbolic links to the file a write lands in
    fn terminal_ref_path(&self, path: &Path) -> anyhow::Result<PathBuf> {
        match SymRefOrOid::read_symref_or_oid(path)? {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => {
                self.terminal_ref_path(self.path.join(sym_ref_name.as_ref_path()).as_path())
            }
            _ => Ok(path.to_path_buf()),
        }
    }

    pub fn read_ref(&self, branch_name: BranchName) -> anyhow::Result<Option<ObjectId>> {
        let ref_path = self.find_path_to_branch(branch_name)?;
        self.read_symref(&ref_path)
    }

    fn find_path_to_branch(&self, branch_name: BranchName) -> anyhow::Result<Box<Path>> {
        // search for the ref file in .git, .git/refs and .git/refs/heads
        [self.path.clone(), self.refs_path(), self.heads_path()]
            .iter()
            .map(|base_path| base_path.join(branch_name.as_ref()).into_boxed_path())
            .find(|path| path.exists())
            .ok_or_else(|| anyhow::anyhow!("branch {} not found", branch_name))
    }

    pub fn create_branch(&self, name: BranchName, source_oid: ObjectId) -> anyhow::Result<()> {
        let branch_path = self.heads_path().join(name.as_ref()).into_boxed_path();

        if branch_path.exists() && !name.is_default_branch() {
            anyhow::bail!("branch {} already exists", name);
        }

        self.update_ref_file(branch_path, format!("{}\n", source_oid.as_ref()))
    }

    pub fn delete_branch(&self, name: &BranchName) -> anyhow::Result<ObjectId> {
        let branch_path = self.heads_path().join(name.as_ref()).into_boxed_path();

        let oid = self.read_symref(branch_path.as_ref())?;
        match oid {
            Some(oid) => {
                std::fs::remove_file(branch_path.as_ref()).with_context(|| {
                    format!("failed to delete branch file at {:?}", branch_path)
                })?;
                self.prune_branch_empty_parent_dirs(branch_path.as_ref())?;

                Ok(oid)
            }
            None => anyhow::bail!("branch {} does not exist", name),
        }
    }

    pub fn list_branches(&self) -> anyhow::Result<Vec<SymRefName>> {
        self.list_refs(Some(self.heads_path().as_ref()))
    }

    /// Depth-first enumeration of references below a prefix
    pub fn list_refs(&self, prefix: Option<&Path>) -> anyhow::Result<Vec<SymRefName>> {
        let root = match prefix {
            Some(path) => path.to_path_buf(),
            None => self.refs_path().to_path_buf(),
        };

        Ok(WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                if entry.path().is_file()
                    && entry.path().extension().is_none_or(|ext| ext != "lock")
                {
                    let relative_path = entry.path().strip_prefix(self.path.as_ref()).ok()?;
                    Some(SymRefName::new(relative_path.to_string_lossy().to_string()))
                } else {
                    None
                }
            })
            .collect::<Vec<_>>())
    }

    /// Map every reachable OID to the references pointing at it
    pub fn reverse_refs(&self) -> anyhow::Result<HashMap<ObjectId, Vec<SymRefName>>> {
        Ok(self
            .list_all_refs()?
            .into_iter()
            .fold(HashMap::new(), |mut acc, sym_ref| {
                if let Ok(Some(oid)) = self.read_oid(&sym_ref) {
                    acc.entry(oid).or_insert_with(Vec::new).push(sym_ref);
                }
                acc
            }))
    }

    fn list_all_refs(&self) -> anyhow::Result<Vec<SymRefName>> {
        Ok(self
            .list_refs(None)?
            .into_iter()
            .chain(std::iter::once(SymRefName::head()))
            .collect::<Vec<_>>())
    }

    fn prune_branch_empty_parent_dirs(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && parent != self.heads_path().as_ref()
            && parent != self.refs_path().as_ref()
            && parent != self.path.as_ref()
            && parent.exists()
            && parent.read_dir()?.next().is_none()
        {
            std::fs::remove_dir(parent).with_context(|| {
                format!("failed to remove empty branch directory at {:?}", parent)
            })?;
            self.prune_branch_empty_parent_dirs(parent)?;
        }

        Ok(())
    }

    pub fn head_path(&self) -> Box<Path> {
        self.path.join(HEAD_REF_NAME).into_boxed_path()
    }

    pub fn refs_path(&self) -> Box<Path> {
        self.path.join("refs").into_boxed_path()
    }

    pub fn heads_path(&self) -> Box<Path> {
        self.refs_path().join("heads").into_boxed_path()
    }

    pub fn remotes_path(&self) -> Box<Path> {
        self.refs_path().join("remotes").into_boxed_path()
    }
}
